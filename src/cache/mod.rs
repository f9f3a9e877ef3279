//! Short-lived caches for bootstrap snapshots and codec strings

mod ttl;

pub use ttl::TtlCache;
