//! Small async helpers shared across the crate

pub mod race;

pub use race::{race_with_timeout, with_timeout};
