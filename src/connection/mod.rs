//! Authenticated NVR connections shared across requests

mod manager;

use std::fmt;
use std::time::Duration;

pub use manager::ConnectionManager;

/// Username/password login material for one NVR
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub allow_self_signed: bool,
}

impl Credentials {
    /// Cache key shared by the connection and bootstrap caches
    pub fn key(&self) -> String {
        format!("{}:{}", self.base_url, self.username)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("allow_self_signed", &self.allow_self_signed)
            .finish_non_exhaustive()
    }
}

/// Timing knobs for connection setup and reuse
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub login_timeout: Duration,
    /// How long a late login event may still override the returned value
    pub login_event_grace: Duration,
    pub bootstrap_timeout: Duration,
    pub request_timeout: Duration,
    /// Pause after the first bootstrap fetch before the client is handed out
    pub settle_delay: Duration,
    pub health_check_interval: Duration,
    pub bootstrap_ttl: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(60),
            login_event_grace: Duration::from_millis(250),
            bootstrap_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            health_check_interval: Duration::from_secs(60),
            bootstrap_ttl: Duration::from_secs(30),
        }
    }
}
