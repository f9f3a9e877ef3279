use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Viewer session settings
    pub session: SessionConfig,
    /// NVR connection settings and login form defaults
    pub protect: ProtectConfig,
    /// Cache lifetimes
    pub cache: CacheConfig,
    /// Memory monitor settings
    pub monitor: MonitorConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 3000,
        }
    }
}

/// Viewer session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime in seconds, also the cookie max-age
    pub ttl_secs: u64,
    /// How often expired sessions are swept
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

/// NVR connection configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectConfig {
    /// Default NVR base URL offered to the login form
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_key: Option<String>,
    /// Default for the per-session self-signed certificate flag
    pub allow_self_signed: bool,
    pub login_timeout_secs: u64,
    pub bootstrap_timeout_secs: u64,
    /// Per-request timeout for NVR management calls
    pub request_timeout_secs: u64,
    /// Wait for a livestream to start and deliver its init segment
    pub livestream_timeout_secs: u64,
    /// Pause after the first bootstrap before a connection is used
    pub settle_delay_ms: u64,
    pub health_check_interval_secs: u64,
}

impl Default for ProtectConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            access_key: None,
            allow_self_signed: false,
            login_timeout_secs: 60,
            bootstrap_timeout_secs: 60,
            request_timeout_secs: 30,
            livestream_timeout_secs: 30,
            settle_delay_ms: 500,
            health_check_interval_secs: 60,
        }
    }
}

impl std::fmt::Debug for ProtectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("has_access_key", &self.access_key.is_some())
            .field("allow_self_signed", &self.allow_self_signed)
            .field("login_timeout_secs", &self.login_timeout_secs)
            .field("bootstrap_timeout_secs", &self.bootstrap_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("livestream_timeout_secs", &self.livestream_timeout_secs)
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("health_check_interval_secs", &self.health_check_interval_secs)
            .finish()
    }
}

/// Cache lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub bootstrap_ttl_secs: u64,
    pub codec_ttl_secs: u64,
    /// Window in which stream requests for one camera share a livestream
    pub stream_reuse_window_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bootstrap_ttl_secs: 30,
            codec_ttl_secs: 300,
            stream_reuse_window_secs: 5,
        }
    }
}

/// Memory monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}
