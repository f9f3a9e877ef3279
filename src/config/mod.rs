//! Configuration
//!
//! Layered as defaults < JSON file < environment < command line. The last
//! layer is applied by the binary.

mod schema;

pub use schema::*;

use std::path::Path;
use std::time::Duration;

use crate::connection::ConnectionSettings;
use crate::error::{AppError, Result};

impl AppConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Overlay `PROTECT_*` / `NVR_IP` variables from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Overlay environment variables resolved through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(base_url) = var("PROTECT_BASE_URL") {
            self.protect.base_url = Some(base_url);
        } else if let Some(ip) = var("NVR_IP") {
            self.protect.base_url = Some(format!("https://{}", ip.trim()));
        }
        if let Some(username) = var("PROTECT_USERNAME") {
            self.protect.username = Some(username);
        }
        if let Some(password) = var("PROTECT_PASSWORD") {
            self.protect.password = Some(password);
        }
        if let Some(access_key) = var("PROTECT_ACCESS_KEY") {
            self.protect.access_key = Some(access_key);
        }
        if let Some(flag) = var("PROTECT_ALLOW_SELF_SIGNED") {
            self.protect.allow_self_signed = flag.trim() == "true";
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            login_timeout: Duration::from_secs(self.protect.login_timeout_secs),
            bootstrap_timeout: Duration::from_secs(self.protect.bootstrap_timeout_secs),
            request_timeout: Duration::from_secs(self.protect.request_timeout_secs),
            settle_delay: Duration::from_millis(self.protect.settle_delay_ms),
            health_check_interval: Duration::from_secs(self.protect.health_check_interval_secs),
            bootstrap_ttl: Duration::from_secs(self.cache.bootstrap_ttl_secs),
            ..ConnectionSettings::default()
        }
    }
}
