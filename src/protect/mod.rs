//! NVR client seam
//!
//! Everything the viewer needs from the NVR goes through three traits:
//!
//! - [`ProtectConnector`] builds an unauthenticated client with a
//!   per-connection TLS policy
//! - [`ProtectApi`] logs in, fetches the device bootstrap and opens
//!   livestreams
//! - [`Livestream`] yields one camera's fMP4 init segment and media fragments
//!
//! [`HttpProtectApi`] is the production implementation. Tests use the
//! in-crate doubles from `mock`.

mod client;
mod error;
pub mod fmp4;
mod livestream;
mod tls;
mod types;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

pub use client::{HttpConnector, HttpProtectApi};
pub use error::ProtectError;
pub use livestream::WsLivestream;
pub use types::{Bootstrap, Camera, CameraSummary};

/// Notifications emitted by a vendor client alongside its return values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectEvent {
    /// Outcome of a login attempt
    Login(bool),
    /// A fresh bootstrap snapshot is available
    Bootstrap,
}

/// Options applied to a single vendor client
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Accept NVR certificates that do not chain to a public authority.
    /// Scoped to the client being built.
    pub allow_self_signed: bool,
    /// Per-request timeout for management API calls
    pub request_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            allow_self_signed: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Factory for vendor clients
pub trait ProtectConnector: Send + Sync {
    fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn ProtectApi>, ProtectError>;
}

/// Authenticated access to one NVR
#[async_trait]
pub trait ProtectApi: Send + Sync {
    /// Log in. `host` carries no scheme. Returns `false` when the NVR
    /// rejected the credentials.
    async fn login(&self, host: &str, username: &str, password: &str)
        -> Result<bool, ProtectError>;

    /// Refresh the bootstrap snapshot. Returns `false` when the NVR
    /// answered without a usable snapshot.
    async fn get_bootstrap(&self) -> Result<bool, ProtectError>;

    /// Last bootstrap snapshot, if any
    fn bootstrap(&self) -> Option<Arc<Bootstrap>>;

    /// Subscribe to client events
    fn subscribe(&self) -> broadcast::Receiver<ProtectEvent>;

    /// Create an unstarted livestream bound to this client's session
    fn create_livestream(&self) -> Arc<dyn Livestream>;

    /// End the NVR session. Best effort.
    async fn logout(&self);
}

/// A live fMP4 session for one camera
#[async_trait]
pub trait Livestream: Send + Sync {
    /// Open the stream. Returns `false` when the NVR refused it.
    async fn start(
        &self,
        camera_id: &str,
        channel: u32,
        request_id: &str,
    ) -> Result<bool, ProtectError>;

    /// Initialization segment (ftyp + moov). Waits until it has arrived.
    async fn init_segment(&self) -> Result<Bytes, ProtectError>;

    /// RFC 6381 codec string, known once the init segment arrived
    fn codec(&self) -> Option<String>;

    /// Media fragments following the init segment. The receiver reports
    /// `Closed` once the stream has ended or been stopped.
    fn segments(&self) -> broadcast::Receiver<Bytes>;

    /// Stop the stream. Idempotent.
    async fn stop(&self);
}

/// Strip the scheme and trailing slash from a configured base URL
pub fn host_from_base_url(base_url: &str) -> &str {
    let trimmed = base_url.trim().trim_end_matches('/');
    trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed)
}
