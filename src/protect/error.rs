use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to the NVR.
///
/// `Clone` so that one login outcome can be handed to every caller that
/// waited on the same in-flight attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtectError {
    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("{operation} timed out after {}s", .limit.as_secs())]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("NVR request failed: {0}")]
    Http(String),

    #[error("Unexpected NVR response: {0}")]
    Protocol(String),

    #[error("Failed to start livestream")]
    LivestreamRefused,

    #[error("Livestream error: {0}")]
    Livestream(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

impl From<reqwest::Error> for ProtectError {
    fn from(err: reqwest::Error) -> Self {
        ProtectError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtectError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ProtectError::Livestream(err.to_string())
    }
}

impl From<rustls::Error> for ProtectError {
    fn from(err: rustls::Error) -> Self {
        ProtectError::Tls(err.to_string())
    }
}
