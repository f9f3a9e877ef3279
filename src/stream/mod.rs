//! Live video sessions
//!
//! # Components
//!
//! - `StreamRegistry` - de-duplicates concurrent livestreams per camera
//! - `open_livestream` - start one NVR livestream with a bounded wait

mod registry;

use std::sync::Arc;
use std::time::Duration;

pub use registry::{StreamLease, StreamRegistry};

use crate::protect::{Livestream, ProtectApi, ProtectError};
use crate::utils::with_timeout;

/// Main channel (highest resolution)
pub const DEFAULT_CHANNEL: u32 = 0;

/// Start a livestream for `camera_id`.
///
/// `request_prefix` tags the NVR-side request id so concurrent probes and
/// viewers are distinguishable in NVR logs.
pub async fn open_livestream(
    api: &dyn ProtectApi,
    camera_id: &str,
    request_prefix: &str,
    timeout: Duration,
) -> Result<Arc<dyn Livestream>, ProtectError> {
    let stream = api.create_livestream();
    let request_id = format!("{}-{}", request_prefix, uuid::Uuid::new_v4().simple());

    let started = with_timeout(
        "livestream start",
        timeout,
        stream.start(camera_id, DEFAULT_CHANNEL, &request_id),
    )
    .await;

    match started {
        Ok(true) => Ok(stream),
        Ok(false) => Err(ProtectError::LivestreamRefused),
        Err(e) => {
            stream.stop().await;
            Err(e)
        }
    }
}
