use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::auth::Session;
use crate::connection::Credentials;
use crate::error::{AppError, Result};
use crate::protect::{Livestream, ProtectError};
use crate::state::AppState;
use crate::stream::open_livestream;
use crate::utils::with_timeout;

/// Identifier the NVR knows `camera_id` (id, MAC or UUID) by
async fn resolve_camera(
    state: &Arc<AppState>,
    creds: &Credentials,
    camera_id: &str,
) -> Result<String> {
    let bootstrap = state.connections.bootstrap(creds).await?;
    bootstrap
        .find_camera(camera_id)
        .map(|camera| camera.identifier().unwrap_or(camera_id).to_string())
        .ok_or_else(|| AppError::NotFound("Camera not found".to_string()))
}

#[derive(Serialize)]
pub struct CodecResponse {
    pub codec: String,
}

/// Codec string for MSE, probed once per camera and cached
pub async fn stream_codec(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(camera_id): Path<String>,
) -> Result<Json<CodecResponse>> {
    let creds = session.credentials()?;
    let target = resolve_camera(&state, &creds, &camera_id).await?;

    if let Some(codec) = state.codecs.get(&target) {
        debug!(camera_id = %target, codec = %codec, "Codec cache hit");
        return Ok(Json(CodecResponse { codec }));
    }

    let api = state.connections.get_connection(&creds).await?;
    let timeout = state.livestream_timeout();
    let probe = open_livestream(api.as_ref(), &target, "codec", timeout).await?;
    let init = with_timeout("init segment", timeout, probe.init_segment()).await;
    let codec = probe.codec();
    probe.stop().await;

    init?;
    let codec = codec.ok_or_else(|| {
        ProtectError::Livestream("init segment carried no recognizable codec".to_string())
    })?;

    info!(camera_id = %target, codec = %codec, "Codec probed");
    state.codecs.put(target, codec.clone());
    Ok(Json(CodecResponse { codec }))
}

/// Gives the stream lease back when the response body is dropped
struct StreamGuard {
    state: Arc<AppState>,
    camera_id: String,
    handle: Arc<dyn Livestream>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        debug!(camera_id = %self.camera_id, "Viewer disconnected");
        self.state.streams.release(&self.camera_id, &self.handle);
    }
}

/// Live fMP4: init segment, then media fragments as they arrive
pub async fn stream_camera(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(camera_id): Path<String>,
) -> Result<Response> {
    let creds = session.credentials()?;
    let target = resolve_camera(&state, &creds, &camera_id).await?;
    let api = state.connections.get_connection(&creds).await?;
    let timeout = state.livestream_timeout();

    let factory_target = target.clone();
    let lease = state
        .streams
        .get_or_create(&target, move || async move {
            open_livestream(api.as_ref(), &factory_target, "ui", timeout).await
        })
        .await?;
    info!(
        camera_id = %target,
        request_count = lease.request_count,
        reused = lease.reused,
        "Viewer attached"
    );

    let guard = StreamGuard {
        state: state.clone(),
        camera_id: target.clone(),
        handle: lease.handle.clone(),
    };
    let mut segments = lease.handle.segments();
    let init = with_timeout("init segment", timeout, lease.handle.init_segment()).await?;

    let body_stream = async_stream::stream! {
        let guard = guard;
        yield Ok::<Bytes, std::io::Error>(init);

        loop {
            match segments.recv().await {
                Ok(fragment) => yield Ok(fragment),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        camera_id = %guard.camera_id,
                        skipped = skipped,
                        "Viewer fell behind, fragments dropped"
                    );
                }
                Err(RecvError::Closed) => {
                    debug!(camera_id = %guard.camera_id, "Upstream livestream ended");
                    break;
                }
            }
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}
