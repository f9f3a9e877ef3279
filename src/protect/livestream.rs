use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::NvrSession;
use super::fmp4::{codec_string, Fragment, FragmentSplitter};
use super::{tls, Livestream, ProtectError};

/// Media fragments buffered per subscriber before it starts lagging
const SEGMENT_BUFFER: usize = 64;

/// Progress of the init segment
#[derive(Debug, Clone)]
enum InitState {
    Pending,
    Ready(Bytes),
    Ended(String),
}

#[derive(Deserialize)]
struct LivestreamUrl {
    url: String,
}

/// NVR livestream over a WebSocket carrying fMP4
pub struct WsLivestream {
    http: reqwest::Client,
    session: Option<NvrSession>,
    allow_self_signed: bool,
    init: Arc<watch::Sender<InitState>>,
    codec: Arc<Mutex<Option<String>>>,
    segments: Arc<Mutex<Option<broadcast::Sender<Bytes>>>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsLivestream {
    pub(crate) fn new(
        http: reqwest::Client,
        session: Option<NvrSession>,
        allow_self_signed: bool,
    ) -> Self {
        let (init, _) = watch::channel(InitState::Pending);
        Self {
            http,
            session,
            allow_self_signed,
            init: Arc::new(init),
            codec: Arc::new(Mutex::new(None)),
            segments: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
        }
    }

    /// Ask the NVR for a WebSocket URL for this camera
    async fn negotiate_url(
        &self,
        session: &NvrSession,
        camera_id: &str,
        channel: u32,
        request_id: &str,
    ) -> Result<Option<String>, ProtectError> {
        let url = format!(
            "https://{}/proxy/protect/api/ws/livestream?allowPartialGOP&camera={}&channel={}\
             &chunkSize=4096&extendedVideoMetadata&fragmentDurationMillis=100&progressive\
             &rebaseTimestampsToZero=true&requestId={}&type=fmp4",
            session.host,
            urlencoding::encode(camera_id),
            channel,
            urlencoding::encode(request_id),
        );

        let response = self.http.get(&url).headers(session.headers()).send().await?;
        if !response.status().is_success() {
            warn!(
                camera_id = %camera_id,
                status = response.status().as_u16(),
                "NVR refused livestream"
            );
            return Ok(None);
        }

        let body: LivestreamUrl = response
            .json()
            .await
            .map_err(|e| ProtectError::Protocol(format!("invalid livestream response: {}", e)))?;
        Ok(Some(body.url))
    }
}

#[async_trait]
impl Livestream for WsLivestream {
    async fn start(
        &self,
        camera_id: &str,
        channel: u32,
        request_id: &str,
    ) -> Result<bool, ProtectError> {
        if self.reader.lock().is_some() {
            return Err(ProtectError::Livestream("already started".to_string()));
        }
        let session = self.session.clone().ok_or(ProtectError::NotLoggedIn)?;

        let Some(ws_url) = self
            .negotiate_url(&session, camera_id, channel, request_id)
            .await?
        else {
            return Ok(false);
        };

        let mut request = ws_url.as_str().into_client_request()?;
        if let Ok(cookie) = HeaderValue::from_str(&session.cookie) {
            request.headers_mut().insert("Cookie", cookie);
        }

        let connector = tls::websocket_connector(self.allow_self_signed)?;
        let (mut ws, _) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await?;
        info!(camera_id = %camera_id, request_id = %request_id, "Livestream connected");

        let (tx, _) = broadcast::channel(SEGMENT_BUFFER);
        *self.segments.lock() = Some(tx.clone());

        let cancel = self.cancel.clone();
        let init = self.init.clone();
        let codec = self.codec.clone();
        let segments = self.segments.clone();
        let camera_id = camera_id.to_string();

        let reader = tokio::spawn(async move {
            let mut splitter = FragmentSplitter::new();

            let reason = loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break "stopped".to_string(),
                    message = ws.next() => message,
                };

                let data = match message {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => break "closed by NVR".to_string(),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break format!("read error: {}", e),
                };

                let fragments = match splitter.push(&data) {
                    Ok(fragments) => fragments,
                    Err(e) => break e.to_string(),
                };

                for fragment in fragments {
                    match fragment {
                        Fragment::Init(bytes) => {
                            let detected = codec_string(&bytes);
                            debug!(camera_id = %camera_id, codec = ?detected, "Init segment received");
                            *codec.lock() = detected;
                            init.send_replace(InitState::Ready(bytes));
                        }
                        Fragment::Media(bytes) => {
                            // Nobody listening yet is not an error
                            let _ = tx.send(bytes);
                        }
                    }
                }
            };

            debug!(camera_id = %camera_id, reason = %reason, "Livestream reader finished");
            init.send_if_modified(|state| {
                if matches!(state, InitState::Pending) {
                    *state = InitState::Ended(reason);
                    true
                } else {
                    false
                }
            });
            // Dropping the last sender closes every subscriber
            segments.lock().take();
        });

        *self.reader.lock() = Some(reader);
        Ok(true)
    }

    async fn init_segment(&self) -> Result<Bytes, ProtectError> {
        let mut rx = self.init.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, InitState::Pending))
            .await
            .map_err(|_| ProtectError::Livestream("livestream dropped".to_string()))?
            .clone();

        match state {
            InitState::Ready(bytes) => Ok(bytes),
            InitState::Ended(reason) => Err(ProtectError::Livestream(format!(
                "stream ended before init segment: {}",
                reason
            ))),
            InitState::Pending => unreachable!("wait_for returned a pending state"),
        }
    }

    fn codec(&self) -> Option<String> {
        self.codec.lock().clone()
    }

    fn segments(&self) -> broadcast::Receiver<Bytes> {
        match self.segments.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // Already ended: hand out a receiver that is closed
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.segments.lock().take();
        self.init.send_if_modified(|state| {
            if matches!(state, InitState::Pending) {
                *state = InitState::Ended("stopped".to_string());
                true
            } else {
                false
            }
        });

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                debug!("Livestream reader join failed: {}", e);
            }
        }
    }
}

impl Drop for WsLivestream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
