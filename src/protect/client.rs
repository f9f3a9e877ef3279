use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::livestream::WsLivestream;
use super::{
    Bootstrap, ConnectOptions, Livestream, ProtectApi, ProtectConnector, ProtectError,
    ProtectEvent,
};

const CSRF_HEADER: &str = "x-csrf-token";
const UPDATED_CSRF_HEADER: &str = "x-updated-csrf-token";

/// Authenticated NVR session material
#[derive(Debug, Clone)]
pub(crate) struct NvrSession {
    pub host: String,
    pub cookie: String,
    pub csrf_token: Option<String>,
}

impl NvrSession {
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.cookie) {
            headers.insert(COOKIE, value);
        }
        if let Some(token) = &self.csrf_token {
            if let Ok(value) = HeaderValue::from_str(token) {
                headers.insert(CSRF_HEADER, value);
            }
        }
        headers
    }
}

/// UniFi OS management API client over HTTPS
pub struct HttpProtectApi {
    http: reqwest::Client,
    allow_self_signed: bool,
    session: RwLock<Option<NvrSession>>,
    bootstrap: RwLock<Option<Arc<Bootstrap>>>,
    events: broadcast::Sender<ProtectEvent>,
}

impl HttpProtectApi {
    pub fn new(options: &ConnectOptions) -> Result<Self, ProtectError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.allow_self_signed)
            .timeout(options.request_timeout)
            .build()?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            http,
            allow_self_signed: options.allow_self_signed,
            session: RwLock::new(None),
            bootstrap: RwLock::new(None),
            events,
        })
    }

    fn current_session(&self) -> Result<NvrSession, ProtectError> {
        self.session.read().clone().ok_or(ProtectError::NotLoggedIn)
    }

    fn publish(&self, event: ProtectEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Join `Set-Cookie` headers into a single `Cookie` request value
fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn csrf_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(UPDATED_CSRF_HEADER)
        .or_else(|| headers.get(CSRF_HEADER))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl ProtectApi for HttpProtectApi {
    async fn login(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<bool, ProtectError> {
        let url = format!("https://{}/api/auth/login", host);
        debug!(host = %host, username = %username, "Logging in to NVR");

        let response = match self
            .http
            .post(&url)
            .json(&json!({
                "username": username,
                "password": password,
                "rememberMe": true,
            }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.publish(ProtectEvent::Login(false));
                return Err(e.into());
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(host = %host, status = status.as_u16(), "NVR rejected credentials");
            self.publish(ProtectEvent::Login(false));
            return Ok(false);
        }
        if !status.is_success() {
            self.publish(ProtectEvent::Login(false));
            return Err(ProtectError::Protocol(format!(
                "login returned HTTP {}",
                status.as_u16()
            )));
        }

        let Some(cookie) = cookie_header(response.headers()) else {
            self.publish(ProtectEvent::Login(false));
            return Err(ProtectError::Protocol(
                "login response carried no session cookie".to_string(),
            ));
        };

        *self.session.write() = Some(NvrSession {
            host: host.to_string(),
            cookie,
            csrf_token: csrf_token(response.headers()),
        });

        info!(host = %host, "Logged in to NVR");
        self.publish(ProtectEvent::Login(true));
        Ok(true)
    }

    async fn get_bootstrap(&self) -> Result<bool, ProtectError> {
        let session = self.current_session()?;
        let url = format!("https://{}/proxy/protect/api/bootstrap", session.host);

        let response = self.http.get(&url).headers(session.headers()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProtectError::Protocol(format!(
                "bootstrap returned HTTP {}",
                status.as_u16()
            )));
        }

        if let Some(token) = csrf_token(response.headers()) {
            if let Some(current) = self.session.write().as_mut() {
                current.csrf_token = Some(token);
            }
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            warn!(host = %session.host, "NVR returned an empty bootstrap body");
            return Ok(false);
        }

        let bootstrap: Bootstrap = serde_json::from_slice(&body)
            .map_err(|e| ProtectError::Protocol(format!("invalid bootstrap: {}", e)))?;
        debug!(
            host = %session.host,
            cameras = bootstrap.cameras().len(),
            "Bootstrap fetched"
        );

        *self.bootstrap.write() = Some(Arc::new(bootstrap));
        self.publish(ProtectEvent::Bootstrap);
        Ok(true)
    }

    fn bootstrap(&self) -> Option<Arc<Bootstrap>> {
        self.bootstrap.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ProtectEvent> {
        self.events.subscribe()
    }

    fn create_livestream(&self) -> Arc<dyn Livestream> {
        Arc::new(WsLivestream::new(
            self.http.clone(),
            self.session.read().clone(),
            self.allow_self_signed,
        ))
    }

    async fn logout(&self) {
        let Some(session) = self.session.write().take() else {
            return;
        };
        let url = format!("https://{}/api/auth/logout", session.host);

        match self.http.post(&url).headers(session.headers()).send().await {
            Ok(response) => debug!(
                host = %session.host,
                status = response.status().as_u16(),
                "Logged out of NVR"
            ),
            Err(e) => debug!(host = %session.host, "NVR logout failed: {}", e),
        }
        *self.bootstrap.write() = None;
    }
}

/// Production connector
#[derive(Debug, Default, Clone)]
pub struct HttpConnector;

impl ProtectConnector for HttpConnector {
    fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn ProtectApi>, ProtectError> {
        Ok(Arc::new(HttpProtectApi::new(options)?))
    }
}
