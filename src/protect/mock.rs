//! In-memory NVR doubles for tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::broadcast;

use super::fmp4::tests::sample_init;
use super::{
    Bootstrap, ConnectOptions, Livestream, ProtectApi, ProtectConnector, ProtectError,
    ProtectEvent,
};

/// How a mock login behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBehavior {
    /// Return `true` and emit `Login(true)`
    Accept,
    /// Return `false` and emit `Login(false)`
    Reject,
    /// Return `false` but emit `Login(true)`
    EventOnly,
    /// Never complete and never emit
    Hang,
}

/// Shared knobs and counters for every client a connector hands out
pub struct MockNvr {
    pub login_behavior: Mutex<LoginBehavior>,
    pub login_delay: Mutex<Duration>,
    pub bootstrap: Mutex<Option<serde_json::Value>>,
    pub livestream_accepts: AtomicBool,
    /// When false every client reports no bootstrap, failing health checks
    pub healthy: AtomicBool,
    pub logins: AtomicUsize,
    pub bootstrap_fetches: AtomicUsize,
    pub logouts: AtomicUsize,
    pub livestreams: Mutex<Vec<Arc<MockLivestream>>>,
    pub connect_options: Mutex<Vec<ConnectOptions>>,
}

impl MockNvr {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login_behavior: Mutex::new(LoginBehavior::Accept),
            login_delay: Mutex::new(Duration::from_millis(50)),
            bootstrap: Mutex::new(Some(json!({
                "cameras": [
                    { "id": "cam1", "name": "Front Door", "isConnected": true },
                    { "id": "cam2", "mac": "F0:9F:C2:00:00:02", "name": "Garage", "state": "DISCONNECTED" }
                ],
                "lights": [],
                "sensors": [],
                "chimes": [],
                "viewers": [],
                "nvr": { "name": "UNVR" }
            }))),
            livestream_accepts: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            logins: AtomicUsize::new(0),
            bootstrap_fetches: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            livestreams: Mutex::new(Vec::new()),
            connect_options: Mutex::new(Vec::new()),
        })
    }

    pub fn set_login(&self, behavior: LoginBehavior) {
        *self.login_behavior.lock() = behavior;
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn bootstrap_fetches(&self) -> usize {
        self.bootstrap_fetches.load(Ordering::SeqCst)
    }

    pub fn livestreams_started(&self) -> usize {
        self.livestreams
            .lock()
            .iter()
            .filter(|s| s.started.load(Ordering::SeqCst))
            .count()
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn ProtectConnector> {
        Arc::new(MockConnector { nvr: self.clone() })
    }
}

pub struct MockConnector {
    nvr: Arc<MockNvr>,
}

impl ProtectConnector for MockConnector {
    fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn ProtectApi>, ProtectError> {
        self.nvr.connect_options.lock().push(options.clone());
        let (events, _) = broadcast::channel(16);
        Ok(Arc::new(MockProtectApi {
            nvr: self.nvr.clone(),
            bootstrap: RwLock::new(None),
            events,
        }))
    }
}

pub struct MockProtectApi {
    nvr: Arc<MockNvr>,
    bootstrap: RwLock<Option<Arc<Bootstrap>>>,
    events: broadcast::Sender<ProtectEvent>,
}

#[async_trait]
impl ProtectApi for MockProtectApi {
    async fn login(
        &self,
        _host: &str,
        _username: &str,
        _password: &str,
    ) -> Result<bool, ProtectError> {
        self.nvr.logins.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.nvr.login_behavior.lock();
        let delay = *self.nvr.login_delay.lock();
        tokio::time::sleep(delay).await;

        let (event, returned) = match behavior {
            LoginBehavior::Accept => (true, true),
            LoginBehavior::Reject => (false, false),
            LoginBehavior::EventOnly => (true, false),
            LoginBehavior::Hang => std::future::pending().await,
        };
        let _ = self.events.send(ProtectEvent::Login(event));
        Ok(returned)
    }

    async fn get_bootstrap(&self) -> Result<bool, ProtectError> {
        self.nvr.bootstrap_fetches.fetch_add(1, Ordering::SeqCst);
        let raw = self.nvr.bootstrap.lock().clone();
        let Some(raw) = raw else {
            return Ok(false);
        };
        let bootstrap: Bootstrap = serde_json::from_value(raw)
            .map_err(|e| ProtectError::Protocol(e.to_string()))?;
        *self.bootstrap.write() = Some(Arc::new(bootstrap));
        let _ = self.events.send(ProtectEvent::Bootstrap);
        Ok(true)
    }

    fn bootstrap(&self) -> Option<Arc<Bootstrap>> {
        if !self.nvr.healthy.load(Ordering::SeqCst) {
            return None;
        }
        self.bootstrap.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ProtectEvent> {
        self.events.subscribe()
    }

    fn create_livestream(&self) -> Arc<dyn Livestream> {
        let stream = Arc::new(MockLivestream::new(
            self.nvr.livestream_accepts.load(Ordering::SeqCst),
        ));
        self.nvr.livestreams.lock().push(stream.clone());
        stream
    }

    async fn logout(&self) {
        self.nvr.logouts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Livestream that serves a canned H.264 init segment and lets tests push
/// media fragments
pub struct MockLivestream {
    accepts: bool,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    pub camera_id: Mutex<Option<String>>,
    tx: Mutex<Option<broadcast::Sender<Bytes>>>,
}

impl MockLivestream {
    pub fn new(accepts: bool) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            accepts,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            camera_id: Mutex::new(None),
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Push a media fragment to every subscriber
    pub fn push(&self, fragment: &[u8]) -> usize {
        self.tx
            .lock()
            .as_ref()
            .and_then(|tx| tx.send(Bytes::copy_from_slice(fragment)).ok())
            .unwrap_or(0)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Livestream for MockLivestream {
    async fn start(
        &self,
        camera_id: &str,
        _channel: u32,
        _request_id: &str,
    ) -> Result<bool, ProtectError> {
        if !self.accepts {
            return Ok(false);
        }
        *self.camera_id.lock() = Some(camera_id.to_string());
        self.started.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn init_segment(&self) -> Result<Bytes, ProtectError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ProtectError::Livestream("not started".to_string()));
        }
        Ok(Bytes::from(sample_init()))
    }

    fn codec(&self) -> Option<String> {
        self.started
            .load(Ordering::SeqCst)
            .then(|| "avc1.4d401f,mp4a.40.2".to_string())
    }

    fn segments(&self) -> broadcast::Receiver<Bytes> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tx.lock().take();
    }
}
