use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use crate::auth::SessionStore;
use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::connection::ConnectionManager;
use crate::protect::ProtectConnector;
use crate::stream::StreamRegistry;

/// Application-wide state shared across handlers
///
/// Every cache lives here and is injected through axum `State`; nothing is
/// process-global.
pub struct AppState {
    /// Effective configuration
    pub config: AppConfig,
    /// Viewer sessions keyed by cookie token
    pub sessions: SessionStore,
    /// Authenticated NVR clients and their bootstrap snapshots
    pub connections: Arc<ConnectionManager>,
    /// Codec strings keyed by camera id
    pub codecs: TtlCache<String, String>,
    /// Live streams keyed by camera id
    pub streams: StreamRegistry,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: AppConfig, connector: Arc<dyn ProtectConnector>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let connections = Arc::new(ConnectionManager::new(
            connector,
            config.connection_settings(),
        ));

        Arc::new(Self {
            sessions: SessionStore::new(Duration::from_secs(config.session.ttl_secs)),
            connections,
            codecs: TtlCache::new(Duration::from_secs(config.cache.codec_ttl_secs)),
            streams: StreamRegistry::new(Duration::from_secs(
                config.cache.stream_reuse_window_secs,
            )),
            config,
            shutdown_tx,
        })
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// How long the NVR gets to start a livestream and send its init segment
    pub fn livestream_timeout(&self) -> Duration {
        Duration::from_secs(self.config.protect.livestream_timeout_secs)
    }

    /// Periodically drop expired sessions until shutdown
    pub fn spawn_session_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        let mut shutdown = self.shutdown_signal();
        let every = Duration::from_secs(self.config.session.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = state.sessions.cleanup_expired();
                        if removed > 0 {
                            debug!("Swept {} expired session(s)", removed);
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}
