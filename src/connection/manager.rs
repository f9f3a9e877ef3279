use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ConnectionSettings, Credentials};
use crate::cache::TtlCache;
use crate::protect::{
    host_from_base_url, Bootstrap, ConnectOptions, ProtectApi, ProtectConnector, ProtectError,
    ProtectEvent,
};
use crate::utils::{race_with_timeout, with_timeout};

type LoginResult = Result<Arc<dyn ProtectApi>, ProtectError>;
type PendingLogin = Shared<BoxFuture<'static, LoginResult>>;

struct CachedConnection {
    api: Arc<dyn ProtectApi>,
    last_health_check: Instant,
    is_healthy: bool,
}

/// Cache of authenticated NVR clients keyed by `baseUrl:username`.
///
/// At most one login per key is in flight; concurrent callers await the
/// same attempt and observe the same outcome. Failures are never cached.
///
/// Lock order: `connections` before `logins`. Neither is held across an
/// await.
pub struct ConnectionManager {
    connector: Arc<dyn ProtectConnector>,
    settings: ConnectionSettings,
    connections: Mutex<HashMap<String, CachedConnection>>,
    logins: Mutex<HashMap<String, PendingLogin>>,
    bootstraps: TtlCache<String, Arc<Bootstrap>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn ProtectConnector>, settings: ConnectionSettings) -> Self {
        let bootstraps = TtlCache::new(settings.bootstrap_ttl);
        Self {
            connector,
            settings,
            connections: Mutex::new(HashMap::new()),
            logins: Mutex::new(HashMap::new()),
            bootstraps,
        }
    }

    /// Return a healthy cached client or log in, sharing any login already
    /// in flight for the same key
    pub async fn get_connection(self: &Arc<Self>, creds: &Credentials) -> LoginResult {
        let key = creds.key();

        let pending = {
            let mut connections = self.connections.lock();
            if let Some(entry) = connections.get_mut(&key) {
                if self.check_health(entry) {
                    debug!(key = %key, "Reusing cached connection");
                    return Ok(entry.api.clone());
                }
                warn!(key = %key, "Cached connection failed health check");
                if let Some(stale) = connections.remove(&key) {
                    dispose(stale.api);
                }
                self.bootstraps.remove(&key);
            }

            let mut logins = self.logins.lock();
            match logins.get(&key) {
                Some(pending) => {
                    debug!(key = %key, "Waiting for in-flight login");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_login(key.clone(), creds.clone());
                    logins.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Evict and log out the client for `creds`
    pub fn invalidate(&self, creds: &Credentials) {
        let key = creds.key();
        let removed = self.connections.lock().remove(&key);
        self.bootstraps.remove(&key);
        if let Some(entry) = removed {
            info!(key = %key, "Connection invalidated");
            dispose(entry.api);
        }
    }

    /// Bootstrap snapshot for `creds`, served from cache while fresh.
    ///
    /// A refresh failure invalidates the connection so the next call logs in
    /// again. An NVR that answers without a snapshot yields an empty one,
    /// which is not cached.
    pub async fn bootstrap(
        self: &Arc<Self>,
        creds: &Credentials,
    ) -> Result<Arc<Bootstrap>, ProtectError> {
        let api = self.get_connection(creds).await?;
        let key = creds.key();

        if let Some(cached) = self.bootstraps.get(&key) {
            debug!(key = %key, "Bootstrap cache hit");
            return Ok(cached);
        }

        let fetched = with_timeout(
            "bootstrap",
            self.settings.bootstrap_timeout,
            api.get_bootstrap(),
        )
        .await;

        match fetched {
            Ok(true) => match api.bootstrap() {
                Some(snapshot) => {
                    self.bootstraps.put(key, snapshot.clone());
                    Ok(snapshot)
                }
                None => Ok(Arc::new(Bootstrap::default())),
            },
            Ok(false) => {
                warn!(key = %key, "NVR returned no bootstrap, serving an empty device list");
                Ok(Arc::new(Bootstrap::default()))
            }
            Err(e) => {
                warn!(key = %key, "Bootstrap refresh failed: {}", e);
                self.invalidate(creds);
                Err(e)
            }
        }
    }

    /// Log out every cached client
    pub async fn dispose_all(&self) {
        let drained: Vec<(String, CachedConnection)> =
            self.connections.lock().drain().collect();
        self.bootstraps.clear();

        let count = drained.len();
        futures::future::join_all(drained.into_iter().map(|(key, entry)| async move {
            debug!(key = %key, "Logging out");
            entry.api.logout().await;
        }))
        .await;

        if count > 0 {
            info!("Disposed {} NVR connection(s)", count);
        }
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached bootstrap snapshots
    pub fn bootstrap_cache_len(&self) -> usize {
        self.bootstraps.len()
    }

    /// Reuse the previous verdict inside the health interval, otherwise
    /// re-check that the client still holds a snapshot
    fn check_health(&self, entry: &mut CachedConnection) -> bool {
        if entry.last_health_check.elapsed() < self.settings.health_check_interval {
            return entry.is_healthy;
        }
        entry.is_healthy = entry.api.bootstrap().is_some();
        entry.last_health_check = Instant::now();
        entry.is_healthy
    }

    /// Run the login as a detached task so it finishes and clears its
    /// marker even when every waiter goes away
    fn spawn_login(self: &Arc<Self>, key: String, creds: Credentials) -> PendingLogin {
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let result = manager.connect(&key, &creds).await;

            let mut connections = manager.connections.lock();
            if let Ok(api) = &result {
                connections.insert(
                    key.clone(),
                    CachedConnection {
                        api: api.clone(),
                        last_health_check: Instant::now(),
                        is_healthy: true,
                    },
                );
            }
            manager.logins.lock().remove(&key);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ProtectError::LoginFailed(format!("login task aborted: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    async fn connect(&self, key: &str, creds: &Credentials) -> LoginResult {
        info!(key = %key, "Creating new NVR connection");
        let api = self.connector.connect(&ConnectOptions {
            allow_self_signed: creds.allow_self_signed,
            request_timeout: self.settings.request_timeout,
        })?;

        // Subscribe before logging in so the outcome event cannot be missed
        let events = api.subscribe();
        let logged_in = race_with_timeout(
            "login",
            api.login(
                host_from_base_url(&creds.base_url),
                &creds.username,
                &creds.password,
            ),
            next_login_event(events),
            self.settings.login_timeout,
            self.settings.login_event_grace,
        )
        .await;

        match logged_in {
            Ok(true) => {}
            Ok(false) => {
                warn!(key = %key, "NVR rejected the credentials");
                return Err(ProtectError::LoginFailed(
                    "NVR rejected the credentials".to_string(),
                ));
            }
            Err(e) => {
                warn!(key = %key, "Login failed: {}", e);
                return Err(e);
            }
        }

        let fetched = with_timeout(
            "bootstrap",
            self.settings.bootstrap_timeout,
            api.get_bootstrap(),
        )
        .await;
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(key = %key, "Initial bootstrap failed: {}", e);
                dispose(api);
                return Err(e);
            }
        };

        tokio::time::sleep(self.settings.settle_delay).await;

        match api.bootstrap() {
            Some(snapshot) if fetched => {
                info!(
                    key = %key,
                    cameras = snapshot.cameras().len(),
                    "Connected to NVR"
                );
                self.bootstraps.put(key.to_string(), snapshot);
            }
            _ => warn!(key = %key, "Connected to NVR without a bootstrap snapshot"),
        }

        Ok(api)
    }
}

/// First `Login` event on the client's channel, or `None` once it closes
async fn next_login_event(mut events: broadcast::Receiver<ProtectEvent>) -> Option<bool> {
    loop {
        match events.recv().await {
            Ok(ProtectEvent::Login(ok)) => return Some(ok),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Best-effort logout in the background
fn dispose(api: Arc<dyn ProtectApi>) {
    tokio::spawn(async move {
        api.logout().await;
    });
}
