use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::protect::{Livestream, ProtectError};

type StreamCell = Arc<OnceCell<Arc<dyn Livestream>>>;

struct ActiveStream {
    id: u64,
    stream: StreamCell,
    created_at: Instant,
    request_count: u64,
    viewers: usize,
}

/// Result of [`StreamRegistry::get_or_create`]
pub struct StreamLease {
    pub handle: Arc<dyn Livestream>,
    /// Requests served by this entry, including this one
    pub request_count: u64,
    /// Whether an existing entry was reused
    pub reused: bool,
}

/// One livestream per camera, shared by requests that arrive within the
/// reuse window.
///
/// Entries are registered before their livestream is created, so
/// concurrent callers share a single creation.
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, ActiveStream>>,
    reuse_window: Duration,
    next_id: AtomicU64,
}

impl StreamRegistry {
    pub fn new(reuse_window: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            reuse_window,
            next_id: AtomicU64::new(1),
        }
    }

    /// Reuse the camera's entry while it is younger than the reuse window,
    /// otherwise replace it with a stream built by `factory`.
    ///
    /// A replaced entry is stopped in the background. A caller that fails
    /// or is dropped before its lease exists gives its viewer slot back,
    /// and the entry is evicted when no viewer is left.
    pub async fn get_or_create<F, Fut>(
        &self,
        camera_id: &str,
        factory: F,
    ) -> Result<StreamLease, ProtectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Livestream>, ProtectError>>,
    {
        let (id, cell, request_count, reused, replaced) = {
            let mut streams = self.streams.lock();
            match streams.get_mut(camera_id) {
                Some(entry) if entry.created_at.elapsed() < self.reuse_window => {
                    entry.request_count += 1;
                    entry.viewers += 1;
                    (entry.id, entry.stream.clone(), entry.request_count, true, None)
                }
                _ => {
                    let entry = ActiveStream {
                        id: self.next_id.fetch_add(1, Ordering::Relaxed),
                        stream: Arc::new(OnceCell::new()),
                        created_at: Instant::now(),
                        request_count: 1,
                        viewers: 1,
                    };
                    let lease = (entry.id, entry.stream.clone(), 1, false);
                    let replaced = streams.insert(camera_id.to_string(), entry);
                    (lease.0, lease.1, lease.2, lease.3, replaced)
                }
            }
        };

        if let Some(stale) = replaced {
            debug!(camera_id = %camera_id, "Replacing expired stream entry");
            stop_in_background(&stale.stream);
        }

        // Held until the lease exists so a dropped caller gives its slot back
        let pending = PendingViewer {
            registry: self,
            camera_id,
            id,
            armed: true,
        };

        // A failure returns here with the guard still armed
        let handle = cell.get_or_try_init(factory).await?.clone();
        pending.disarm();

        if reused {
            debug!(
                camera_id = %camera_id,
                request_count = request_count,
                "Reusing active stream"
            );
        } else {
            info!(camera_id = %camera_id, "Stream started");
        }
        Ok(StreamLease {
            handle,
            request_count,
            reused,
        })
    }

    /// Drop one not-yet-leased viewer of entry `id`, evicting the entry
    /// once nobody is left
    fn abandon(&self, camera_id: &str, id: u64) {
        let mut streams = self.streams.lock();
        let Some(entry) = streams.get_mut(camera_id).filter(|entry| entry.id == id) else {
            return;
        };

        entry.viewers = entry.viewers.saturating_sub(1);
        if entry.viewers > 0 {
            return;
        }

        if let Some(entry) = streams.remove(camera_id) {
            drop(streams);
            debug!(camera_id = %camera_id, "Stream request abandoned, entry evicted");
            stop_in_background(&entry.stream);
        }
    }

    /// Stop and evict the camera's stream
    pub async fn remove(&self, camera_id: &str) {
        let removed = self.streams.lock().remove(camera_id);
        if let Some(handle) = removed.and_then(|entry| entry.stream.get().cloned()) {
            handle.stop().await;
            info!(camera_id = %camera_id, "Stream removed");
        }
    }

    /// Give back a lease when its viewer goes away.
    ///
    /// The entry is evicted and its stream stopped once its last viewer
    /// leaves. A handle that no longer backs the entry is stopped directly.
    pub fn release(&self, camera_id: &str, handle: &Arc<dyn Livestream>) {
        let mut streams = self.streams.lock();
        let current = streams.get_mut(camera_id).filter(|entry| {
            entry
                .stream
                .get()
                .map_or(false, |held| same_stream(held, handle))
        });

        match current {
            Some(entry) => {
                entry.viewers = entry.viewers.saturating_sub(1);
                if entry.viewers > 0 {
                    debug!(
                        camera_id = %camera_id,
                        viewers = entry.viewers,
                        "Viewer left shared stream"
                    );
                    return;
                }
                streams.remove(camera_id);
                info!(camera_id = %camera_id, "Last viewer left, stopping stream");
            }
            None => debug!(camera_id = %camera_id, "Releasing detached stream"),
        }
        drop(streams);

        let handle = handle.clone();
        tokio::spawn(async move {
            handle.stop().await;
        });
    }

    /// Stop every stream
    pub async fn stop_all(&self) {
        let drained: Vec<ActiveStream> = self
            .streams
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        let handles: Vec<Arc<dyn Livestream>> = drained
            .iter()
            .filter_map(|entry| entry.stream.get().cloned())
            .collect();
        let count = handles.len();
        futures::future::join_all(handles.iter().map(|handle| handle.stop())).await;

        if count > 0 {
            info!("Stopped {} stream(s)", count);
        }
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A viewer slot taken by `get_or_create` that has no lease yet
struct PendingViewer<'a> {
    registry: &'a StreamRegistry,
    camera_id: &'a str,
    id: u64,
    armed: bool,
}

impl PendingViewer<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingViewer<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abandon(self.camera_id, self.id);
        }
    }
}

fn same_stream(a: &Arc<dyn Livestream>, b: &Arc<dyn Livestream>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn stop_in_background(cell: &StreamCell) {
    if let Some(handle) = cell.get().cloned() {
        tokio::spawn(async move {
            handle.stop().await;
        });
    }
}
