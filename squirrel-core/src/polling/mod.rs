//! Background change detection for watched source paths.
//!
//! A [`PollingScheduler`] periodically queries the last-changed timestamp of
//! every watched path and notifies the listeners registered for the paths
//! whose timestamp moved. It drives cache invalidation: heaps listen for
//! changes, and cache engines listen to heaps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::core::Result;
use crate::nut::Heap;
use crate::pool::WorkerPool;
use crate::source::ResourceSource;

/// Receives change notifications for watched paths.
pub trait ChangeListener: Send + Sync {
    /// Exclusion vote: whether this listener still wants the path polled.
    /// A listener excluding itself never blocks notification of the others.
    fn keep_polling(&self, path: &str) -> bool {
        let _ = path;
        true
    }

    /// Called when the watched path's timestamp moved, with the new value.
    fn resource_updated(&self, path: &str, timestamp: i64);
}

/// Bridges a polled source path to a heap's "updated" signal.
pub struct HeapUpdateNotifier {
    heap: Weak<Heap>,
}

impl HeapUpdateNotifier {
    /// Creates a notifier forwarding updates to the given heap.
    pub fn new(heap: &Arc<Heap>) -> Self {
        Self {
            heap: Arc::downgrade(heap),
        }
    }
}

impl ChangeListener for HeapUpdateNotifier {
    fn keep_polling(&self, _path: &str) -> bool {
        // A dropped heap votes itself out of the poll loop.
        self.heap.strong_count() > 0
    }

    fn resource_updated(&self, path: &str, _timestamp: i64) {
        if let Some(heap) = self.heap.upgrade() {
            tracing::debug!(heap = heap.id(), path, "watched path changed");
            heap.notify_updated();
        }
    }
}

struct Watched {
    last_update: i64,
    listeners: Vec<Arc<dyn ChangeListener>>,
}

/// Polls the timestamps of watched paths on a recurring schedule.
pub struct PollingScheduler {
    source: Arc<dyn ResourceSource>,
    pool: WorkerPool,
    watched: Arc<Mutex<HashMap<String, Watched>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    interval_secs: AtomicU64,
    // Handle to self for the recurring driver task; weak so an abandoned
    // scheduler stops polling instead of keeping itself alive.
    self_handle: Weak<PollingScheduler>,
}

impl PollingScheduler {
    /// Creates a scheduler polling the given source. No recurring task runs
    /// until [`PollingScheduler::set_interval`] is called.
    pub fn new(source: Arc<dyn ResourceSource>, pool: WorkerPool) -> Arc<Self> {
        Arc::new_cyclic(|handle| Self {
            source,
            pool,
            watched: Arc::new(Mutex::new(HashMap::new())),
            driver: Mutex::new(None),
            interval_secs: AtomicU64::new(0),
            self_handle: handle.clone(),
        })
    }

    /// Adds listeners for a path, creating the tracked entry (seeded with
    /// the source's current timestamp) on first observation.
    pub async fn observe(
        &self,
        path: &str,
        listeners: Vec<Arc<dyn ChangeListener>>,
    ) -> Result<()> {
        let known = self.watched.lock().contains_key(path);
        let seed = if known {
            None
        } else {
            Some(self.source.last_changed(path).await?)
        };

        let mut watched = self.watched.lock();
        let entry = watched.entry(path.to_string()).or_insert_with(|| Watched {
            // A concurrent observer may have seeded the entry in between;
            // in that case `seed` is simply discarded.
            last_update: seed.unwrap_or_default(),
            listeners: Vec::new(),
        });
        for listener in listeners {
            if !entry
                .listeners
                .iter()
                .any(|known| Arc::ptr_eq(known, &listener))
            {
                entry.listeners.push(listener);
            }
        }
        Ok(())
    }

    /// Currently configured interval in seconds (0 when polling is off).
    pub fn interval(&self) -> u64 {
        self.interval_secs.load(Ordering::Relaxed)
    }

    /// Cancels any existing recurring task and, if `seconds > 0`, schedules
    /// a new one. An in-flight poll is never interrupted: each tick runs as
    /// its own job, independent of the recurring driver.
    pub fn set_interval(&self, seconds: u64) {
        self.set_interval_duration(Duration::from_secs(seconds));
        self.interval_secs.store(seconds, Ordering::Relaxed);
    }

    fn set_interval_duration(&self, every: Duration) {
        let mut driver = self.driver.lock();
        if let Some(task) = driver.take() {
            tracing::info!(source = %self.source.id(), "cancelling recurring polling");
            task.abort();
        }

        if every.is_zero() {
            return;
        }

        tracing::info!(
            source = %self.source.id(),
            every_secs = every.as_secs_f64(),
            "starting recurring polling"
        );
        let weak = self.self_handle.clone();
        *driver = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                let pool = scheduler.pool.clone();
                pool.spawn(async move { scheduler.poll_once().await });
            }
        }));
    }

    /// Runs one poll over every watched path.
    ///
    /// Timestamp query failures are logged and skipped; a broken source must
    /// not kill the recurring schedule.
    pub async fn poll_once(&self) {
        let snapshot: Vec<(String, i64, Vec<Arc<dyn ChangeListener>>)> = self
            .watched
            .lock()
            .iter()
            .map(|(path, watched)| {
                (
                    path.clone(),
                    watched.last_update,
                    watched.listeners.clone(),
                )
            })
            .collect();

        for (path, last_update, listeners) in snapshot {
            let interested: Vec<_> = listeners
                .into_iter()
                .filter(|l| l.keep_polling(&path))
                .collect();
            if interested.is_empty() {
                continue;
            }

            let timestamp = match self.source.last_changed(&path).await {
                Ok(timestamp) => timestamp,
                Err(error) => {
                    tracing::warn!(path = %path, %error, "timestamp poll failed");
                    continue;
                },
            };

            if timestamp != last_update {
                if let Some(watched) = self.watched.lock().get_mut(&path) {
                    watched.last_update = timestamp;
                }
                tracing::info!(path = %path, timestamp, "change detected");
                for listener in interested {
                    listener.resource_updated(&path, timestamp);
                }
            }
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.driver.lock().take() {
            task.abort();
        }
    }
}
