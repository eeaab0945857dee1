//! Running subscriptions of one connection, keyed by client id.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A running subscription: the token that stops it and the task pumping its
/// results to the client.
#[derive(Debug)]
pub struct SubscriptionHandle {
    generation: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Ask the pump to finish. It sends `complete` on its way out.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for the pump to send its last frame and exit.
    pub async fn finish(self) -> Result<(), JoinError> {
        self.task.await
    }

    /// Abort the pump and wait until it is gone. Nothing more is sent for this
    /// subscription once this returns.
    pub async fn dispose(self) -> Result<(), JoinError> {
        self.token.cancel();
        self.task.abort();
        match self.task.await {
            Err(e) if e.is_cancelled() => Ok(()),
            other => other,
        }
    }
}

/// Subscriptions of one connection.
///
/// Each registration gets a generation number, so a pump that finishes late
/// can only remove its own entry and never the one that replaced it.
///
/// A stopped subscription moves to a stopping slot and stays there until its
/// pump has sent `complete`. [`release`](Self::release) waits for that slot,
/// so a new subscription under the same id never writes before the old one's
/// last frame.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, SubscriptionHandle>>,
    stopping: Mutex<HashMap<String, SubscriptionHandle>>,
    next_generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription under `id`.
    ///
    /// `spawn` receives the generation of the new entry and starts the pump.
    /// It runs while the registry is locked, so the pump can never look itself
    /// up before it is registered. Returns the entry previously stored under
    /// the same id, which the caller should dispose.
    pub fn register<F>(
        &self,
        id: &str,
        token: CancellationToken,
        spawn: F,
    ) -> Option<SubscriptionHandle>
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        let task = spawn(generation);
        entries.insert(
            id.to_string(),
            SubscriptionHandle {
                generation,
                token,
                task,
            },
        )
    }

    /// Remove the running entry under `id`, whatever its generation.
    pub fn unregister(&self, id: &str) -> Option<SubscriptionHandle> {
        self.entries.lock().remove(id)
    }

    /// Remove the entry under `id`, running or stopping, only if it is still
    /// the given generation.
    pub fn unregister_generation(&self, id: &str, generation: u64) -> bool {
        remove_generation(&self.entries, id, generation)
            || remove_generation(&self.stopping, id, generation)
    }

    /// Stop the subscription under `id`. Unknown ids are ignored.
    pub fn stop(&self, id: &str) -> bool {
        let Some(handle) = self.unregister(id) else {
            debug!(id, "Stop for unknown subscription ignored");
            return false;
        };

        debug!(id, "Stopping subscription");
        handle.stop();
        if let Some(stale) = self.stopping.lock().insert(id.to_string(), handle) {
            stale.task.abort();
        }
        true
    }

    /// Make `id` free for a new subscription.
    ///
    /// A running subscription is disposed without `complete`. A stopping one
    /// is awaited until its pump has sent its last frame.
    pub async fn release(&self, id: &str) {
        if let Some(previous) = self.unregister(id) {
            debug!(id, "Disposing replaced subscription");
            if let Err(e) = previous.dispose().await {
                warn!(id, error = %e, "Replaced subscription failed during disposal");
            }
        }

        let stopping = self.stopping.lock().remove(id);
        if let Some(stopping) = stopping {
            debug!(id, "Waiting for stopped subscription");
            if let Err(e) = stopping.finish().await {
                warn!(id, error = %e, "Stopped subscription failed");
            }
        }
    }

    /// Whether a subscription is running under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Whether a stopped subscription under `id` has not yet sent its last frame.
    pub fn is_stopping(&self, id: &str) -> bool {
        self.stopping.lock().contains_key(id)
    }

    /// Number of subscriptions, running or stopping.
    pub fn len(&self) -> usize {
        self.entries.lock().len() + self.stopping.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose of every subscription, running or stopping, and wait for all
    /// pumps to be gone.
    ///
    /// A pump that panicked is logged and does not prevent the others from
    /// being disposed. Returns how many subscriptions were disposed.
    pub async fn dispose_all(&self) -> usize {
        let mut handles: Vec<(String, SubscriptionHandle)> = self.entries.lock().drain().collect();
        handles.extend(self.stopping.lock().drain());
        let count = handles.len();

        for (id, handle) in handles {
            if let Err(e) = handle.dispose().await {
                warn!(id = %id, error = %e, "Subscription task failed during disposal");
            }
        }

        count
    }
}

fn remove_generation(
    entries: &Mutex<HashMap<String, SubscriptionHandle>>,
    id: &str,
    generation: u64,
) -> bool {
    let mut entries = entries.lock();
    match entries.get(id) {
        Some(handle) if handle.generation == generation => {
            entries.remove(id);
            true
        }
        _ => false,
    }
}
