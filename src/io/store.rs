//! Shared store abstraction
//!
//! A realtime key-value store reachable by every device, organised as
//! collections of JSON documents:
//!
//! ```text
//! geofences/{regionId} -> { Latitude, Longitude, Description }
//! locations/{deviceId} -> { latitude, longitude, updated_at }
//! ```
//!
//! Subscribers always receive the full current snapshot of a collection,
//! never per-key deltas.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

/// Collection holding geofence definitions
pub const GEOFENCES: &str = "geofences";

/// Collection holding the latest location of every device
pub const LOCATIONS: &str = "locations";

/// Full contents of one collection, keyed by child key
pub type Snapshot = BTreeMap<String, Value>;

/// Logical path of a key, used in logs and errors
pub fn store_path(collection: &str, key: &str) -> String {
    format!("{collection}/{key}")
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store disconnected")]
    Disconnected,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Client handle to the shared store
///
/// Constructed once by the composition root and passed to every service that
/// needs it.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// One-shot read of every child of `collection`
    async fn read_collection(&self, collection: &str) -> Result<Snapshot, StoreError>;

    /// Read a single key
    async fn read(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value` under `collection/key`, replacing any previous value
    async fn write(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError>;

    /// Delete `collection/key`
    async fn remove(&self, collection: &str, key: &str) -> Result<(), StoreError>;

    /// Subscribe to continuous full-snapshot notifications on `collection`
    async fn subscribe(&self, collection: &str) -> Result<StoreSubscription, StoreError>;
}

/// Live subscription to one collection
///
/// The first `next()` yields the snapshot current at subscribe time; each
/// later call waits for a change. Must be released with `unsubscribe()` when
/// the owner is torn down.
pub struct StoreSubscription {
    collection: String,
    rx: watch::Receiver<Snapshot>,
    primed: bool,
}

impl StoreSubscription {
    pub(crate) fn new(collection: &str, rx: watch::Receiver<Snapshot>) -> Self {
        debug!(collection = %collection, "store_subscribed");
        Self { collection: collection.to_string(), rx, primed: true }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Wait for the next full snapshot; `None` once the store has gone away
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.primed {
            self.primed = false;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Detach from the store
    pub fn unsubscribe(self) {
        debug!(collection = %self.collection, "store_unsubscribed");
    }
}

/// Per-collection snapshot channels shared by the store implementations
#[derive(Default)]
pub(crate) struct Mirror {
    collections: Mutex<HashMap<String, watch::Sender<Snapshot>>>,
}

impl Mirror {
    pub(crate) fn snapshot(&self, collection: &str) -> Snapshot {
        self.collections.lock().get(collection).map(|tx| tx.borrow().clone()).unwrap_or_default()
    }

    pub(crate) fn get(&self, collection: &str, key: &str) -> Option<Value> {
        self.collections.lock().get(collection).and_then(|tx| tx.borrow().get(key).cloned())
    }

    pub(crate) fn put(&self, collection: &str, key: &str, value: Value) {
        let mut collections = self.collections.lock();
        let tx = collections
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(Snapshot::new()).0);
        tx.send_modify(|snapshot| {
            snapshot.insert(key.to_string(), value);
        });
    }

    pub(crate) fn delete(&self, collection: &str, key: &str) {
        if let Some(tx) = self.collections.lock().get(collection) {
            tx.send_if_modified(|snapshot| snapshot.remove(key).is_some());
        }
    }

    pub(crate) fn subscribe(&self, collection: &str) -> StoreSubscription {
        let mut collections = self.collections.lock();
        let tx = collections
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(Snapshot::new()).0);
        StoreSubscription::new(collection, tx.subscribe())
    }

    /// Number of live subscriptions on a collection
    pub(crate) fn subscriber_count(&self, collection: &str) -> usize {
        self.collections.lock().get(collection).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

/// In-process store for tests and single-host runs
#[derive(Default)]
pub struct MemoryStore {
    mirror: Mirror,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of live subscriptions on `collection`
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.mirror.subscriber_count(collection)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn read_collection(&self, collection: &str) -> Result<Snapshot, StoreError> {
        self.check()?;
        Ok(self.mirror.snapshot(collection))
    }

    async fn read(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.check()?;
        Ok(self.mirror.get(collection, key))
    }

    async fn write(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.mirror.put(collection, key, value);
        Ok(())
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.mirror.delete(collection, key);
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<StoreSubscription, StoreError> {
        self.check()?;
        Ok(self.mirror.subscribe(collection))
    }
}
