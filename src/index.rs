//! In-memory mirror of the last-known state of one resource kind
//!
//! Each index has a single writer (the event loop for its kind) and is read
//! concurrently by the other kind's loop during correlation. Snapshots are
//! stored behind `Arc`, so a reader always gets a complete snapshot: either
//! the one before a `put` or the one after it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{EndpointSet, Keyed, ObjectKey, ServiceDescriptor};

/// Keyed snapshot store for one resource kind
#[derive(Debug)]
pub struct LocalIndex<T> {
    entries: RwLock<HashMap<ObjectKey, Arc<T>>>,
}

/// Index of Service snapshots
pub type ServiceIndex = LocalIndex<ServiceDescriptor>;

/// Index of Endpoints snapshots
pub type EndpointsIndex = LocalIndex<EndpointSet>;

impl<T> Default for LocalIndex<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> LocalIndex<T> {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` under `key`, replacing any previous snapshot
    pub fn put(&self, key: ObjectKey, snapshot: T) {
        self.entries.write().insert(key, Arc::new(snapshot));
    }

    /// Remove the snapshot under `key`, returning it if present
    pub fn delete(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.entries.write().remove(key)
    }

    /// Get the current snapshot under `key`
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: Keyed> LocalIndex<T> {
    /// Store a snapshot under its own key
    pub fn upsert(&self, snapshot: T) {
        self.put(snapshot.key(), snapshot);
    }
}
