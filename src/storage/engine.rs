//! Thread-Safe Storage Engine
//!
//! The in-memory [`Store`] implementation shared by every connection.
//!
//! ## Design Decisions
//!
//! 1. **One lock**: a single `RwLock` guards the whole map. Every `Store`
//!    method takes it exactly once, so a multi-key write (MSET) or a FLUSH
//!    is never observed half-applied by another connection.
//! 2. **Values as sent**: the stored value is the wire value the client
//!    supplied, and GET hands back that same variant.
//! 3. **No bound, no expiry**: the map grows until keys are deleted or flushed.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                StorageEngine                 │
//! │   RwLock<HashMap<Bytes, RespValue>>          │
//! │   readers: GET, MGET, len                    │
//! │   writers: SET, MSET, DELETE, FLUSH          │
//! └──────────────────────────────────────────────┘
//! ```

use crate::protocol::RespValue;
use crate::storage::Store;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The main storage engine for pebblekv.
///
/// Designed to be wrapped in an `Arc` and shared across all connection
/// tasks.
///
/// # Example
///
/// ```
/// use pebblekv::protocol::RespValue;
/// use pebblekv::storage::{StorageEngine, Store};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), RespValue::bulk_string("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(RespValue::bulk_string("Ariz")));
/// ```
pub struct StorageEngine {
    data: RwLock<HashMap<Bytes, RespValue>>,

    /// Statistics: total key lookups
    get_count: AtomicU64,

    /// Statistics: total key writes
    set_count: AtomicU64,

    /// Statistics: total keys removed by DELETE
    del_count: AtomicU64,
}

/// A snapshot of storage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    // No mutation below can panic part way, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, RespValue>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, RespValue>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns current statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
        }
    }
}

impl Store for StorageEngine {
    fn get(&self, key: &[u8]) -> Option<RespValue> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.read().get(key).cloned()
    }

    fn set(&self, key: Bytes, value: RespValue) {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.write().insert(key, value);
    }

    fn delete(&self, key: &[u8]) -> bool {
        let removed = self.write().remove(key).is_some();
        if removed {
            self.del_count.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    fn flush(&self) -> usize {
        let mut data = self.write();
        let count = data.len();
        data.clear();
        count
    }

    fn mget(&self, keys: &[Bytes]) -> Vec<Option<RespValue>> {
        self.get_count
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        let data = self.read();
        keys.iter().map(|key| data.get(key).cloned()).collect()
    }

    fn mset(&self, pairs: Vec<(Bytes, RespValue)>) -> usize {
        let count = pairs.len();
        self.set_count.fetch_add(count as u64, Ordering::Relaxed);

        let mut data = self.write();
        for (key, value) in pairs {
            data.insert(key, value);
        }
        count
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}
