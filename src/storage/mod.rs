//! Storage Module
//!
//! The key-value store behind the command table. Command handlers only see
//! the [`Store`] trait; [`StorageEngine`] is the in-memory implementation the
//! server uses.
//!
//! ## Example
//!
//! ```
//! use pebblekv::protocol::RespValue;
//! use pebblekv::storage::{StorageEngine, Store};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(StorageEngine::new());
//!
//! engine.set(Bytes::from("name"), RespValue::bulk_string("Ariz"));
//! assert_eq!(engine.get(b"name"), Some(RespValue::bulk_string("Ariz")));
//!
//! let written = engine.mset(vec![
//!     (Bytes::from("a"), RespValue::integer(1)),
//!     (Bytes::from("b"), RespValue::integer(2)),
//! ]);
//! assert_eq!(written, 2);
//! assert_eq!(engine.flush(), 3);
//! ```

pub mod engine;

pub use engine::{StorageEngine, StorageStats};

use crate::protocol::RespValue;
use bytes::Bytes;

/// A synchronized key-value store.
///
/// Implementations must make each method atomic with respect to every other
/// method: no caller may observe a partially applied `mset` or `flush`.
pub trait Store: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &[u8]) -> Option<RespValue>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: Bytes, value: RespValue);

    /// Removes `key`. Returns whether it was present.
    fn delete(&self, key: &[u8]) -> bool;

    /// Removes every key. Returns how many were removed.
    fn flush(&self) -> usize;

    /// Looks up each key in order.
    fn mget(&self, keys: &[Bytes]) -> Vec<Option<RespValue>>;

    /// Stores every pair in one step. Returns the number of pairs written.
    fn mset(&self, pairs: Vec<(Bytes, RespValue)>) -> usize;

    /// Number of keys currently stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
