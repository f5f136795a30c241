//! Backend Module
//!
//! The flat key-value store the mapping is persisted in. The mapping only
//! relies on the primitives of [`Backend`]; [`MemoryBackend`] is a
//! process-local implementation with TTL support.

mod entry;
mod memory;
mod stats;

use std::time::Duration;

use thiserror::Error;

pub use entry::{current_timestamp_ms, StoredEntry};
pub use memory::MemoryBackend;
pub use stats::BackendStats;

// == Public Constants ==
/// Maximum allowed backend key length in bytes
pub const MAX_KEY_LENGTH: usize = 64 * 1024;

/// Maximum allowed value size in bytes
pub const MAX_VALUE_SIZE: usize = 512 * 1024 * 1024; // 512 MiB

/// Number of keys requested per scan page
pub const DEFAULT_SCAN_COUNT: usize = 100;

// == Backend Error ==
/// Failures reported by a backend. Propagated to callers unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused the request (key or value limits, wrong value type)
    #[error("Backend rejected request: {0}")]
    InvalidRequest(String),

    /// Transport or availability failure
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// One operation of a submitted batch failed
    #[error("Batch failed at operation {index}: {reason}")]
    BatchFailed { index: usize, reason: String },
}

/// Convenience Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

// == Key TTL ==
/// Remaining lifetime of a backend key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without expiration
    Persistent,
    /// Key exists and expires after the duration
    Expires(Duration),
}

// == Batch Operations ==
/// A mutation buffered for batch submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Overwrite `key`; `ttl = None` clears any expiration
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Write `key` only when it does not exist
    SetIfAbsent {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Remove `key`
    Delete { key: String },
    /// Change the expiration of an existing key; `None` removes it
    Expire { key: String, ttl: Option<Duration> },
}

impl BatchOp {
    /// The key this operation targets.
    pub fn key(&self) -> &str {
        match self {
            BatchOp::Set { key, .. }
            | BatchOp::SetIfAbsent { key, .. }
            | BatchOp::Delete { key }
            | BatchOp::Expire { key, .. } => key,
        }
    }
}

/// Per-operation result of a submitted batch, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReply {
    /// `Set` completed
    Stored,
    /// `SetIfAbsent` result: true when the key was written
    Inserted(bool),
    /// `Delete` result: true when the key existed
    Deleted(bool),
    /// `Expire` result: true when the key existed
    Expired(bool),
}

// == Scanning ==
/// Opaque position of an unfinished scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(pub String);

/// One page of a prefix scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Keys found on this page
    pub keys: Vec<String>,
    /// Cursor for the next page, `None` once the scan is complete
    pub next: Option<ScanCursor>,
}

// == Backend Trait ==
/// Request/response primitives of a flat key-value store.
///
/// Calls are synchronous and issued by the calling thread. Implementations
/// own their timeout and retry policy; errors are surfaced as [`BackendError`].
pub trait Backend {
    /// Reads a key.
    fn get(&self, key: &str) -> BackendResult<Option<String>>;

    /// Writes a key. `ttl = None` stores it without expiration.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> BackendResult<()>;

    /// Deletes a key, returning whether it existed.
    fn delete(&self, key: &str) -> BackendResult<bool>;

    /// Checks whether a key exists.
    fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Remaining lifetime of a key.
    fn ttl(&self, key: &str) -> BackendResult<KeyTtl>;

    /// Changes the expiration of an existing key, returning whether it existed.
    fn expire(&self, key: &str, ttl: Option<Duration>) -> BackendResult<bool>;

    /// Returns up to `count` keys starting with `prefix`, resuming at `cursor`.
    ///
    /// A scan is not a snapshot: keys written or removed while it runs may or
    /// may not be returned. Keys present for the whole scan are returned.
    fn scan(
        &self,
        prefix: &str,
        cursor: Option<&ScanCursor>,
        count: usize,
    ) -> BackendResult<ScanPage>;

    /// Applies operations in order as one request.
    fn submit_batch(&self, ops: &[BatchOp]) -> BackendResult<Vec<BatchReply>>;

    /// Increments an integer key, creating it at zero.
    fn incr(&self, key: &str) -> BackendResult<i64>;

    /// Reads several keys in one request.
    fn get_many(&self, keys: &[String]) -> BackendResult<Vec<Option<String>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Reads and removes a key.
    ///
    /// The default issues two requests; backends with an atomic primitive
    /// should override it so that two callers never both receive the value.
    fn get_del(&self, key: &str) -> BackendResult<Option<String>> {
        let value = self.get(key)?;
        if value.is_some() && !self.delete(key)? {
            return Ok(None);
        }
        Ok(value)
    }

    /// Writes `value` when `key` is absent and returns the existing value otherwise.
    ///
    /// The default issues two requests; backends with an atomic primitive
    /// should override it.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> BackendResult<Option<String>> {
        if let Some(existing) = self.get(key)? {
            return Ok(Some(existing));
        }
        self.set(key, value, ttl)?;
        Ok(None)
    }
}
