//! In-Memory Backend Module
//!
//! Ordered map storage with lazy TTL expiration. Clones share the same
//! storage, so several mappings built on clones of one backend behave like
//! several processes sharing one remote store.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{
    current_timestamp_ms, Backend, BackendError, BackendResult, BackendStats, BatchOp,
    BatchReply, KeyTtl, ScanCursor, ScanPage, StoredEntry, MAX_KEY_LENGTH, MAX_VALUE_SIZE,
};

// == Memory State ==
#[derive(Debug, Default)]
struct MemoryState {
    /// Key-value storage, ordered for cursor-based scans
    entries: BTreeMap<String, StoredEntry>,
    /// Read and expiration statistics
    stats: BackendStats,
}

impl MemoryState {
    /// Returns the entry when present and not expired, dropping it if expired.
    fn live(&mut self, key: &str) -> Option<&mut StoredEntry> {
        let expired = self.entries.get(key).map(StoredEntry::is_expired)?;
        if expired {
            self.entries.remove(key);
            self.stats.record_expired(1);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value.to_string(), ttl));
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.live(key)?;
        self.entries.remove(key).map(|entry| entry.value)
    }

    fn apply(&mut self, op: &BatchOp) -> BatchReply {
        match op {
            BatchOp::Set { key, value, ttl } => {
                self.insert(key, value, *ttl);
                BatchReply::Stored
            }
            BatchOp::SetIfAbsent { key, value, ttl } => {
                if self.live(key).is_some() {
                    BatchReply::Inserted(false)
                } else {
                    self.insert(key, value, *ttl);
                    BatchReply::Inserted(true)
                }
            }
            BatchOp::Delete { key } => BatchReply::Deleted(self.remove(key).is_some()),
            BatchOp::Expire { key, ttl } => match self.live(key) {
                Some(entry) => {
                    entry.set_ttl(*ttl);
                    BatchReply::Expired(true)
                }
                None => BatchReply::Expired(false),
            },
        }
    }
}

fn validate_key(key: &str) -> BackendResult<()> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(BackendError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

fn validate_value(value: &str) -> BackendResult<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(BackendError::InvalidRequest(format!(
            "Value exceeds maximum size of {} bytes",
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}

fn validate_op(op: &BatchOp) -> BackendResult<()> {
    validate_key(op.key())?;
    match op {
        BatchOp::Set { value, .. } | BatchOp::SetIfAbsent { value, .. } => validate_value(value),
        BatchOp::Delete { .. } | BatchOp::Expire { .. } => Ok(()),
    }
}

// == Memory Backend ==
/// Process-local [`Backend`] with TTL support.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    // == Constructor ==
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    // == Stats ==
    /// Returns current statistics.
    pub fn stats(&self) -> BackendStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_keys(state.entries.len());
        stats
    }

    // == Key Count ==
    /// Number of stored keys, including expired keys not yet swept.
    pub fn key_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = current_timestamp_ms();
        let before = state.entries.len();

        state.entries.retain(|_, entry| !entry.is_expired_at(now));

        let removed = before - state.entries.len();
        state.stats.record_expired(removed);
        removed
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let mut state = self.state.lock();
        let value = state.live(key).map(|entry| entry.value.clone());
        match value {
            Some(_) => state.stats.record_hit(),
            None => state.stats.record_miss(),
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> BackendResult<()> {
        validate_key(key)?;
        validate_value(value)?;
        self.state.lock().insert(key, value, ttl);
        Ok(())
    }

    fn delete(&self, key: &str) -> BackendResult<bool> {
        Ok(self.state.lock().remove(key).is_some())
    }

    fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.state.lock().live(key).is_some())
    }

    fn ttl(&self, key: &str) -> BackendResult<KeyTtl> {
        let mut state = self.state.lock();
        Ok(match state.live(key) {
            None => KeyTtl::Missing,
            Some(entry) => match entry.ttl_remaining() {
                None => KeyTtl::Persistent,
                Some(remaining) => KeyTtl::Expires(remaining),
            },
        })
    }

    fn expire(&self, key: &str, ttl: Option<Duration>) -> BackendResult<bool> {
        let mut state = self.state.lock();
        Ok(match state.live(key) {
            Some(entry) => {
                entry.set_ttl(ttl);
                true
            }
            None => false,
        })
    }

    fn scan(
        &self,
        prefix: &str,
        cursor: Option<&ScanCursor>,
        count: usize,
    ) -> BackendResult<ScanPage> {
        let count = count.max(1);
        let state = self.state.lock();
        let now = current_timestamp_ms();

        let start = match cursor {
            Some(ScanCursor(last)) => Bound::Excluded(last.clone()),
            None => Bound::Included(prefix.to_string()),
        };

        // Take one extra key to learn whether another page exists
        let mut keys: Vec<String> = state
            .entries
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .take(count + 1)
            .collect();

        let next = if keys.len() > count {
            keys.truncate(count);
            keys.last().cloned().map(ScanCursor)
        } else {
            None
        };

        Ok(ScanPage { keys, next })
    }

    fn submit_batch(&self, ops: &[BatchOp]) -> BackendResult<Vec<BatchReply>> {
        // Reject the whole batch before applying anything
        for (index, op) in ops.iter().enumerate() {
            validate_op(op).map_err(|err| BackendError::BatchFailed {
                index,
                reason: err.to_string(),
            })?;
        }

        let mut state = self.state.lock();
        let replies: Vec<BatchReply> = ops.iter().map(|op| state.apply(op)).collect();
        debug!("Applied batch of {} operations", replies.len());
        Ok(replies)
    }

    fn incr(&self, key: &str) -> BackendResult<i64> {
        validate_key(key)?;
        let mut state = self.state.lock();
        match state.live(key) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    BackendError::InvalidRequest(format!("Value at '{}' is not an integer", key))
                })?;
                let next = current.checked_add(1).ok_or_else(|| {
                    BackendError::InvalidRequest(format!("Increment of '{}' overflows", key))
                })?;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                state.insert(key, "1", None);
                Ok(1)
            }
        }
    }

    fn get_many(&self, keys: &[String]) -> BackendResult<Vec<Option<String>>> {
        let mut state = self.state.lock();
        Ok(keys
            .iter()
            .map(|key| state.live(key).map(|entry| entry.value.clone()))
            .collect())
    }

    fn get_del(&self, key: &str) -> BackendResult<Option<String>> {
        Ok(self.state.lock().remove(key))
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> BackendResult<Option<String>> {
        validate_key(key)?;
        validate_value(value)?;
        let mut state = self.state.lock();
        if let Some(entry) = state.live(key) {
            return Ok(Some(entry.value.clone()));
        }
        state.insert(key, value, ttl);
        Ok(None)
    }
}
