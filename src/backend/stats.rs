//! Backend Statistics Module
//!
//! Tracks read hits, misses and expirations of the in-memory backend.

use serde::Serialize;

// == Backend Stats ==
/// Tracks in-memory backend activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStats {
    /// Number of reads that found a live key
    pub hits: u64,
    /// Number of reads that found nothing (absent or expired)
    pub misses: u64,
    /// Number of entries removed because their TTL elapsed
    pub expired: u64,
    /// Current number of stored keys
    pub total_keys: usize,
}

impl BackendStats {
    // == Constructor ==
    /// Creates a new BackendStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// Adds `count` expired removals.
    pub fn record_expired(&mut self, count: usize) {
        self.expired += count as u64;
    }

    pub fn set_total_keys(&mut self, count: usize) {
        self.total_keys = count;
    }
}
