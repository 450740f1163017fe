//! Per-key ledger of retained hit timestamps.

use std::collections::VecDeque;

/// An ascending sequence of hit timestamps for a single key.
///
/// Duplicates are allowed and kept in arrival order. Both insertion
/// disciplines keep the sequence sorted, so eviction is always a prefix
/// drain.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    /// Retained hits, oldest first
    hits: VecDeque<i64>,
    /// Greatest reference timestamp observed for this key
    watermark: Option<i64>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every hit `t` with `t <= reference - window_seconds`.
    ///
    /// A hit exactly `window_seconds` old is expired. Returns the number of
    /// hits removed.
    pub fn evict(&mut self, reference: i64, window_seconds: i64) -> usize {
        let cutoff = reference.saturating_sub(window_seconds);
        let stale = self.hits.partition_point(|&t| t <= cutoff);
        self.hits.drain(..stale);
        stale
    }

    /// Append a hit that is not older than the newest one.
    ///
    /// Returns `false` if `timestamp` was older than the newest hit; the
    /// hit is then placed by binary search so the ledger stays sorted.
    pub fn insert_monotonic(&mut self, timestamp: i64) -> bool {
        match self.hits.back() {
            Some(&newest) if timestamp < newest => {
                self.insert_ordered(timestamp);
                false
            }
            _ => {
                self.hits.push_back(timestamp);
                true
            }
        }
    }

    /// Insert a hit at its sorted position, after any equal timestamps.
    pub fn insert_ordered(&mut self, timestamp: i64) {
        let idx = self.hits.partition_point(|&t| t <= timestamp);
        self.hits.insert(idx, timestamp);
    }

    /// Advance the watermark and return it.
    pub fn advance_watermark(&mut self, reference: i64) -> i64 {
        let mark = self.watermark.map_or(reference, |w| w.max(reference));
        self.watermark = Some(mark);
        mark
    }

    /// The reference a call at `reference` would use, without moving the
    /// watermark.
    pub fn peek_watermark(&self, reference: i64) -> i64 {
        self.watermark.map_or(reference, |w| w.max(reference))
    }

    /// Number of retained hits.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Oldest retained hit.
    pub fn oldest(&self) -> Option<i64> {
        self.hits.front().copied()
    }

    /// Snapshot of the retained hits, oldest first.
    pub fn hits(&self) -> Vec<i64> {
        self.hits.iter().copied().collect()
    }
}
