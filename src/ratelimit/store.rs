//! Keyed window store.
//!
//! Owns the per-key ledgers behind a [`ConcurrencyController`] and applies
//! the window rules: which reference a call evicts against and which
//! insertion discipline records a hit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::concurrency::ConcurrencyController;
use super::ledger::Ledger;

/// How hits are inserted into a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Append, assuming timestamps arrive in non-decreasing order
    Monotonic,
    /// Binary-search insertion, tolerating out-of-order arrival
    #[default]
    Ordered,
}

/// Which timestamp a call evicts against.
///
/// With `PerCall` a late call carrying an older timestamp evicts relative to
/// that older timestamp, so it can see hits a newer call would already have
/// expired. `Watermark` evicts relative to the greatest timestamp seen for
/// the key instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    #[default]
    PerCall,
    Watermark,
}

/// A key's ledger, already evicted, borrowed for the duration of a lock.
pub struct LiveWindow<'a> {
    key: &'a str,
    ledger: &'a mut Ledger,
    insert_mode: InsertMode,
    reference: i64,
    window_seconds: i64,
}

impl LiveWindow<'_> {
    /// Hits inside the window.
    pub fn count(&self) -> usize {
        self.ledger.len()
    }

    /// The reference eviction was computed against.
    pub fn reference(&self) -> i64 {
        self.reference
    }

    pub fn oldest(&self) -> Option<i64> {
        self.ledger.oldest()
    }

    /// Whether `timestamp` falls inside the window ending at the reference.
    ///
    /// Always true under [`ReferenceMode::PerCall`], where the reference is
    /// the timestamp itself.
    pub fn is_live(&self, timestamp: i64) -> bool {
        timestamp > self.reference.saturating_sub(self.window_seconds)
    }

    /// Record a hit using the store's insertion discipline.
    ///
    /// A hit that is already outside the window is dropped and `false` is
    /// returned, so the ledger never holds expired hits.
    pub fn record(&mut self, timestamp: i64) -> bool {
        if !self.is_live(timestamp) {
            debug!(
                key = %self.key,
                timestamp = timestamp,
                reference = self.reference,
                "Dropping hit outside the window"
            );
            return false;
        }

        match self.insert_mode {
            InsertMode::Ordered => self.ledger.insert_ordered(timestamp),
            InsertMode::Monotonic => {
                if !self.ledger.insert_monotonic(timestamp) {
                    debug!(
                        key = %self.key,
                        timestamp = timestamp,
                        "Out-of-order hit placed by search"
                    );
                }
            }
        }
        true
    }
}

/// Per-key sliding-window ledgers.
#[derive(Debug)]
pub struct WindowStore {
    window_seconds: i64,
    insert_mode: InsertMode,
    reference_mode: ReferenceMode,
    ledgers: ConcurrencyController,
}

impl WindowStore {
    /// Create a store. `window_seconds` must already be validated as positive.
    pub fn new(
        window_seconds: i64,
        insert_mode: InsertMode,
        reference_mode: ReferenceMode,
        ledgers: ConcurrencyController,
    ) -> Self {
        Self {
            window_seconds,
            insert_mode,
            reference_mode,
            ledgers,
        }
    }

    /// Evict stale hits for `key` relative to `reference`.
    ///
    /// Returns the number of hits left. Unknown keys are not created.
    pub fn evict(&self, key: &str, reference: i64) -> usize {
        self.ledgers
            .with_existing(key, |ledger| {
                self.evict_ledger(ledger, reference);
                ledger.len()
            })
            .unwrap_or(0)
    }

    /// Hits retained for `key` since its last eviction.
    pub fn count(&self, key: &str) -> usize {
        self.ledgers.with_existing(key, |ledger| ledger.len()).unwrap_or(0)
    }

    /// Append `timestamp` to `key`'s ledger without evicting.
    pub fn insert_monotonic(&self, key: &str, timestamp: i64) {
        self.ledgers.with_ledger(key, |ledger| {
            if !ledger.insert_monotonic(timestamp) {
                debug!(key = %key, timestamp = timestamp, "Out-of-order hit placed by search");
            }
        });
    }

    /// Insert `timestamp` at its sorted position without evicting.
    pub fn insert_ordered(&self, key: &str, timestamp: i64) {
        self.ledgers
            .with_ledger(key, |ledger| ledger.insert_ordered(timestamp));
    }

    /// Snapshot of `key`'s retained hits, oldest first.
    pub fn hits(&self, key: &str) -> Vec<i64> {
        self.ledgers
            .with_existing(key, |ledger| ledger.hits())
            .unwrap_or_default()
    }

    /// Lock `key`, evict relative to `timestamp` and run `f` on what is left.
    ///
    /// The lock is held until `f` returns, which makes check-then-record
    /// inside `f` atomic for this key.
    pub fn with_window<R>(
        &self,
        key: &str,
        timestamp: i64,
        f: impl FnOnce(&mut LiveWindow<'_>) -> R,
    ) -> R {
        self.ledgers.with_ledger(key, |ledger| {
            let reference = self.evict_ledger(ledger, timestamp);
            let mut window = LiveWindow {
                key,
                ledger,
                insert_mode: self.insert_mode,
                reference,
                window_seconds: self.window_seconds,
            };
            f(&mut window)
        })
    }

    /// Evict every ledger relative to `reference` and drop the keys left
    /// empty. Returns the number of keys removed.
    ///
    /// Under [`ReferenceMode::Watermark`] a key's watermark is read but not
    /// moved, so sweeping never changes how later calls are judged.
    pub fn sweep_idle(&self, reference: i64) -> usize {
        self.ledgers.retain(|ledger| {
            let reference = match self.reference_mode {
                ReferenceMode::PerCall => reference,
                ReferenceMode::Watermark => ledger.peek_watermark(reference),
            };
            ledger.evict(reference, self.window_seconds);
            !ledger.is_empty()
        })
    }

    pub fn key_count(&self) -> usize {
        self.ledgers.key_count()
    }

    fn evict_ledger(&self, ledger: &mut Ledger, timestamp: i64) -> i64 {
        let reference = match self.reference_mode {
            ReferenceMode::PerCall => timestamp,
            ReferenceMode::Watermark => ledger.advance_watermark(timestamp),
        };
        ledger.evict(reference, self.window_seconds);
        reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::concurrency::{ConcurrencyPolicy, DEFAULT_SHARDS};

    fn store(insert_mode: InsertMode, reference_mode: ReferenceMode) -> WindowStore {
        WindowStore::new(
            10,
            insert_mode,
            reference_mode,
            ConcurrencyController::new(ConcurrencyPolicy::PerKey, DEFAULT_SHARDS),
        )
    }

    #[test]
    fn test_unknown_key_reads_as_empty() {
        let store = store(InsertMode::Ordered, ReferenceMode::PerCall);

        assert_eq!(store.count("nobody"), 0);
        assert_eq!(store.evict("nobody", 100), 0);
        assert!(store.hits("nobody").is_empty());
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_evict_then_count() {
        let store = store(InsertMode::Monotonic, ReferenceMode::PerCall);
        for t in [1, 2, 3] {
            store.insert_monotonic("user_1", t);
        }

        assert_eq!(store.count("user_1"), 3);
        assert_eq!(store.evict("user_1", 12), 1);
        assert_eq!(store.count("user_1"), 1);
        assert_eq!(store.evict("user_1", 12), 1);
    }

    #[test]
    fn test_insert_ordered_keeps_sorted() {
        let store = store(InsertMode::Ordered, ReferenceMode::PerCall);
        for t in [10, 5, 7, 5] {
            store.insert_ordered("k", t);
        }

        assert_eq!(store.hits("k"), vec![5, 5, 7, 10]);
    }

    #[test]
    fn test_with_window_records_with_store_mode() {
        let store = store(InsertMode::Monotonic, ReferenceMode::PerCall);

        store.with_window("k", 10, |window| window.record(10));
        store.with_window("k", 4, |window| {
            assert_eq!(window.count(), 1);
            window.record(4);
        });

        assert_eq!(store.hits("k"), vec![4, 10]);
    }

    #[test]
    fn test_per_call_reference_under_evicts_late_calls() {
        let store = store(InsertMode::Ordered, ReferenceMode::PerCall);
        store.insert_ordered("k", 1);

        // A call at t=30 would expire the hit; a late call at t=5 does not.
        let count = store.with_window("k", 5, |window| window.count());
        assert_eq!(count, 1);
    }

    #[test]
    fn test_watermark_reference_evicts_against_latest() {
        let store = store(InsertMode::Ordered, ReferenceMode::Watermark);
        store.insert_ordered("k", 1);
        store.with_window("k", 30, |window| window.record(30));

        let (count, reference) = store.with_window("k", 5, |window| {
            (window.count(), window.reference())
        });
        assert_eq!(reference, 30);
        assert_eq!(count, 1);
        assert_eq!(store.hits("k"), vec![30]);
    }

    #[test]
    fn test_sweep_idle_drops_empty_keys() {
        let store = store(InsertMode::Ordered, ReferenceMode::PerCall);
        store.insert_ordered("stale", 1);
        store.insert_ordered("fresh", 95);

        assert_eq!(store.sweep_idle(100), 1);
        assert_eq!(store.key_count(), 1);
        assert_eq!(store.hits("fresh"), vec![95]);
    }

    #[test]
    fn test_record_drops_hit_behind_watermark() {
        let store = store(InsertMode::Ordered, ReferenceMode::Watermark);
        store.with_window("k", 30, |window| window.record(30));

        // Reference stays at 30, so t=20 sits exactly on the boundary
        let recorded = store.with_window("k", 20, |window| {
            assert!(!window.is_live(20));
            assert!(window.is_live(21));
            window.record(20)
        });

        assert!(!recorded);
        assert_eq!(store.hits("k"), vec![30]);
    }

    #[test]
    fn test_sweep_idle_does_not_move_watermark() {
        let store = store(InsertMode::Ordered, ReferenceMode::Watermark);
        store.with_window("k", 25, |window| window.record(25));
        store.with_window("k", 30, |window| window.record(30));

        // Evicts t=25 and keeps the key
        assert_eq!(store.sweep_idle(36), 0);
        assert_eq!(store.hits("k"), vec![30]);

        // Judged against the watermark of 30, not the sweep reference of 36
        let reference = store.with_window("k", 21, |window| {
            assert!(window.record(21));
            window.reference()
        });
        assert_eq!(reference, 30);
        assert_eq!(store.hits("k"), vec![21, 30]);
    }
}
