//! Admission engine: the public decision operations.

use serde::Serialize;
use tracing::{debug, trace};

use super::concurrency::{ConcurrencyController, ConcurrencyPolicy, DEFAULT_SHARDS};
use super::store::{InsertMode, LiveWindow, ReferenceMode, WindowStore};
use crate::error::{LimiterError, Result};

/// Validated, immutable limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    max_requests: u64,
    window_seconds: i64,
    concurrency: ConcurrencyPolicy,
    insert_mode: InsertMode,
    reference_mode: ReferenceMode,
    shards: usize,
}

impl LimiterConfig {
    /// Create a configuration admitting `max_requests` hits per
    /// `window_seconds`.
    ///
    /// Both values must be positive.
    pub fn new(max_requests: i64, window_seconds: i64) -> Result<Self> {
        if max_requests <= 0 {
            return Err(LimiterError::Config(format!(
                "max_requests must be positive, got {}",
                max_requests
            )));
        }
        if window_seconds <= 0 {
            return Err(LimiterError::Config(format!(
                "window_seconds must be positive, got {}",
                window_seconds
            )));
        }

        Ok(Self {
            max_requests: max_requests as u64,
            window_seconds,
            concurrency: ConcurrencyPolicy::default(),
            insert_mode: InsertMode::default(),
            reference_mode: ReferenceMode::default(),
            shards: DEFAULT_SHARDS,
        })
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_insert_mode(mut self, insert_mode: InsertMode) -> Self {
        self.insert_mode = insert_mode;
        self
    }

    pub fn with_reference_mode(mut self, reference_mode: ReferenceMode) -> Self {
        self.reference_mode = reference_mode;
        self
    }

    /// Shard count for [`ConcurrencyPolicy::Sharded`].
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    pub fn concurrency(&self) -> ConcurrencyPolicy {
        self.concurrency
    }

    pub fn insert_mode(&self) -> InsertMode {
        self.insert_mode
    }

    pub fn reference_mode(&self) -> ReferenceMode {
        self.reference_mode
    }

    pub fn shards(&self) -> usize {
        self.shards
    }
}

/// Snapshot of a key's window at a reference timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    /// Configured maximum per window
    pub limit: u64,
    /// Hits inside the window
    pub count: u64,
    /// Hits still available
    pub remaining: u64,
    /// Seconds until the oldest live hit expires
    pub reset_after: Option<i64>,
}

/// Sliding-window rate limiter over caller-supplied timestamps.
///
/// Every key gets its own ledger. Only [`check_and_hit`](Self::check_and_hit)
/// is atomic across threads; `allowed` followed by `hit` can race with other
/// callers and is meant for single-threaded or advisory use.
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    store: WindowStore,
}

impl RateLimiter {
    /// Create a limiter from a validated configuration.
    pub fn new(config: LimiterConfig) -> Self {
        let controller = ConcurrencyController::new(config.concurrency, config.shards);
        let store = WindowStore::new(
            config.window_seconds,
            config.insert_mode,
            config.reference_mode,
            controller,
        );
        Self { config, store }
    }

    /// Shorthand for `LimiterConfig::new` with default policies.
    pub fn with_limits(max_requests: i64, window_seconds: i64) -> Result<Self> {
        Ok(Self::new(LimiterConfig::new(max_requests, window_seconds)?))
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Record a hit without any capacity check.
    ///
    /// Under [`ReferenceMode::Watermark`] a timestamp already outside the
    /// window behind the key's watermark is dropped rather than recorded.
    pub fn hit(&self, key: &str, timestamp: i64) {
        trace!(key = %key, timestamp = timestamp, "Recording hit");
        self.store.with_window(key, timestamp, |window| window.record(timestamp));
    }

    /// Whether a request at `timestamp` would be admitted. Records nothing.
    pub fn allowed(&self, key: &str, timestamp: i64) -> bool {
        let allowed = self.store.with_window(key, timestamp, |window| {
            self.has_capacity(window) && window.is_live(timestamp)
        });
        trace!(key = %key, timestamp = timestamp, allowed = allowed, "Probed rate limit");
        allowed
    }

    /// Atomically decide and, on admission, record a hit.
    pub fn check_and_hit(&self, key: &str, timestamp: i64) -> bool {
        let admitted = self.store.with_window(key, timestamp, |window| {
            // record refuses hits that are already outside the window
            self.has_capacity(window) && window.record(timestamp)
        });

        if admitted {
            trace!(key = %key, timestamp = timestamp, "Request admitted");
        } else {
            debug!(
                key = %key,
                timestamp = timestamp,
                limit = self.config.max_requests,
                "Rate limit exceeded"
            );
        }
        admitted
    }

    /// Evict and report the window for `key` without recording.
    pub fn status(&self, key: &str, timestamp: i64) -> WindowStatus {
        let limit = self.config.max_requests;
        self.store.with_window(key, timestamp, |window| {
            let count = window.count() as u64;
            let reset_after = window.oldest().map(|oldest| {
                oldest
                    .saturating_add(self.config.window_seconds)
                    .saturating_sub(window.reference())
            });
            WindowStatus {
                limit,
                count,
                remaining: limit.saturating_sub(count),
                reset_after,
            }
        })
    }

    /// Evict stale hits for `key` relative to `reference`; returns the
    /// number retained.
    pub fn evict(&self, key: &str, reference: i64) -> usize {
        self.store.evict(key, reference)
    }

    /// Hits retained for `key` after its most recent eviction.
    pub fn count(&self, key: &str) -> usize {
        self.store.count(key)
    }

    /// Retained hits for `key`, oldest first.
    pub fn hits(&self, key: &str) -> Vec<i64> {
        self.store.hits(key)
    }

    /// Drop keys with no live hits at `reference`.
    ///
    /// Keys are otherwise never removed, so long-running limiters with many
    /// short-lived keys should call this periodically. Sweeping does not move
    /// any key's watermark.
    pub fn sweep_idle(&self, reference: i64) -> usize {
        let removed = self.store.sweep_idle(reference);
        debug!(reference = reference, removed = removed, "Swept idle keys");
        removed
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.store.key_count()
    }

    fn has_capacity(&self, window: &LiveWindow<'_>) -> bool {
        (window.count() as u64) < self.config.max_requests
    }
}
