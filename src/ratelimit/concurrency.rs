//! Locking policies that give callers exclusive access to a key's ledger.
//!
//! Every policy runs the caller's closure while holding a lock that covers
//! the key, so an evict-check-record sequence inside the closure is atomic
//! with respect to every other operation on the same key.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ledger::Ledger;

/// Default number of shards for [`ConcurrencyPolicy::Sharded`].
pub const DEFAULT_SHARDS: usize = 64;

/// How concurrent callers are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// One lock guards every key
    Global,
    /// One lock per key, created lazily through a registry
    #[default]
    PerKey,
    /// Fixed pool of locks indexed by key hash
    Sharded,
}

/// Single lock over the whole store.
#[derive(Debug, Default)]
pub struct GlobalLock {
    ledgers: Mutex<HashMap<String, Ledger>>,
}

impl GlobalLock {
    fn with_ledger<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let mut ledgers = self.ledgers.lock();
        if let Some(ledger) = ledgers.get_mut(key) {
            return f(ledger);
        }
        debug!(key = %key, "Creating ledger");
        f(ledgers.entry(key.to_owned()).or_default())
    }

    fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> Option<R> {
        self.ledgers.lock().get_mut(key).map(f)
    }

    fn key_count(&self) -> usize {
        self.ledgers.lock().len()
    }

    fn retain(&self, mut keep: impl FnMut(&mut Ledger) -> bool) -> usize {
        let mut ledgers = self.ledgers.lock();
        let before = ledgers.len();
        ledgers.retain(|_, ledger| keep(ledger));
        before - ledgers.len()
    }
}

/// Registry mapping each key to its own lock.
///
/// Locks are created once per key with double-checked creation: a lookup
/// under the shared registry lock, then a re-check under the exclusive
/// registry lock before inserting. The registry lock is never held while
/// a ledger is being worked on.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: RwLock<HashMap<String, Arc<Mutex<Ledger>>>>,
}

impl LockRegistry {
    /// Return the lock for `key`, creating it if this is the first use.
    pub fn lock_for(&self, key: &str) -> Arc<Mutex<Ledger>> {
        if let Some(lock) = self.locks.read().get(key) {
            return Arc::clone(lock);
        }

        let mut locks = self.locks.write();
        // Another thread may have created it between the two acquisitions
        let lock = locks.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, "Creating per-key lock");
            Arc::new(Mutex::new(Ledger::new()))
        });
        Arc::clone(lock)
    }

    fn with_ledger<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let lock = self.lock_for(key);
        let mut ledger = lock.lock();
        f(&mut *ledger)
    }

    fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> Option<R> {
        let lock = self.locks.read().get(key).cloned()?;
        let mut ledger = lock.lock();
        Some(f(&mut *ledger))
    }

    fn key_count(&self) -> usize {
        self.locks.read().len()
    }

    /// Drop entries rejected by `keep`.
    ///
    /// An entry whose lock is still referenced outside the registry is always
    /// kept. With the registry write lock held nobody can obtain a new
    /// reference, so removing an unreferenced lock cannot leave two live
    /// locks for one key.
    fn retain(&self, mut keep: impl FnMut(&mut Ledger) -> bool) -> usize {
        let mut locks = self.locks.write();
        let before = locks.len();
        locks.retain(|_, lock| {
            if Arc::strong_count(lock) > 1 {
                return true;
            }
            match lock.try_lock() {
                Some(mut ledger) => keep(&mut *ledger),
                None => true,
            }
        });
        before - locks.len()
    }
}

/// Hash-sharded map; unrelated keys may share a shard lock.
#[derive(Debug)]
pub struct ShardedLocks {
    ledgers: DashMap<String, Ledger>,
}

impl ShardedLocks {
    /// Create a sharded store. The shard count is rounded up to a power of
    /// two, with a minimum of two.
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(2).next_power_of_two();
        Self {
            ledgers: DashMap::with_shard_amount(shards),
        }
    }

    fn with_ledger<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> R {
        if let Some(mut ledger) = self.ledgers.get_mut(key) {
            return f(ledger.value_mut());
        }
        let mut ledger = self.ledgers.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, "Creating ledger");
            Ledger::new()
        });
        f(ledger.value_mut())
    }

    fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> Option<R> {
        self.ledgers
            .get_mut(key)
            .map(|mut ledger| f(ledger.value_mut()))
    }

    fn key_count(&self) -> usize {
        self.ledgers.len()
    }

    fn retain(&self, mut keep: impl FnMut(&mut Ledger) -> bool) -> usize {
        let before = self.ledgers.len();
        self.ledgers.retain(|_, ledger| keep(ledger));
        before.saturating_sub(self.ledgers.len())
    }
}

/// The locking policy a store was built with.
#[derive(Debug)]
pub enum ConcurrencyController {
    Global(GlobalLock),
    PerKey(LockRegistry),
    Sharded(ShardedLocks),
}

impl ConcurrencyController {
    /// Build the controller for `policy`. `shards` only applies to
    /// [`ConcurrencyPolicy::Sharded`].
    pub fn new(policy: ConcurrencyPolicy, shards: usize) -> Self {
        match policy {
            ConcurrencyPolicy::Global => Self::Global(GlobalLock::default()),
            ConcurrencyPolicy::PerKey => Self::PerKey(LockRegistry::default()),
            ConcurrencyPolicy::Sharded => Self::Sharded(ShardedLocks::new(shards)),
        }
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        match self {
            Self::Global(_) => ConcurrencyPolicy::Global,
            Self::PerKey(_) => ConcurrencyPolicy::PerKey,
            Self::Sharded(_) => ConcurrencyPolicy::Sharded,
        }
    }

    /// Run `f` with exclusive access to the ledger for `key`, creating an
    /// empty ledger on first use.
    pub fn with_ledger<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> R {
        match self {
            Self::Global(inner) => inner.with_ledger(key, f),
            Self::PerKey(inner) => inner.with_ledger(key, f),
            Self::Sharded(inner) => inner.with_ledger(key, f),
        }
    }

    /// Like [`with_ledger`](Self::with_ledger) but never creates a key.
    pub fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> Option<R> {
        match self {
            Self::Global(inner) => inner.with_existing(key, f),
            Self::PerKey(inner) => inner.with_existing(key, f),
            Self::Sharded(inner) => inner.with_existing(key, f),
        }
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        match self {
            Self::Global(inner) => inner.key_count(),
            Self::PerKey(inner) => inner.key_count(),
            Self::Sharded(inner) => inner.key_count(),
        }
    }

    /// Remove every key whose ledger `keep` rejects. Returns the number of
    /// keys removed.
    pub fn retain(&self, keep: impl FnMut(&mut Ledger) -> bool) -> usize {
        match self {
            Self::Global(inner) => inner.retain(keep),
            Self::PerKey(inner) => inner.retain(keep),
            Self::Sharded(inner) => inner.retain(keep),
        }
    }
}
