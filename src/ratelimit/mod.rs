//! Sliding-window rate limiting: ledgers, locking policies and admission.

mod concurrency;
mod ledger;
mod limiter;
mod store;

pub use concurrency::{ConcurrencyController, ConcurrencyPolicy, LockRegistry, DEFAULT_SHARDS};
pub use ledger::Ledger;
pub use limiter::{LimiterConfig, RateLimiter, WindowStatus};
pub use store::{InsertMode, LiveWindow, ReferenceMode, WindowStore};
