//! Ledgerlimit - concurrent sliding-window rate limiting
//!
//! This crate decides, per key, whether a timestamped request fits under a
//! fixed quota of hits per trailing window. Timestamps always come from the
//! caller; nothing here reads a clock.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod driver;
