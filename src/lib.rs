//! Trailing-high stop-loss watcher.
//!
//! Polls a watchlist of symbols, tracks each one's high-water mark and flags
//! positions that have fallen into the warning or danger band below it.

pub mod config;
pub mod error;
pub mod model;
pub mod notifier;
pub mod source;
pub mod stoploss;
pub mod storage;
pub mod watch;
