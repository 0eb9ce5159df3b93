//! Offline-first lesson cache and progress sync for STEM Safari.
//!
//! Three pieces cooperate:
//! - [`store`]: durable local partitions for the catalog, progress, the
//!   outbox of deferred writes, and profile data
//! - [`sync`]: connectivity tracking, write-through saves and outbox replay
//! - [`intercept`]: request interception with per-class caching strategies,
//!   hosted by a background worker

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod intercept;
pub mod logging;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(test)]
mod testing;
