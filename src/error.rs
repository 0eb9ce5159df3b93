//! Typed errors raised at component boundaries.

use thiserror::Error;

/// Errors from the persistent local store.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The host has no usable persistent storage. Callers should fall back to
  /// a memory-only store rather than fail.
  #[error("persistent storage unavailable: {0}")]
  StorageUnavailable(String),

  #[error("database schema version {found} is newer than supported version {supported}")]
  SchemaVersion { found: i64, supported: i64 },

  #[error("invalid record: {0}")]
  InvalidRecord(String),

  #[error("serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage backend error: {0}")]
  Backend(String),
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    StoreError::Backend(e.to_string())
  }
}

/// Errors surfaced by the sync coordinator to its callers.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("progress must be between 0 and 100, got {0}")]
  InvalidProgress(f64),

  #[error("xp earned {0} is larger than can be stored")]
  InvalidXp(u64),

  #[error("item id must not be empty")]
  EmptyItemId,

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("outbox drainer is not running")]
  DrainerStopped,
}

/// Failure to replay an outbox entry. Always retried on a later drain.
#[derive(Debug, Error)]
pub enum ReplayError {
  #[error("network error: {0}")]
  Network(String),

  #[error("remote endpoint responded with status {0}")]
  Status(u16),
}

/// Failure to fetch a resource over the network.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  #[error("network unreachable: {0}")]
  Network(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}
