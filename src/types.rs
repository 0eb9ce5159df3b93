//! Data model shared by the store, the coordinator and the background worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbox kind for a deferred progress write.
pub const PROGRESS_UPDATE: &str = "progress-update";

/// Catalog entry for a lesson or quest, cached for offline browsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLessonItem {
  pub id: String,
  pub subject: String,
  /// Lesson definition as delivered by the content source
  #[serde(default)]
  pub payload: Value,
}

impl CachedLessonItem {
  pub fn new(id: impl Into<String>, subject: impl Into<String>, payload: Value) -> Self {
    Self {
      id: id.into(),
      subject: subject.into(),
      payload,
    }
  }
}

/// Largest `xp_earned` the store accepts. SQLite integers are signed.
pub const MAX_XP_EARNED: u64 = i64::MAX as u64;

/// Progress for a single lesson or quest. At most one per `item_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
  pub item_id: String,
  /// Completion percentage, 0 to 100
  pub progress: f64,
  pub xp_earned: u64,
  pub updated_at: DateTime<Utc>,
  /// False when written offline and still waiting in the outbox
  pub synced: bool,
}

/// A deferred write waiting to be replayed against the remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
  pub id: u64,
  pub kind: String,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
}

/// Decoded outbox payload, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
  Progress(ProgressRecord),
}

impl SyncPayload {
  /// Decode an outbox entry. Fails for unknown kinds and malformed payloads.
  pub fn decode(entry: &OutboxEntry) -> Result<Self, String> {
    match entry.kind.as_str() {
      PROGRESS_UPDATE => serde_json::from_value::<ProgressRecord>(entry.payload.clone())
        .map(SyncPayload::Progress)
        .map_err(|e| format!("malformed {} payload: {}", PROGRESS_UPDATE, e)),
      other => Err(format!("unknown outbox kind '{}'", other)),
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      SyncPayload::Progress(_) => PROGRESS_UPDATE,
    }
  }
}
