//! Backend trait for the persistent local store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StoreError;
use crate::types::{CachedLessonItem, OutboxEntry, ProgressRecord};

/// Keyed, asynchronous storage split into catalog, progress, outbox and
/// profile partitions.
///
/// Implementations must serialize writes per partition so that concurrent
/// readers only ever observe committed states.
#[async_trait]
pub trait KeyedAsyncStore: Send + Sync {
  /// Upsert a progress record by `item_id`, replacing any earlier record.
  async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StoreError>;

  async fn get_progress(&self, item_id: &str) -> Result<Option<ProgressRecord>, StoreError>;

  /// Upsert `record` and append an outbox entry for it as one unit: either
  /// both land or neither does. Returns the outbox id.
  async fn put_progress_and_enqueue(
    &self,
    record: &ProgressRecord,
    kind: &str,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<u64, StoreError>;

  /// Set `synced` on the record for `item_id`, but only if it was last
  /// written at `updated_at`. Returns whether a record was updated.
  async fn mark_progress_synced(
    &self,
    item_id: &str,
    updated_at: DateTime<Utc>,
  ) -> Result<bool, StoreError>;

  /// Upsert a single catalog item by id.
  async fn put_catalog_item(&self, item: &CachedLessonItem) -> Result<(), StoreError>;

  /// All catalog items, ordered by id.
  async fn get_all_catalog_items(&self) -> Result<Vec<CachedLessonItem>, StoreError>;

  async fn get_catalog_by_subject(&self, subject: &str)
    -> Result<Vec<CachedLessonItem>, StoreError>;

  /// Append to the outbox, returning the assigned id.
  async fn append_outbox_entry(
    &self,
    kind: &str,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<u64, StoreError>;

  /// Outbox entries in insertion order.
  async fn list_outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError>;

  /// Remove an outbox entry. Missing ids are not an error.
  async fn delete_outbox_entry(&self, id: u64) -> Result<(), StoreError>;

  async fn put_profile(&self, id: &str, data: &Value) -> Result<(), StoreError>;

  async fn get_profile(&self, id: &str) -> Result<Option<Value>, StoreError>;

  /// Flush backend state before the handle goes away. The backend itself is
  /// released when its last handle is dropped.
  async fn close(&self) -> Result<(), StoreError> {
    Ok(())
  }

  /// Backend name for logging
  fn name(&self) -> &'static str;
}
