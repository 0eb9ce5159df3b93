//! Cloneable handle over a [`KeyedAsyncStore`] backend.

use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::memory::MemoryStore;
use super::sqlite::SqliteStore;
use super::traits::KeyedAsyncStore;
use crate::db::Database;
use crate::error::StoreError;
use crate::types::{CachedLessonItem, OutboxEntry, ProgressRecord};

/// Outcome of a bulk catalog write.
#[derive(Debug, Default)]
pub struct CatalogPutReport {
  /// Number of items written
  pub stored: usize,
  /// Items that could not be written, by id
  pub failures: Vec<(String, StoreError)>,
}

impl CatalogPutReport {
  pub fn is_complete(&self) -> bool {
    self.failures.is_empty()
  }
}

/// The persistent local store.
///
/// Every execution context opens its own handle; handles opened on the same
/// path share the durable state but no memory.
#[derive(Clone)]
pub struct LocalStore {
  backend: Arc<dyn KeyedAsyncStore>,
}

impl LocalStore {
  /// Open the durable store at `path`. Creating the schema is idempotent.
  ///
  /// Fails with [`StoreError::StorageUnavailable`] when the location can't be
  /// used; see [`LocalStore::open_or_memory`] for the degraded fallback.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    let db = Database::open(path)?;
    Ok(Self::from_database(db))
  }

  /// Open the durable store, or fall back to a memory-only store.
  pub fn open_or_memory(path: Option<&Path>) -> Self {
    let opened = match path {
      Some(p) => Self::open(p),
      None => Database::default_path().and_then(|p| Self::open(&p)),
    };

    match opened {
      Ok(store) => store,
      Err(e) => {
        warn!(error = %e, "offline cache disabled, using memory-only store");
        Self::memory()
      }
    }
  }

  pub fn from_database(db: Database) -> Self {
    Self::with_backend(Arc::new(SqliteStore::new(db)))
  }

  pub fn memory() -> Self {
    Self::with_backend(Arc::new(MemoryStore::new()))
  }

  pub fn with_backend(backend: Arc<dyn KeyedAsyncStore>) -> Self {
    Self { backend }
  }

  /// Whether writes survive the process.
  pub fn is_durable(&self) -> bool {
    self.backend.name() != "memory"
  }

  pub fn backend_name(&self) -> &'static str {
    self.backend.name()
  }

  pub async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StoreError> {
    self.backend.put_progress(record).await
  }

  pub async fn get_progress(&self, item_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
    self.backend.get_progress(item_id).await
  }

  /// Upsert `record` and queue `payload` for replay in one write.
  pub async fn put_progress_and_enqueue(
    &self,
    record: &ProgressRecord,
    kind: &str,
    payload: &Value,
  ) -> Result<u64, StoreError> {
    self
      .backend
      .put_progress_and_enqueue(record, kind, payload, Utc::now())
      .await
  }

  pub async fn mark_progress_synced(&self, record: &ProgressRecord) -> Result<bool, StoreError> {
    self
      .backend
      .mark_progress_synced(&record.item_id, record.updated_at)
      .await
  }

  /// Upsert every item. A failing item is recorded and the rest still land.
  pub async fn put_catalog_items(&self, items: &[CachedLessonItem]) -> CatalogPutReport {
    let mut report = CatalogPutReport::default();

    for item in items {
      let result = if item.id.trim().is_empty() {
        Err(StoreError::InvalidRecord("catalog item without id".to_string()))
      } else {
        self.backend.put_catalog_item(item).await
      };

      match result {
        Ok(()) => report.stored += 1,
        Err(e) => {
          warn!(item = %item.id, error = %e, "failed to cache catalog item");
          report.failures.push((item.id.clone(), e));
        }
      }
    }

    debug!(
      stored = report.stored,
      failed = report.failures.len(),
      "cached catalog items"
    );
    report
  }

  pub async fn get_all_catalog_items(&self) -> Result<Vec<CachedLessonItem>, StoreError> {
    self.backend.get_all_catalog_items().await
  }

  pub async fn get_catalog_by_subject(
    &self,
    subject: &str,
  ) -> Result<Vec<CachedLessonItem>, StoreError> {
    self.backend.get_catalog_by_subject(subject).await
  }

  pub async fn append_outbox_entry(&self, kind: &str, payload: &Value) -> Result<u64, StoreError> {
    self
      .backend
      .append_outbox_entry(kind, payload, Utc::now())
      .await
  }

  pub async fn list_outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
    self.backend.list_outbox_entries().await
  }

  pub async fn delete_outbox_entry(&self, id: u64) -> Result<(), StoreError> {
    self.backend.delete_outbox_entry(id).await
  }

  pub async fn put_profile(&self, id: &str, data: &Value) -> Result<(), StoreError> {
    self.backend.put_profile(id, data).await
  }

  pub async fn get_profile(&self, id: &str) -> Result<Option<Value>, StoreError> {
    self.backend.get_profile(id).await
  }

  /// Flush the backend and release this handle.
  ///
  /// Clones of this handle, and anything else sharing the same [`Database`],
  /// keep the connection open. It is closed when the last of them is dropped.
  pub async fn close(self) -> Result<(), StoreError> {
    self.backend.close().await?;
    info!(backend = self.backend.name(), "closed local store handle");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::MAX_XP_EARNED;
  use serde_json::json;

  fn backends() -> Vec<LocalStore> {
    vec![
      LocalStore::from_database(Database::open_in_memory().unwrap()),
      LocalStore::memory(),
    ]
  }

  fn record(item_id: &str, progress: f64, xp: u64) -> ProgressRecord {
    ProgressRecord {
      item_id: item_id.to_string(),
      progress,
      xp_earned: xp,
      updated_at: Utc::now(),
      synced: true,
    }
  }

  #[tokio::test]
  async fn test_progress_upsert_replaces_whole_record() {
    for store in backends() {
      store.put_progress(&record("q1", 40.0, 20)).await.unwrap();
      let mut second = record("q1", 75.0, 5);
      second.synced = false;
      store.put_progress(&second).await.unwrap();

      let got = store.get_progress("q1").await.unwrap().unwrap();
      assert_eq!(got, second, "backend {}", store.backend_name());
      assert!(store.get_progress("missing").await.unwrap().is_none());
    }
  }

  #[tokio::test]
  async fn test_catalog_round_trip_replaces_by_id() {
    for store in backends() {
      let a = CachedLessonItem::new("a", "physics", json!({"title": "Forces"}));
      let b = CachedLessonItem::new("b", "biology", json!({"title": "Cells"}));
      let report = store.put_catalog_items(&[a, b.clone()]).await;
      assert!(report.is_complete());

      let a2 = CachedLessonItem::new("a", "physics", json!({"title": "Forces and Motion"}));
      store.put_catalog_items(&[a2.clone()]).await;

      let all = store.get_all_catalog_items().await.unwrap();
      assert_eq!(all, vec![a2, b], "backend {}", store.backend_name());
    }
  }

  #[tokio::test]
  async fn test_catalog_batch_continues_past_bad_item() {
    for store in backends() {
      let items = vec![
        CachedLessonItem::new("a", "math", json!({})),
        CachedLessonItem::new("", "math", json!({})),
        CachedLessonItem::new("c", "chemistry", json!({})),
      ];
      let report = store.put_catalog_items(&items).await;
      assert_eq!(report.stored, 2);
      assert_eq!(report.failures.len(), 1);
      assert_eq!(store.get_all_catalog_items().await.unwrap().len(), 2);
    }
  }

  #[tokio::test]
  async fn test_catalog_by_subject() {
    for store in backends() {
      store
        .put_catalog_items(&[
          CachedLessonItem::new("a", "math", json!({})),
          CachedLessonItem::new("b", "physics", json!({})),
          CachedLessonItem::new("c", "math", json!({})),
        ])
        .await;
      let ids: Vec<String> = store
        .get_catalog_by_subject("math")
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.id)
        .collect();
      assert_eq!(ids, vec!["a", "c"]);
    }
  }

  #[tokio::test]
  async fn test_outbox_is_fifo_and_delete_is_idempotent() {
    for store in backends() {
      let first = store
        .append_outbox_entry("progress-update", &json!({"n": 1}))
        .await
        .unwrap();
      let second = store
        .append_outbox_entry("progress-update", &json!({"n": 2}))
        .await
        .unwrap();
      assert!(second > first);

      let entries = store.list_outbox_entries().await.unwrap();
      let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
      assert_eq!(ids, vec![first, second]);
      assert_eq!(entries[1].payload, json!({"n": 2}));

      store.delete_outbox_entry(first).await.unwrap();
      store.delete_outbox_entry(first).await.unwrap();
      store.delete_outbox_entry(9999).await.unwrap();
      assert_eq!(store.list_outbox_entries().await.unwrap().len(), 1);
    }
  }

  #[tokio::test]
  async fn test_mark_synced_requires_matching_write() {
    for store in backends() {
      let mut stale = record("q1", 10.0, 1);
      stale.synced = false;
      store.put_progress(&stale).await.unwrap();

      let mut newer = stale.clone();
      newer.progress = 20.0;
      newer.updated_at = stale.updated_at + chrono::Duration::seconds(1);
      store.put_progress(&newer).await.unwrap();

      assert!(!store.mark_progress_synced(&stale).await.unwrap());
      assert!(!store.get_progress("q1").await.unwrap().unwrap().synced);

      assert!(store.mark_progress_synced(&newer).await.unwrap());
      assert!(store.get_progress("q1").await.unwrap().unwrap().synced);
    }
  }

  #[tokio::test]
  async fn test_profile_partition() {
    for store in backends() {
      assert!(store.get_profile("student").await.unwrap().is_none());
      store
        .put_profile("student", &json!({"name": "Ada", "level": 3}))
        .await
        .unwrap();
      assert_eq!(
        store.get_profile("student").await.unwrap(),
        Some(json!({"name": "Ada", "level": 3}))
      );
    }
  }

  #[test]
  fn test_unusable_path_degrades_to_memory() {
    let store = LocalStore::open_or_memory(Some(Path::new("/dev/null/offline.db")));
    assert!(!store.is_durable());
  }

  #[tokio::test]
  async fn test_reopened_file_keeps_progress() {
    let dir = std::env::temp_dir().join(format!("safari-sync-test-{}", std::process::id()));
    let path = dir.join("offline.db");
    let _ = std::fs::remove_file(&path);

    let written = record("q9", 100.0, 50);
    {
      let store = LocalStore::open(&path).unwrap();
      store.put_progress(&written).await.unwrap();
      store.close().await.unwrap();
    }

    let reopened = LocalStore::open(&path).unwrap();
    assert_eq!(reopened.get_progress("q9").await.unwrap(), Some(written));
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[tokio::test]
  async fn test_xp_up_to_signed_limit_is_kept() {
    for store in backends() {
      store.put_progress(&record("big", 100.0, MAX_XP_EARNED)).await.unwrap();
      let got = store.get_progress("big").await.unwrap().unwrap();
      assert_eq!(got.xp_earned, MAX_XP_EARNED, "backend {}", store.backend_name());

      let err = store
        .put_progress(&record("huge", 100.0, u64::MAX))
        .await
        .unwrap_err();
      assert!(matches!(err, StoreError::InvalidRecord(_)), "backend {}", store.backend_name());
      assert!(store.get_progress("huge").await.unwrap().is_none());

      let err = store
        .put_progress_and_enqueue(&record("huge", 100.0, u64::MAX), "progress-update", &json!({}))
        .await
        .unwrap_err();
      assert!(matches!(err, StoreError::InvalidRecord(_)));
      assert!(store.list_outbox_entries().await.unwrap().is_empty());
    }
  }

  #[tokio::test]
  async fn test_negative_stored_xp_is_an_error() {
    let db = Database::open_in_memory().unwrap();
    let store = LocalStore::from_database(db.clone());
    db.call(|conn| {
      conn.execute(
        "INSERT INTO progress (item_id, progress, xp_earned, updated_at, synced)
         VALUES ('neg', 10.0, -5, '2026-01-01T00:00:00Z', 1)",
        [],
      )?;
      Ok(())
    })
    .await
    .unwrap();

    assert!(matches!(
      store.get_progress("neg").await,
      Err(StoreError::Backend(_))
    ));
  }

  #[tokio::test]
  async fn test_put_and_enqueue_lands_both() {
    for store in backends() {
      let mut written = record("q1", 30.0, 10);
      written.synced = false;
      let id = store
        .put_progress_and_enqueue(&written, "progress-update", &json!({"itemId": "q1"}))
        .await
        .unwrap();

      assert_eq!(store.get_progress("q1").await.unwrap(), Some(written));
      let entries = store.list_outbox_entries().await.unwrap();
      assert_eq!(entries.len(), 1);
      assert_eq!(entries[0].id, id);
      assert_eq!(entries[0].payload, json!({"itemId": "q1"}));
    }
  }

  #[tokio::test]
  async fn test_put_and_enqueue_rolls_back_when_outbox_insert_fails() {
    let db = Database::open_in_memory().unwrap();
    let store = LocalStore::from_database(db.clone());
    db.call(|conn| {
      conn.execute_batch(
        "CREATE TRIGGER outbox_full BEFORE INSERT ON outbox
         BEGIN SELECT RAISE(ABORT, 'outbox full'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

    let mut written = record("q1", 30.0, 10);
    written.synced = false;
    assert!(store
      .put_progress_and_enqueue(&written, "progress-update", &json!({"itemId": "q1"}))
      .await
      .is_err());
    assert!(store.get_progress("q1").await.unwrap().is_none());
    assert!(store.list_outbox_entries().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_close_leaves_other_handles_usable() {
    for store in backends() {
      let other = store.clone();
      store.close().await.unwrap();
      other.put_progress(&record("q1", 5.0, 1)).await.unwrap();
      assert!(other.get_progress("q1").await.unwrap().is_some());
      other.close().await.unwrap();
    }
  }
}
