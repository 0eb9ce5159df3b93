//! Memory-only store used when persistent storage is unavailable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::traits::KeyedAsyncStore;
use crate::error::StoreError;
use crate::types::{CachedLessonItem, OutboxEntry, ProgressRecord, MAX_XP_EARNED};

#[derive(Default)]
struct Partitions {
  catalog: BTreeMap<String, CachedLessonItem>,
  progress: HashMap<String, ProgressRecord>,
  outbox: BTreeMap<u64, OutboxEntry>,
  next_outbox_id: u64,
  profile: HashMap<String, Value>,
}

/// In-process store. Same semantics as the SQLite store, nothing persists.
#[derive(Default)]
pub struct MemoryStore {
  inner: RwLock<Partitions>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Partitions {
  fn insert_progress(&mut self, record: &ProgressRecord) -> Result<(), StoreError> {
    if record.xp_earned > MAX_XP_EARNED {
      return Err(StoreError::InvalidRecord(format!(
        "xp_earned {} does not fit in storage",
        record.xp_earned
      )));
    }
    self.progress.insert(record.item_id.clone(), record.clone());
    Ok(())
  }

  fn push_outbox(&mut self, kind: &str, payload: &Value, enqueued_at: DateTime<Utc>) -> u64 {
    self.next_outbox_id += 1;
    let id = self.next_outbox_id;
    self.outbox.insert(
      id,
      OutboxEntry {
        id,
        kind: kind.to_string(),
        payload: payload.clone(),
        enqueued_at,
      },
    );
    id
  }
}

#[async_trait]
impl KeyedAsyncStore for MemoryStore {
  async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StoreError> {
    self.inner.write().await.insert_progress(record)
  }

  async fn get_progress(&self, item_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
    Ok(self.inner.read().await.progress.get(item_id).cloned())
  }

  async fn put_progress_and_enqueue(
    &self,
    record: &ProgressRecord,
    kind: &str,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<u64, StoreError> {
    let mut inner = self.inner.write().await;
    inner.insert_progress(record)?;
    Ok(inner.push_outbox(kind, payload, enqueued_at))
  }

  async fn mark_progress_synced(
    &self,
    item_id: &str,
    updated_at: DateTime<Utc>,
  ) -> Result<bool, StoreError> {
    let mut inner = self.inner.write().await;
    match inner.progress.get_mut(item_id) {
      Some(record) if record.updated_at == updated_at => {
        record.synced = true;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn put_catalog_item(&self, item: &CachedLessonItem) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    inner.catalog.insert(item.id.clone(), item.clone());
    Ok(())
  }

  async fn get_all_catalog_items(&self) -> Result<Vec<CachedLessonItem>, StoreError> {
    Ok(self.inner.read().await.catalog.values().cloned().collect())
  }

  async fn get_catalog_by_subject(
    &self,
    subject: &str,
  ) -> Result<Vec<CachedLessonItem>, StoreError> {
    Ok(
      self
        .inner
        .read()
        .await
        .catalog
        .values()
        .filter(|item| item.subject == subject)
        .cloned()
        .collect(),
    )
  }

  async fn append_outbox_entry(
    &self,
    kind: &str,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<u64, StoreError> {
    Ok(self.inner.write().await.push_outbox(kind, payload, enqueued_at))
  }

  async fn list_outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
    Ok(self.inner.read().await.outbox.values().cloned().collect())
  }

  async fn delete_outbox_entry(&self, id: u64) -> Result<(), StoreError> {
    self.inner.write().await.outbox.remove(&id);
    Ok(())
  }

  async fn put_profile(&self, id: &str, data: &Value) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    inner.profile.insert(id.to_string(), data.clone());
    Ok(())
  }

  async fn get_profile(&self, id: &str) -> Result<Option<Value>, StoreError> {
    Ok(self.inner.read().await.profile.get(id).cloned())
  }

  fn name(&self) -> &'static str {
    "memory"
  }
}
