//! SQLite-backed local store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::traits::KeyedAsyncStore;
use crate::db::Database;
use crate::error::StoreError;
use crate::types::{CachedLessonItem, OutboxEntry, ProgressRecord};

/// Durable store on top of the shared offline [`Database`].
pub struct SqliteStore {
  db: Database,
}

impl SqliteStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

#[async_trait]
impl KeyedAsyncStore for SqliteStore {
  async fn put_progress(&self, record: &ProgressRecord) -> Result<(), StoreError> {
    let record = record.clone();
    let xp_earned = xp_to_sql(record.xp_earned)?;
    self
      .db
      .call(move |conn| {
        upsert_progress(conn, &record, xp_earned)?;
        Ok(())
      })
      .await
  }

  async fn get_progress(&self, item_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
    let item_id = item_id.to_string();
    self
      .db
      .call(move |conn| {
        let row: Option<(String, f64, i64, String, bool)> = conn
          .query_row(
            "SELECT item_id, progress, xp_earned, updated_at, synced FROM progress
             WHERE item_id = ?",
            params![item_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
          )
          .optional()?;

        match row {
          Some((item_id, progress, xp_earned, updated_at, synced)) => Ok(Some(ProgressRecord {
            item_id,
            progress,
            xp_earned: xp_from_sql(xp_earned)?,
            updated_at: parse_timestamp(&updated_at)?,
            synced,
          })),
          None => Ok(None),
        }
      })
      .await
  }

  async fn put_progress_and_enqueue(
    &self,
    record: &ProgressRecord,
    kind: &str,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<u64, StoreError> {
    let record = record.clone();
    let xp_earned = xp_to_sql(record.xp_earned)?;
    let kind = kind.to_string();
    let payload = serde_json::to_vec(payload)?;
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        upsert_progress(&tx, &record, xp_earned)?;
        tx.execute(
          "INSERT INTO outbox (kind, payload, enqueued_at) VALUES (?, ?, ?)",
          params![kind, payload, format_timestamp(enqueued_at)],
        )?;
        let id = tx.last_insert_rowid() as u64;
        tx.commit()?;
        Ok(id)
      })
      .await
  }

  async fn mark_progress_synced(
    &self,
    item_id: &str,
    updated_at: DateTime<Utc>,
  ) -> Result<bool, StoreError> {
    let item_id = item_id.to_string();
    self
      .db
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE progress SET synced = 1 WHERE item_id = ? AND updated_at = ?",
          params![item_id, format_timestamp(updated_at)],
        )?;
        Ok(changed > 0)
      })
      .await
  }

  async fn put_catalog_item(&self, item: &CachedLessonItem) -> Result<(), StoreError> {
    let data = serde_json::to_vec(item)?;
    let id = item.id.clone();
    let subject = item.subject.clone();
    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO catalog (id, subject, data, cached_at)
           VALUES (?, ?, ?, datetime('now'))",
          params![id, subject, data],
        )?;
        Ok(())
      })
      .await
  }

  async fn get_all_catalog_items(&self) -> Result<Vec<CachedLessonItem>, StoreError> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT data FROM catalog ORDER BY id")?;
        let rows = stmt
          .query_map([], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        decode_items(rows)
      })
      .await
  }

  async fn get_catalog_by_subject(
    &self,
    subject: &str,
  ) -> Result<Vec<CachedLessonItem>, StoreError> {
    let subject = subject.to_string();
    self
      .db
      .call(move |conn| {
        let mut stmt = conn.prepare("SELECT data FROM catalog WHERE subject = ? ORDER BY id")?;
        let rows = stmt
          .query_map(params![subject], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        decode_items(rows)
      })
      .await
  }

  async fn append_outbox_entry(
    &self,
    kind: &str,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<u64, StoreError> {
    let kind = kind.to_string();
    let payload = serde_json::to_vec(payload)?;
    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT INTO outbox (kind, payload, enqueued_at) VALUES (?, ?, ?)",
          params![kind, payload, format_timestamp(enqueued_at)],
        )?;
        Ok(conn.last_insert_rowid() as u64)
      })
      .await
  }

  async fn list_outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
    self
      .db
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT id, kind, payload, enqueued_at FROM outbox ORDER BY id")?;
        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, Vec<u8>>(2)?,
              row.get::<_, String>(3)?,
            ))
          })?
          .collect::<Result<Vec<_>, _>>()?;

        rows
          .into_iter()
          .map(|(id, kind, payload, enqueued_at)| {
            // Undecodable JSON is kept as a string so the drainer can drop it as poison.
            let payload = serde_json::from_slice(&payload)
              .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&payload).into_owned()));
            Ok::<_, StoreError>(OutboxEntry {
              id: id as u64,
              kind,
              payload,
              enqueued_at: parse_timestamp(&enqueued_at)?,
            })
          })
          .collect()
      })
      .await
  }

  async fn delete_outbox_entry(&self, id: u64) -> Result<(), StoreError> {
    self
      .db
      .call(move |conn| {
        conn.execute("DELETE FROM outbox WHERE id = ?", params![id as i64])?;
        Ok(())
      })
      .await
  }

  async fn put_profile(&self, id: &str, data: &Value) -> Result<(), StoreError> {
    let id = id.to_string();
    let data = serde_json::to_vec(data)?;
    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO profile (id, data) VALUES (?, ?)",
          params![id, data],
        )?;
        Ok(())
      })
      .await
  }

  async fn get_profile(&self, id: &str) -> Result<Option<Value>, StoreError> {
    let id = id.to_string();
    self
      .db
      .call(move |conn| {
        let data: Option<Vec<u8>> = conn
          .query_row("SELECT data FROM profile WHERE id = ?", params![id], |row| row.get(0))
          .optional()?;
        match data {
          Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
          None => Ok(None),
        }
      })
      .await
  }

  async fn close(&self) -> Result<(), StoreError> {
    let others = self.db.handle_count().saturating_sub(1);
    self
      .db
      .call(|conn| {
        conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
      })
      .await?;
    if others > 0 {
      debug!(others, "database still shared, connection stays open");
    }
    Ok(())
  }

  fn name(&self) -> &'static str {
    "sqlite"
  }
}

fn upsert_progress(
  conn: &Connection,
  record: &ProgressRecord,
  xp_earned: i64,
) -> Result<(), StoreError> {
  conn.execute(
    "INSERT OR REPLACE INTO progress (item_id, progress, xp_earned, updated_at, synced)
     VALUES (?, ?, ?, ?, ?)",
    params![
      record.item_id,
      record.progress,
      xp_earned,
      format_timestamp(record.updated_at),
      record.synced
    ],
  )?;
  Ok(())
}

/// SQLite integers are signed; refuse what would wrap.
fn xp_to_sql(xp: u64) -> Result<i64, StoreError> {
  i64::try_from(xp)
    .map_err(|_| StoreError::InvalidRecord(format!("xp_earned {} does not fit in storage", xp)))
}

fn xp_from_sql(xp: i64) -> Result<u64, StoreError> {
  u64::try_from(xp).map_err(|_| StoreError::Backend(format!("stored xp_earned {} is negative", xp)))
}

fn decode_items(rows: Vec<Vec<u8>>) -> Result<Vec<CachedLessonItem>, StoreError> {
  rows
    .iter()
    .map(|data| serde_json::from_slice(data).map_err(StoreError::from))
    .collect()
}

/// Format a timestamp the same way serde does, so stored and serialized
/// values compare equal.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Backend(format!("failed to parse timestamp '{}': {}", s, e)))
}
