//! Named, versioned partitions of cached responses.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::request::{Request, Response};
use crate::db::Database;
use crate::error::StoreError;
use crate::store::format_timestamp;

/// Storage for response copies, split into named partitions.
#[async_trait]
pub trait ResponseCache: Send + Sync {
  /// Create the partition if it doesn't exist yet.
  async fn open(&self, partition: &str) -> Result<(), StoreError>;

  /// Store a copy in `partition`, replacing any copy for the same request.
  async fn put(&self, partition: &str, request: &Request, response: &Response)
    -> Result<(), StoreError>;

  /// Find a copy in any partition, oldest partition first.
  async fn lookup(&self, request: &Request) -> Result<Option<Response>, StoreError>;

  /// Partition names in creation order.
  async fn partitions(&self) -> Result<Vec<String>, StoreError>;

  /// Remove a partition and everything in it. Returns whether it existed.
  async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError>;
}

/// Response cache kept in the offline database.
pub struct SqliteResponseCache {
  db: Database,
}

impl SqliteResponseCache {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

#[async_trait]
impl ResponseCache for SqliteResponseCache {
  async fn open(&self, partition: &str) -> Result<(), StoreError> {
    let partition = partition.to_string();
    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO response_partitions (name) VALUES (?)",
          params![partition],
        )?;
        Ok(())
      })
      .await
  }

  async fn put(
    &self,
    partition: &str,
    request: &Request,
    response: &Response,
  ) -> Result<(), StoreError> {
    let partition = partition.to_string();
    let key = request.cache_key();
    let url = request.url.to_string();
    let headers = serde_json::to_vec(&response.headers)?;
    let body = response.body.clone();
    let status = response.status;

    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO response_partitions (name) VALUES (?)",
          params![partition],
        )?;
        tx.execute(
          "INSERT OR REPLACE INTO response_cache
             (partition_name, request_key, url, status, headers, body, stored_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)",
          params![partition, key, url, status, headers, body, format_timestamp(Utc::now())],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn lookup(&self, request: &Request) -> Result<Option<Response>, StoreError> {
    let key = request.cache_key();
    self
      .db
      .call(move |conn| {
        let row: Option<(u16, Vec<u8>, Vec<u8>)> = conn
          .query_row(
            "SELECT rc.status, rc.headers, rc.body FROM response_cache rc
             INNER JOIN response_partitions rp ON rp.name = rc.partition_name
             WHERE rc.request_key = ?
             ORDER BY rp.rowid
             LIMIT 1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()?;

        match row {
          Some((status, headers, body)) => Ok(Some(Response {
            status,
            headers: serde_json::from_slice(&headers)?,
            body,
          })),
          None => Ok(None),
        }
      })
      .await
  }

  async fn partitions(&self) -> Result<Vec<String>, StoreError> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM response_partitions ORDER BY rowid")?;
        let names = stmt
          .query_map([], |row| row.get::<_, String>(0))?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
      })
      .await
  }

  async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError> {
    let partition = partition.to_string();
    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM response_cache WHERE partition_name = ?",
          params![partition],
        )?;
        let removed = tx.execute(
          "DELETE FROM response_partitions WHERE name = ?",
          params![partition],
        )?;
        tx.commit()?;
        Ok(removed > 0)
      })
      .await
  }
}

/// Response cache that lives only as long as the process.
#[derive(Default)]
pub struct MemoryResponseCache {
  partitions: RwLock<Vec<(String, HashMap<String, Response>)>>,
}

impl MemoryResponseCache {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
  async fn open(&self, partition: &str) -> Result<(), StoreError> {
    let mut partitions = self.partitions.write().await;
    if !partitions.iter().any(|(name, _)| name == partition) {
      partitions.push((partition.to_string(), HashMap::new()));
    }
    Ok(())
  }

  async fn put(
    &self,
    partition: &str,
    request: &Request,
    response: &Response,
  ) -> Result<(), StoreError> {
    let mut partitions = self.partitions.write().await;
    let index = match partitions.iter().position(|(name, _)| name == partition) {
      Some(index) => index,
      None => {
        partitions.push((partition.to_string(), HashMap::new()));
        partitions.len() - 1
      }
    };
    partitions[index]
      .1
      .insert(request.cache_key(), response.clone());
    Ok(())
  }

  async fn lookup(&self, request: &Request) -> Result<Option<Response>, StoreError> {
    let key = request.cache_key();
    let partitions = self.partitions.read().await;
    Ok(
      partitions
        .iter()
        .find_map(|(_, entries)| entries.get(&key))
        .cloned(),
    )
  }

  async fn partitions(&self) -> Result<Vec<String>, StoreError> {
    Ok(
      self
        .partitions
        .read()
        .await
        .iter()
        .map(|(name, _)| name.clone())
        .collect(),
    )
  }

  async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError> {
    let mut partitions = self.partitions.write().await;
    let before = partitions.len();
    partitions.retain(|(name, _)| name != partition);
    Ok(partitions.len() != before)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use url::Url;

  fn caches() -> Vec<Arc<dyn ResponseCache>> {
    vec![
      Arc::new(SqliteResponseCache::new(Database::open_in_memory().unwrap())),
      Arc::new(MemoryResponseCache::new()),
    ]
  }

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:3000").unwrap().join(path).unwrap())
  }

  #[tokio::test]
  async fn test_lookup_searches_partitions_in_creation_order() {
    for cache in caches() {
      cache.open("academy-static-v1").await.unwrap();
      cache
        .put("academy-dynamic-v1", &request("/"), &Response::new(200, "dynamic"))
        .await
        .unwrap();
      cache
        .put("academy-static-v1", &request("/"), &Response::new(200, "static"))
        .await
        .unwrap();

      let found = cache.lookup(&request("/")).await.unwrap().unwrap();
      assert_eq!(found.text(), "static");
      assert!(cache.lookup(&request("/missing")).await.unwrap().is_none());
      assert_eq!(
        cache.partitions().await.unwrap(),
        vec!["academy-static-v1", "academy-dynamic-v1"]
      );
    }
  }

  #[tokio::test]
  async fn test_put_replaces_and_keeps_headers() {
    for cache in caches() {
      let response = Response::new(200, "v1").with_header("etag", "a");
      cache.put("p", &request("/app.js"), &response).await.unwrap();
      let replaced = Response::new(200, "v2").with_header("etag", "b");
      cache.put("p", &request("/app.js"), &replaced).await.unwrap();

      assert_eq!(cache.lookup(&request("/app.js")).await.unwrap(), Some(replaced));
    }
  }

  #[tokio::test]
  async fn test_delete_partition_removes_entries() {
    for cache in caches() {
      cache
        .put("old-v0", &request("/logo.png"), &Response::new(200, "png"))
        .await
        .unwrap();
      assert!(cache.delete_partition("old-v0").await.unwrap());
      assert!(!cache.delete_partition("old-v0").await.unwrap());
      assert!(cache.lookup(&request("/logo.png")).await.unwrap().is_none());
      assert!(cache.partitions().await.unwrap().is_empty());
    }
  }
}
