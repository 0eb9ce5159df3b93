pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::StoreError;

/// Shared SQLite connection for the offline database.
///
/// All access goes through [`Database::call`], which runs the closure on the
/// blocking thread pool while holding the connection lock, so callers see
/// committed states one at a time.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`, creating parent directories.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::StorageUnavailable(format!(
          "failed to create database directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::StorageUnavailable(format!(
        "failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let db = Self::from_connection(conn)?;
    info!(path = %path.display(), "opened offline database");
    Ok(db)
  }

  /// Open a private in-memory database. Nothing survives the process.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| StoreError::StorageUnavailable(format!("in-memory database: {}", e)))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    run_migrations(&conn)?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        StoreError::StorageUnavailable("could not determine data directory".to_string())
      })?;

    Ok(data_dir.join("safari-sync").join("offline.db"))
  }

  /// Number of live handles sharing this connection. It is closed when the
  /// last one is dropped.
  pub fn handle_count(&self) -> usize {
    Arc::strong_count(&self.conn)
  }

  /// Run `f` against the connection without blocking the async runtime.
  pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = conn
        .lock()
        .map_err(|e| StoreError::Backend(format!("lock poisoned: {}", e)))?;
      f(&mut guard)
    })
    .await
    .map_err(|e| StoreError::Backend(format!("storage task failed: {}", e)))?
  }
}

/// Create the schema on first run and check the stored version.
fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
  let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

  if version > schema::SCHEMA_VERSION {
    return Err(StoreError::SchemaVersion {
      found: version,
      supported: schema::SCHEMA_VERSION,
    });
  }

  conn.execute_batch(schema::SCHEMA)?;

  if version < schema::SCHEMA_VERSION {
    conn.execute_batch(&format!("PRAGMA user_version = {}", schema::SCHEMA_VERSION))?;
    debug!(from = version, to = schema::SCHEMA_VERSION, "migrated offline schema");
  }

  Ok(())
}
