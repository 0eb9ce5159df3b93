/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Schema for the offline database (version 1).
pub const SCHEMA: &str = r#"
-- Cached lesson and quest definitions
CREATE TABLE IF NOT EXISTS catalog (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_catalog_subject ON catalog(subject);

-- One progress record per lesson/quest
CREATE TABLE IF NOT EXISTS progress (
    item_id TEXT PRIMARY KEY,
    progress REAL NOT NULL,
    xp_earned INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    synced INTEGER NOT NULL
);

-- Writes deferred while offline, drained in id order
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);

-- Auxiliary profile data
CREATE TABLE IF NOT EXISTS profile (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL
);

-- Named response cache partitions
CREATE TABLE IF NOT EXISTS response_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS response_cache (
    partition_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition_name, request_key),
    FOREIGN KEY (partition_name) REFERENCES response_partitions(name) ON DELETE CASCADE
);
"#;
