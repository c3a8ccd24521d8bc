//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::Collection;

/// One stored row: serialized JSON plus its write time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
  pub key: String,
  pub data: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Backends report every failure; swallowing them is the job of
/// [`DurableStore`](super::durable::DurableStore).
pub trait CacheStorage: Send + Sync {
  /// Get one entry, expired or not.
  fn get(&self, collection: Collection, key: &str) -> Result<Option<RawEntry>>;

  /// Insert or replace one entry.
  fn put(&self, collection: Collection, entry: &RawEntry) -> Result<()>;

  /// Every entry in a collection, in no particular order.
  fn get_all(&self, collection: Collection) -> Result<Vec<RawEntry>>;

  /// Remove every entry in a collection.
  fn clear(&self, collection: Collection) -> Result<()>;

  /// Swap the whole content of a collection for `entries`.
  fn replace_all(&self, collection: Collection, entries: &[RawEntry]) -> Result<()> {
    self.clear(collection)?;
    for entry in entries {
      self.put(collection, entry)?;
    }
    Ok(())
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _collection: Collection, _key: &str) -> Result<Option<RawEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _collection: Collection, _entry: &RawEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn get_all(&self, _collection: Collection) -> Result<Vec<RawEntry>> {
    Ok(Vec::new())
  }

  fn clear(&self, _collection: Collection) -> Result<()> {
    Ok(())
  }

  fn replace_all(&self, _collection: Collection, _entries: &[RawEntry]) -> Result<()> {
    Ok(())
  }
}

/// Bump when the table layout changes. Older cache files are rebuilt.
const SCHEMA_VERSION: i64 = 1;

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS cache_entries (
    collection TEXT NOT NULL REFERENCES collections(name),
    entry_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (collection, entry_key)
);
"#;

const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS cache_entries;
DROP TABLE IF EXISTS collections;
"#;

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Cache that lives only as long as this value. Handy for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Default database path for a given API base URL.
  ///
  /// Different backends get different files so their data never mixes.
  pub fn default_path(base_url: &str) -> Result<PathBuf> {
    use sha2::{Digest, Sha256};

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    let digest = Sha256::digest(base_url.trim_end_matches('/').as_bytes());
    let tag = &hex::encode(digest)[..12];

    Ok(data_dir.join("befa").join(format!("cache-{}.db", tag)))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read cache schema version: {}", e))?;

    if version != 0 && version != SCHEMA_VERSION {
      tracing::info!(from = version, to = SCHEMA_VERSION, "rebuilding cache schema");
      conn
        .execute_batch(DROP_SCHEMA)
        .map_err(|e| eyre!("Failed to drop old cache tables: {}", e))?;
    }

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    for collection in Collection::ALL {
      conn
        .execute(
          "INSERT OR IGNORE INTO collections (name) VALUES (?)",
          params![collection.as_str()],
        )
        .map_err(|e| eyre!("Failed to create collection {}: {}", collection, e))?;
    }

    conn
      .execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
      .map_err(|e| eyre!("Failed to set cache schema version: {}", e))?;

    Ok(())
  }
}

fn put_row(conn: &Connection, collection: Collection, entry: &RawEntry) -> Result<()> {
  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (collection, entry_key, data, stored_at)
       VALUES (?, ?, ?, ?)",
      params![
        collection.as_str(),
        entry.key,
        entry.data,
        entry.stored_at.timestamp_millis()
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}/{}: {}", collection, entry.key, e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn get(&self, collection: Collection, key: &str) -> Result<Option<RawEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, i64)> = conn
      .query_row(
        "SELECT data, stored_at FROM cache_entries
         WHERE collection = ? AND entry_key = ?",
        params![collection.as_str(), key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}/{}: {}", collection, key, e))?;

    match row {
      Some((data, stored_at)) => Ok(Some(RawEntry {
        key: key.to_string(),
        data,
        stored_at: parse_millis(stored_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, collection: Collection, entry: &RawEntry) -> Result<()> {
    let conn = self.lock()?;
    put_row(&conn, collection, entry)
  }

  fn get_all(&self, collection: Collection) -> Result<Vec<RawEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT entry_key, data, stored_at FROM cache_entries
         WHERE collection = ?",
      )
      .map_err(|e| eyre!("Failed to prepare collection query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, i64)> = stmt
      .query_map(params![collection.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to read collection {}: {}", collection, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read row in collection {}: {}", collection, e))?;

    rows
      .into_iter()
      .map(|(key, data, stored_at)| {
        Ok(RawEntry {
          key,
          data,
          stored_at: parse_millis(stored_at)?,
        })
      })
      .collect()
  }

  fn clear(&self, collection: Collection) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE collection = ?",
        params![collection.as_str()],
      )
      .map_err(|e| eyre!("Failed to clear collection {}: {}", collection, e))?;
    Ok(())
  }

  fn replace_all(&self, collection: Collection, entries: &[RawEntry]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE collection = ?",
      params![collection.as_str()],
    )
    .map_err(|e| eyre!("Failed to clear collection {}: {}", collection, e))?;

    for entry in entries {
      put_row(&tx, collection, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

fn parse_millis(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::<Utc>::from_timestamp_millis(ms)
    .ok_or_else(|| eyre!("Invalid cache timestamp {}", ms))
}
