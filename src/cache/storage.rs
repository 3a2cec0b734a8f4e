//! Cache storage trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::CacheError;

use super::traits::{CacheKind, CacheNamespace, Cacheable};

/// Every key this crate writes starts with this prefix, so a sweep can find
/// namespaces nobody remembers.
pub const CACHE_KEY_PREFIX: &str = "kpsync:";

/// A persisted record set.
#[derive(Debug, Clone)]
pub struct CachedSnapshot<T> {
  /// The cached records in server order
  pub records: Vec<T>,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Replace the snapshot for `(namespace, kind)`.
  fn save<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    kind: CacheKind,
    records: &[T],
  ) -> Result<(), CacheError>;

  /// Replace both snapshots of a namespace atomically: either both are
  /// written or neither is.
  fn save_pair<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    active: &[T],
    archived: &[T],
  ) -> Result<(), CacheError>;

  /// Read the snapshot for `(namespace, kind)`, if one was ever saved.
  fn load<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    kind: CacheKind,
  ) -> Result<Option<CachedSnapshot<T>>, CacheError>;

  /// Drop every snapshot in one namespace.
  fn clear(&self, namespace: &CacheNamespace) -> Result<(), CacheError>;

  /// Drop every snapshot under [`CACHE_KEY_PREFIX`]. Returns how many went.
  fn clear_all(&self) -> Result<usize, CacheError>;
}

/// Build the storage key for a snapshot.
pub fn snapshot_key(entity_type: &str, namespace: &CacheNamespace, kind: CacheKind) -> String {
  format!(
    "{}{}:{}:{}",
    CACHE_KEY_PREFIX,
    entity_type,
    namespace.segment(),
    kind.as_str()
  )
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache at the default location.
  pub fn open_default() -> Result<Self, CacheError> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    tracing::debug!(path = %path.display(), "opened cache database");
    Self::with_connection(conn)
  }

  /// Cache backed by an in-memory database. Does not survive the process.
  #[cfg(test)]
  pub(crate) fn open_in_memory() -> Result<Self, CacheError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, CacheError> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, CacheError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(CacheError::NoDataDir)?;

    Ok(data_dir.join("kpsync").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
    self.conn.lock().map_err(|_| CacheError::LockPoisoned)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<(), CacheError> {
    self.lock()?.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per (entity type, namespace, kind) snapshot
CREATE TABLE IF NOT EXISTS snapshot_cache (
    cache_key TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    kind TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_snapshot_cache_namespace
    ON snapshot_cache(namespace);

-- Snapshot members (preserves order)
CREATE TABLE IF NOT EXISTS snapshot_entries (
    cache_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (cache_key, position)
);
"#;

impl CacheStorage for SqliteStorage {
  fn save<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    kind: CacheKind,
    records: &[T],
  ) -> Result<(), CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    write_snapshot(&tx, namespace, kind, records)?;
    tx.commit()?;
    Ok(())
  }

  fn save_pair<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    active: &[T],
    archived: &[T],
  ) -> Result<(), CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    write_snapshot(&tx, namespace, CacheKind::Active, active)?;
    write_snapshot(&tx, namespace, CacheKind::Archived, archived)?;
    tx.commit()?;
    Ok(())
  }

  fn load<T: Cacheable>(
    &self,
    namespace: &CacheNamespace,
    kind: CacheKind,
  ) -> Result<Option<CachedSnapshot<T>>, CacheError> {
    let key = snapshot_key(T::entity_type(), namespace, kind);
    let conn = self.lock()?;

    let cached_at: Option<String> = conn
      .query_row(
        "SELECT cached_at FROM snapshot_cache WHERE cache_key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    let cached_at = match cached_at {
      Some(s) => parse_datetime(&s)?,
      None => return Ok(None),
    };

    let mut stmt = conn.prepare(
      "SELECT entity_key, data FROM snapshot_entries
       WHERE cache_key = ?
       ORDER BY position",
    )?;

    let rows = stmt
      .query_map(params![key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    let records = rows
      .into_iter()
      .filter_map(|(entity_key, data)| match serde_json::from_slice(&data) {
        Ok(record) => Some(record),
        Err(e) => {
          tracing::warn!(%key, %entity_key, error = %e, "skipping unreadable cache entry");
          None
        }
      })
      .collect();

    Ok(Some(CachedSnapshot { records, cached_at }))
  }

  fn clear(&self, namespace: &CacheNamespace) -> Result<(), CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM snapshot_entries WHERE cache_key IN
         (SELECT cache_key FROM snapshot_cache WHERE namespace = ?)",
      params![namespace.segment()],
    )?;
    tx.execute(
      "DELETE FROM snapshot_cache WHERE namespace = ?",
      params![namespace.segment()],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn clear_all(&self) -> Result<usize, CacheError> {
    let pattern = format!("{}%", CACHE_KEY_PREFIX);
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM snapshot_entries WHERE cache_key LIKE ?",
      params![pattern],
    )?;
    let removed = tx.execute(
      "DELETE FROM snapshot_cache WHERE cache_key LIKE ?",
      params![pattern],
    )?;
    tx.commit()?;
    Ok(removed)
  }
}

/// Replace one snapshot inside an open transaction. Dropping the transaction
/// without committing discards the write.
fn write_snapshot<T: Cacheable>(
  tx: &Transaction<'_>,
  namespace: &CacheNamespace,
  kind: CacheKind,
  records: &[T],
) -> Result<(), CacheError> {
  let key = snapshot_key(T::entity_type(), namespace, kind);

  tx.execute(
    "DELETE FROM snapshot_entries WHERE cache_key = ?",
    params![key],
  )?;

  tx.execute(
    "INSERT OR REPLACE INTO snapshot_cache (cache_key, namespace, kind, entity_type, record_count, cached_at)
     VALUES (?, ?, ?, ?, ?, datetime('now'))",
    params![
      key,
      namespace.segment(),
      kind.as_str(),
      T::entity_type(),
      records.len()
    ],
  )?;

  let mut insert = tx.prepare(
    "INSERT INTO snapshot_entries (cache_key, position, entity_key, data)
     VALUES (?, ?, ?, ?)",
  )?;
  for (position, record) in records.iter().enumerate() {
    let data = serde_json::to_vec(record)?;
    insert.execute(params![key, position, record.cache_key(), data])?;
  }
  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| CacheError::DateParse(format!("'{}': {}", s, e)))
}
