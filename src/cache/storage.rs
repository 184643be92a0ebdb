//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{RequestIdentity, StoredResponse};
use crate::net::ResponseType;

/// Summary of one stored cache generation.
#[derive(Debug, Clone)]
pub struct GenerationInfo {
  pub name: String,
  pub created_at: DateTime<Utc>,
  pub entries: usize,
}

/// Trait for cache storage backends.
///
/// Every entry lives inside a named generation. Writes for a single identity
/// replace the previous entry atomically.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, generation: &str) -> Result<()>;

  /// Get the stored response for an identity.
  fn lookup(&self, generation: &str, identity: &RequestIdentity)
    -> Result<Option<StoredResponse>>;

  /// Store a response, replacing any previous entry for the identity.
  fn store(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    response: &StoredResponse,
  ) -> Result<()>;

  /// Store several responses in one transaction: all or nothing.
  fn store_all(
    &self,
    generation: &str,
    entries: &[(RequestIdentity, StoredResponse)],
  ) -> Result<()>;

  /// List known generations.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Whether background fetches can persist into this storage.
  fn supports_background_fetch(&self) -> bool;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn open_generation(&self, _generation: &str) -> Result<()> {
    Ok(())
  }

  fn lookup(
    &self,
    _generation: &str,
    _identity: &RequestIdentity,
  ) -> Result<Option<StoredResponse>> {
    Ok(None) // Always miss
  }

  fn store(
    &self,
    _generation: &str,
    _identity: &RequestIdentity,
    _response: &StoredResponse,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn store_all(
    &self,
    _generation: &str,
    _entries: &[(RequestIdentity, StoredResponse)],
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    Ok(Vec::new())
  }

  fn supports_background_fetch(&self) -> bool {
    false
  }
}

/// Storage whose writes always fail, as when the disk quota is exhausted.
/// Reads and generation bookkeeping go to an in-memory SQLite database.
#[cfg(test)]
pub struct FullDiskStorage {
  inner: SqliteStorage,
}

#[cfg(test)]
impl FullDiskStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
    }
  }
}

#[cfg(test)]
impl CacheStorage for FullDiskStorage {
  fn open_generation(&self, generation: &str) -> Result<()> {
    self.inner.open_generation(generation)
  }

  fn lookup(
    &self,
    generation: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<StoredResponse>> {
    self.inner.lookup(generation, identity)
  }

  fn store(
    &self,
    _generation: &str,
    identity: &RequestIdentity,
    _response: &StoredResponse,
  ) -> Result<()> {
    Err(eyre!("Failed to store response for {}: disk full", identity.url))
  }

  fn store_all(
    &self,
    _generation: &str,
    _entries: &[(RequestIdentity, StoredResponse)],
  ) -> Result<()> {
    Err(eyre!("Failed to begin transaction: disk full"))
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.inner.generations()
  }

  fn supports_background_fetch(&self) -> bool {
    true
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a storage that lives only as long as the process.
  #[allow(dead_code)]
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

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tilecache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per request identity per generation
CREATE TABLE IF NOT EXISTS responses (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (generation, request_key),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);
"#;

const UPSERT_RESPONSE: &str =
  "INSERT OR REPLACE INTO responses
     (generation, request_key, method, url, status, response_type, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn upsert(
  conn: &Connection,
  generation: &str,
  identity: &RequestIdentity,
  response: &StoredResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_RESPONSE,
      params![
        generation,
        identity.cache_key(),
        identity.method,
        identity.url,
        response.status,
        response.response_type.as_str(),
        headers,
        response.body,
        response.cached_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", identity.url, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_generation(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open cache generation '{}': {}", generation, e))?;

    Ok(())
  }

  fn lookup(
    &self,
    generation: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, response_type, headers, body, cached_at FROM responses
         WHERE generation = ? AND request_key = ?",
        params![generation, identity.cache_key()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", identity.url, e))?;

    let Some((status, response_type, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(StoredResponse {
      status,
      response_type: ResponseType::parse(&response_type)?,
      headers,
      body,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn store(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    response: &StoredResponse,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    upsert(&conn, generation, identity, response)
  }

  fn store_all(
    &self,
    generation: &str,
    entries: &[(RequestIdentity, StoredResponse)],
  ) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Rolled back on drop unless committed
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (identity, response) in entries {
      upsert(&tx, generation, identity, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.created_at, COUNT(r.request_key) FROM generations g
         LEFT JOIN responses r ON r.generation = g.name
         GROUP BY g.name
         ORDER BY g.created_at, g.name",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read generation: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, entries)| {
        Ok(GenerationInfo {
          name,
          created_at: parse_datetime(&created_at)?,
          entries: entries as usize,
        })
      })
      .collect()
  }

  fn supports_background_fetch(&self) -> bool {
    true
  }
}

/// Parse a datetime string written either by SQLite or by chrono.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }

  // SQLite's datetime('now') is "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::FetchRequest;

  fn identity(url: &str) -> RequestIdentity {
    RequestIdentity::from_request(&FetchRequest::parse(url).unwrap())
  }

  fn stored(body: &[u8]) -> StoredResponse {
    StoredResponse {
      status: 200,
      response_type: ResponseType::Cors,
      headers: vec![("content-type".to_string(), "image/png".to_string())],
      body: body.to_vec(),
      cached_at: Utc::now(),
    }
  }

  #[test]
  fn test_store_and_lookup() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    let id = identity("https://cdn.jsdelivr.net/a.png");

    assert!(storage.lookup("v1", &id).unwrap().is_none());

    storage.store("v1", &id, &stored(b"tile")).unwrap();
    let found = storage.lookup("v1", &id).unwrap().unwrap();
    assert_eq!(found.body, b"tile");
    assert_eq!(found.status, 200);
    assert_eq!(found.response_type, ResponseType::Cors);
    assert_eq!(found.headers[0].0, "content-type");
  }

  #[test]
  fn test_last_write_wins() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    let id = identity("https://cdn.jsdelivr.net/a.png");

    storage.store("v1", &id, &stored(b"first")).unwrap();
    storage.store("v1", &id, &stored(b"second")).unwrap();

    let found = storage.lookup("v1", &id).unwrap().unwrap();
    assert_eq!(found.body, b"second");
    assert_eq!(storage.generations().unwrap()[0].entries, 1);
  }

  #[test]
  fn test_generations_are_isolated() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.open_generation("v2").unwrap();
    let id = identity("https://cdn.jsdelivr.net/a.png");

    storage.store("v1", &id, &stored(b"old")).unwrap();
    assert!(storage.lookup("v2", &id).unwrap().is_none());
  }

  #[test]
  fn test_store_all_and_generation_listing() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.open_generation("v1").unwrap();

    let entries = vec![
      (identity("http://localhost:8080/"), stored(b"root")),
      (identity("http://localhost:8080/css/main.css"), stored(b"css")),
    ];
    storage.store_all("v1", &entries).unwrap();

    let generations = storage.generations().unwrap();
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].name, "v1");
    assert_eq!(generations[0].entries, 2);
  }

  #[test]
  fn test_store_all_rolls_back_on_failure() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();

    // Unknown generation violates the foreign key on the first insert
    let entries = vec![(identity("http://localhost:8080/"), stored(b"root"))];
    assert!(storage.store_all("missing", &entries).is_err());
    assert!(storage
      .lookup("missing", &entries[0].0)
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    let id = identity("https://cdn.jsdelivr.net/a.png");
    storage.store("v1", &id, &stored(b"tile")).unwrap();
    assert!(storage.lookup("v1", &id).unwrap().is_none());
    assert!(!storage.supports_background_fetch());
  }

  #[test]
  fn test_parse_datetime_formats() {
    assert!(parse_datetime("2024-01-02 03:04:05").is_ok());
    assert!(parse_datetime("2024-01-02T03:04:05+00:00").is_ok());
    assert!(parse_datetime("yesterday").is_err());
  }
}
