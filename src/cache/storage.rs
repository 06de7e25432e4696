//! Cache storage backends: in-memory and SQLite.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CacheStore, CachedResponse, PendingTask, SyncQueue};
use crate::net::{Headers, Request, Response};

// ============================================================================
// In-memory storage
// ============================================================================

/// Storage that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
  partitions: Mutex<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
  queue: Mutex<MemoryQueue>,
  activated: Mutex<Option<String>>,
}

#[derive(Debug, Default)]
struct MemoryQueue {
  next_id: i64,
  tasks: Vec<PendingTask>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, name: &str) -> Result<()> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partitions.entry(name.to_string()).or_default();
    Ok(())
  }

  fn get(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
    let partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      partitions
        .get(name)
        .and_then(|entries| entries.get(key))
        .map(|cached| CachedResponse {
          response: cached.response.duplicate(),
          cached_at: cached.cached_at,
        }),
    )
  }

  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    partitions.entry(name.to_string()).or_default().insert(
      key.to_string(),
      CachedResponse {
        response: response.duplicate(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(String, &Response)]) -> Result<()> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let now = Utc::now();
    let partition = partitions.entry(name.to_string()).or_default();
    for (key, response) in entries {
      partition.insert(
        key.clone(),
        CachedResponse {
          response: response.duplicate(),
          cached_at: now,
        },
      );
    }
    Ok(())
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.remove(name).is_some())
  }

  fn list_store_names(&self) -> Result<Vec<String>> {
    let partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.keys().cloned().collect())
  }

  fn keys(&self, name: &str) -> Result<Vec<String>> {
    let partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .get(name)
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn activated_version(&self) -> Result<Option<String>> {
    let activated = self
      .activated
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(activated.clone())
  }

  fn set_activated_version(&self, version: &str) -> Result<()> {
    let mut activated = self
      .activated
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *activated = Some(version.to_string());
    Ok(())
  }
}

impl SyncQueue for MemoryStore {
  fn enqueue(&self, request: &Request) -> Result<i64> {
    let mut queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    queue.next_id += 1;
    let id = queue.next_id;
    queue.tasks.push(PendingTask {
      id,
      method: request.method,
      url: request.url.to_string(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      attempts: 0,
      queued_at: Utc::now(),
    });
    Ok(id)
  }

  fn pending(&self) -> Result<Vec<PendingTask>> {
    let queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(queue.tasks.clone())
  }

  fn remove(&self, id: i64) -> Result<()> {
    let mut queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    queue.tasks.retain(|task| task.id != id);
    Ok(())
  }

  fn record_attempt(&self, id: i64) -> Result<u32> {
    let mut queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let task = queue
      .tasks
      .iter_mut()
      .find(|task| task.id == id)
      .ok_or_else(|| eyre!("No pending sync task with id {}", id))?;
    task.attempts += 1;
    Ok(task.attempts)
  }
}

// ============================================================================
// SQLite storage
// ============================================================================

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Database that disappears with the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
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
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached request; key_hash covers partition + request key
CREATE TABLE IF NOT EXISTS entries (
    key_hash TEXT PRIMARY KEY,
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition);

-- Worker bookkeeping that must survive restarts (e.g. activated version)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Failed mutations awaiting background sync, replayed by ascending id
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    attempts INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const ACTIVATED_VERSION_KEY: &str = "activated_version";

/// Stable, fixed-length row key for an entry.
fn entry_hash(partition: &str, key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(partition.as_bytes());
  hasher.update([0u8]);
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// Upsert one entry, registering its partition.
fn insert_entry(conn: &Connection, name: &str, key: &str, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (key_hash, partition, request_key, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        entry_hash(name, key),
        name,
        key,
        response.status,
        response.status_text,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

  Ok(())
}

impl CacheStore for SqliteStore {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;

    Ok(())
  }

  fn get(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, status_text, headers, body, cached_at FROM entries
         WHERE key_hash = ?",
        params![entry_hash(name, key)],
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
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    match row {
      Some((status, status_text, headers, body, cached_at_str)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            status_text,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    insert_entry(&conn, name, key, response)
  }

  fn put_all(&self, name: &str, entries: &[(String, &Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for (key, response) in entries {
      insert_entry(&tx, name, key, response)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn list_store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn keys(&self, name: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM entries WHERE partition = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn activated_version(&self) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM meta WHERE key = ?",
        params![ACTIVATED_VERSION_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read activated version: {}", e))
  }

  fn set_activated_version(&self, version: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        params![ACTIVATED_VERSION_KEY, version],
      )
      .map_err(|e| eyre!("Failed to record activated version: {}", e))?;

    Ok(())
  }
}

impl SyncQueue for SqliteStore {
  fn enqueue(&self, request: &Request) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO sync_queue (method, url, headers, body, queued_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![
          request.method.as_str(),
          request.url.as_str(),
          headers,
          request.body
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", request.method, request.url, e))?;

    Ok(conn.last_insert_rowid())
  }

  fn pending(&self) -> Result<Vec<PendingTask>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, headers, body, attempts, queued_at FROM sync_queue
         ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    type Row = (i64, String, String, String, Option<Vec<u8>>, u32, String);
    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query sync queue: {}", e))?
      .collect::<rusqlite::Result<Vec<Row>>>()
      .map_err(|e| eyre!("Failed to read sync task: {}", e))?;

    rows
      .into_iter()
      .map(|(id, method, url, headers, body, attempts, queued_at)| {
        Ok(PendingTask {
          id,
          method: method.parse()?,
          url,
          headers: serde_json::from_str(&headers)
            .map_err(|e| eyre!("Failed to deserialize headers of task {}: {}", id, e))?,
          body,
          attempts,
          queued_at: parse_datetime(&queued_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove sync task {}: {}", id, e))?;

    Ok(())
  }

  fn record_attempt(&self, id: i64) -> Result<u32> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "UPDATE sync_queue SET attempts = attempts + 1 WHERE id = ? RETURNING attempts",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to record attempt for sync task {}: {}", id, e))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  use crate::net::Method;

  fn json_response(body: &str) -> Response {
    Response::new(200, body.as_bytes().to_vec()).with_header("Content-Type", "application/json")
  }

  fn post(path: &str, body: &str) -> Request {
    let url = Url::parse("http://localhost:3001").unwrap().join(path).unwrap();
    Request::get(url)
      .with_method(Method::Post)
      .with_header("Content-Type", "application/json")
      .with_body(body.as_bytes().to_vec())
  }

  fn stores() -> Vec<(&'static str, Box<dyn StoreUnderTest>)> {
    vec![
      ("memory", Box::new(MemoryStore::new()) as Box<dyn StoreUnderTest>),
      ("sqlite", Box::new(SqliteStore::open_in_memory().unwrap())),
    ]
  }

  trait StoreUnderTest: CacheStore + SyncQueue {}
  impl<T: CacheStore + SyncQueue> StoreUnderTest for T {}

  #[test]
  fn test_put_then_get() {
    for (label, store) in stores() {
      store.put("api-v1", "/api/products", &json_response("[1,2]")).unwrap();

      let cached = store.get("api-v1", "/api/products").unwrap().expect(label);
      assert_eq!(cached.response.status, 200, "{}", label);
      assert_eq!(cached.response.body, b"[1,2]", "{}", label);
      assert_eq!(cached.response.content_type(), Some("application/json"), "{}", label);

      assert!(store.get("api-v1", "/api/other").unwrap().is_none(), "{}", label);
      assert!(store.get("image-v1", "/api/products").unwrap().is_none(), "{}", label);
    }
  }

  #[test]
  fn test_put_overwrites_same_key() {
    for (label, store) in stores() {
      store.put("api-v1", "/api/products", &json_response("[1]")).unwrap();
      store.put("api-v1", "/api/products", &json_response("[1,2,3]")).unwrap();

      assert_eq!(store.keys("api-v1").unwrap(), vec!["/api/products"], "{}", label);
      let cached = store.get("api-v1", "/api/products").unwrap().unwrap();
      assert_eq!(cached.response.body, b"[1,2,3]", "{}", label);
    }
  }

  #[test]
  fn test_open_list_and_delete() {
    for (label, store) in stores() {
      store.open("static-v1").unwrap();
      store.open("static-v1").unwrap();
      store.put("static-v0", "/", &Response::new(200, b"old".to_vec())).unwrap();

      assert_eq!(
        store.list_store_names().unwrap(),
        vec!["static-v0", "static-v1"],
        "{}",
        label
      );

      assert!(store.delete_store("static-v0").unwrap(), "{}", label);
      assert!(!store.delete_store("static-v0").unwrap(), "{}", label);
      assert_eq!(store.list_store_names().unwrap(), vec!["static-v1"], "{}", label);
      assert!(store.get("static-v0", "/").unwrap().is_none(), "{}", label);
    }
  }

  #[test]
  fn test_put_all_writes_every_entry() {
    for (label, store) in stores() {
      let shell = Response::new(200, b"<html>shell</html>".to_vec());
      let manifest = json_response("{}");
      store
        .put_all(
          "static-v1",
          &[("/".to_string(), &shell), ("/manifest.json".to_string(), &manifest)],
        )
        .unwrap();

      assert_eq!(
        store.keys("static-v1").unwrap(),
        vec!["/", "/manifest.json"],
        "{}",
        label
      );
      assert_eq!(store.list_store_names().unwrap(), vec!["static-v1"], "{}", label);
    }
  }

  #[test]
  fn test_activated_version_round_trips() {
    for (label, store) in stores() {
      assert!(store.activated_version().unwrap().is_none(), "{}", label);
      store.set_activated_version("v0").unwrap();
      store.set_activated_version("v1").unwrap();
      assert_eq!(store.activated_version().unwrap().as_deref(), Some("v1"), "{}", label);
    }
  }

  #[test]
  fn test_queue_keeps_submission_order() {
    for (label, store) in stores() {
      let first = store.enqueue(&post("/api/quotes", r#"{"part":"A-1"}"#)).unwrap();
      let second = store.enqueue(&post("/api/quotes", r#"{"part":"B-2"}"#)).unwrap();

      let pending = store.pending().unwrap();
      assert_eq!(
        pending.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![first, second],
        "{}",
        label
      );
      assert_eq!(pending[0].method, Method::Post, "{}", label);
      assert_eq!(pending[0].body.as_deref(), Some(br#"{"part":"A-1"}"#.as_slice()), "{}", label);

      let request = pending[1].to_request().unwrap();
      assert_eq!(request.path(), "/api/quotes", "{}", label);
      assert_eq!(request.header("content-type"), Some("application/json"), "{}", label);

      store.remove(first).unwrap();
      assert_eq!(store.pending().unwrap().len(), 1, "{}", label);
    }
  }

  #[test]
  fn test_record_attempt_counts_up() {
    for (label, store) in stores() {
      let id = store.enqueue(&post("/api/quotes", "{}")).unwrap();

      assert_eq!(store.record_attempt(id).unwrap(), 1, "{}", label);
      assert_eq!(store.record_attempt(id).unwrap(), 2, "{}", label);
      assert_eq!(store.pending().unwrap()[0].attempts, 2, "{}", label);
      assert!(store.record_attempt(id + 100).is_err(), "{}", label);
    }
  }

  #[test]
  fn test_entry_hash_separates_partitions() {
    assert_ne!(entry_hash("api-v1", "/x"), entry_hash("image-v1", "/x"));
    assert_eq!(entry_hash("api-v1", "/x").len(), 64);
  }
}
