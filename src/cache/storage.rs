//! Resource store trait and SQLite implementation.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::resource::Resource;
use crate::clock::Clock;
use crate::error::{Error, Result};

/// How long a writer waits on a database locked by another process.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "surveysync";

/// Trait for resource storage backends.
///
/// Every call is synchronous and completes before returning. Single-key
/// writes are atomic; there is no locking across processes sharing the same
/// substrate, so the last write wins.
pub trait ResourceStore: Send + Sync {
  /// Whether a resource is stored under `name`.
  fn exists(&self, name: &str) -> Result<bool>;

  /// Load the resource stored under `name`, or `Error::NotFound`.
  fn load(&self, name: &str) -> Result<Resource>;

  /// Overwrite the resource, stamping `timestamp` with the current time.
  /// Returns the record as stored.
  fn put(&self, resource: Resource) -> Result<Resource>;

  /// Remove the resource. Removing a missing name is not an error.
  fn delete(&self, name: &str) -> Result<()>;

  /// Names of every stored resource, sorted.
  fn list_names(&self) -> Result<Vec<String>>;

  /// Reattach a lifetime to a stored resource without touching its data or
  /// its timestamp.
  fn set_lifetime(&self, name: &str, lifetime: Option<i64>) -> Result<()>;

  /// Serialized size in bytes of every stored resource.
  fn usage(&self) -> Result<Vec<(String, usize)>>;

  /// Like `load`, with absence mapped to `None`.
  fn load_optional(&self, name: &str) -> Result<Option<Resource>> {
    match self.load(name) {
      Ok(resource) => Ok(Some(resource)),
      Err(Error::NotFound(_)) => Ok(None),
      Err(e) => Err(e),
    }
  }
}

/// SQLite-based resource store.
///
/// Rows are scoped by namespace so several stores can share one database
/// file without seeing each other's keys.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  namespace: String,
  clock: Arc<dyn Clock>,
}

impl SqliteStore {
  /// Open (creating if needed) the database at `path`.
  pub fn open(path: &Path, namespace: &str, clock: Arc<dyn Clock>) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::Storage(format!(
          "Failed to create data directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::Storage(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;
    conn
      .busy_timeout(BUSY_TIMEOUT)
      .map_err(|e| Error::Storage(format!("Failed to set busy timeout: {}", e)))?;

    Self::with_connection(conn, namespace, clock)
  }

  /// Private in-memory database; contents vanish when the store is dropped.
  pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::Storage(format!("Failed to open in-memory database: {}", e)))?;
    Self::with_connection(conn, DEFAULT_NAMESPACE, clock)
  }

  fn with_connection(conn: Connection, namespace: &str, clock: Arc<dyn Clock>) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
      namespace: namespace.to_string(),
      clock,
    };
    store.run_migrations()?;
    Ok(store)
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| Error::Storage(format!("Failed to run store migrations: {}", e)))
  }
}

/// Schema for the resource table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resources (
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    timestamp INTEGER,
    lifetime INTEGER,
    data BLOB NOT NULL,
    PRIMARY KEY (namespace, name)
);
"#;

impl ResourceStore for SqliteStore {
  fn exists(&self, name: &str) -> Result<bool> {
    let conn = self.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM resources WHERE namespace = ? AND name = ?",
        params![self.namespace, name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| Error::Storage(format!("Failed to look up {}: {}", name, e)))?;
    Ok(found.is_some())
  }

  fn load(&self, name: &str) -> Result<Resource> {
    let conn = self.conn()?;
    let row: Option<(Option<i64>, Option<i64>, Vec<u8>)> = conn
      .query_row(
        "SELECT timestamp, lifetime, data FROM resources WHERE namespace = ? AND name = ?",
        params![self.namespace, name],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| Error::Storage(format!("Failed to load {}: {}", name, e)))?;

    let (timestamp, lifetime, data) = row.ok_or_else(|| Error::NotFound(name.to_string()))?;
    let data = serde_json::from_slice(&data).map_err(|e| Error::InvalidResource {
      name: name.to_string(),
      reason: format!("stored data is not valid JSON: {}", e),
    })?;

    Ok(Resource {
      name: name.to_string(),
      timestamp,
      lifetime,
      data,
    })
  }

  fn put(&self, mut resource: Resource) -> Result<Resource> {
    resource.validate()?;
    resource.timestamp = Some(self.clock.now_millis());
    let data = serde_json::to_vec(&resource.data)?;

    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO resources (namespace, name, timestamp, lifetime, data)
         VALUES (?, ?, ?, ?, ?)",
        params![
          self.namespace,
          resource.name,
          resource.timestamp,
          resource.lifetime,
          data
        ],
      )
      .map_err(|e| Error::Storage(format!("Failed to store {}: {}", resource.name, e)))?;

    Ok(resource)
  }

  fn delete(&self, name: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "DELETE FROM resources WHERE namespace = ? AND name = ?",
        params![self.namespace, name],
      )
      .map_err(|e| Error::Storage(format!("Failed to delete {}: {}", name, e)))?;
    Ok(())
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM resources WHERE namespace = ? ORDER BY name")
      .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

    let names = stmt
      .query_map(params![self.namespace], |row| row.get(0))
      .map_err(|e| Error::Storage(format!("Failed to list resources: {}", e)))?
      .collect::<rusqlite::Result<Vec<String>>>()?;

    Ok(names)
  }

  fn set_lifetime(&self, name: &str, lifetime: Option<i64>) -> Result<()> {
    let conn = self.conn()?;
    let updated = conn
      .execute(
        "UPDATE resources SET lifetime = ? WHERE namespace = ? AND name = ?",
        params![lifetime, self.namespace, name],
      )
      .map_err(|e| Error::Storage(format!("Failed to update {}: {}", name, e)))?;

    if updated == 0 {
      return Err(Error::NotFound(name.to_string()));
    }
    Ok(())
  }

  fn usage(&self) -> Result<Vec<(String, usize)>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT name, length(name) + length(data) FROM resources
         WHERE namespace = ? ORDER BY name",
      )
      .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

    let usage = stmt
      .query_map(params![self.namespace], |row| {
        let name: String = row.get(0)?;
        let bytes: i64 = row.get(1)?;
        Ok((name, bytes.max(0) as usize))
      })
      .map_err(|e| Error::Storage(format!("Failed to measure usage: {}", e)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(usage)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use serde_json::json;

  fn memory_store() -> (SqliteStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(10_000));
    let store = SqliteStore::in_memory(clock.clone()).unwrap();
    (store, clock)
  }

  #[test]
  fn test_put_then_load_returns_latest_data() {
    let (store, clock) = memory_store();

    store
      .put(Resource::new("comments", json!({"1": "first"})))
      .unwrap();
    clock.advance(5);
    let stored = store
      .put(Resource::new("comments", json!({"1": "second"})).with_lifetime(Some(60)))
      .unwrap();

    assert_eq!(stored.timestamp, Some(10_005));
    let loaded = store.load("comments").unwrap();
    assert_eq!(loaded, stored);
    assert_eq!(loaded.data, json!({"1": "second"}));
  }

  #[test]
  fn test_put_stamps_timestamp_even_if_caller_set_one() {
    let (store, _clock) = memory_store();
    let mut resource = Resource::new("locations", json!([]));
    resource.timestamp = Some(1);

    let stored = store.put(resource).unwrap();
    assert_eq!(stored.timestamp, Some(10_000));
  }

  #[test]
  fn test_missing_resource() {
    let (store, _clock) = memory_store();
    assert!(!store.exists("nope").unwrap());
    assert!(matches!(store.load("nope"), Err(Error::NotFound(name)) if name == "nope"));
    assert!(store.load_optional("nope").unwrap().is_none());
    store.delete("nope").unwrap();
  }

  #[test]
  fn test_delete_and_list_names() {
    let (store, _clock) = memory_store();
    for name in ["b", "a", "c"] {
      store.put(Resource::new(name, json!(null))).unwrap();
    }
    assert_eq!(store.list_names().unwrap(), vec!["a", "b", "c"]);

    store.delete("b").unwrap();
    assert!(!store.exists("b").unwrap());
    assert_eq!(store.list_names().unwrap(), vec!["a", "c"]);
  }

  #[test]
  fn test_set_lifetime_keeps_data_and_timestamp() {
    let (store, clock) = memory_store();
    store
      .put(Resource::new("comments", json!({"k": 1})).with_lifetime(Some(10)))
      .unwrap();
    clock.advance(1_000);

    store.set_lifetime("comments", None).unwrap();
    let loaded = store.load("comments").unwrap();
    assert_eq!(loaded.lifetime, None);
    assert_eq!(loaded.timestamp, Some(10_000));
    assert_eq!(loaded.data, json!({"k": 1}));

    assert!(matches!(
      store.set_lifetime("missing", Some(1)),
      Err(Error::NotFound(_))
    ));
  }

  #[test]
  fn test_put_rejects_invalid_resource() {
    let (store, _clock) = memory_store();
    let result = store.put(Resource::new("", json!(1)));
    assert!(matches!(result, Err(Error::InvalidResource { .. })));
    assert!(store.list_names().unwrap().is_empty());
  }

  #[test]
  fn test_writes_visible_across_handles_on_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1));

    let first = SqliteStore::open(&path, "survey", clock.clone()).unwrap();
    let second = SqliteStore::open(&path, "survey", clock.clone()).unwrap();
    let other = SqliteStore::open(&path, "elsewhere", clock).unwrap();

    first.put(Resource::new("current", json!("response-1"))).unwrap();
    assert_eq!(second.load("current").unwrap().data, json!("response-1"));

    second.put(Resource::new("current", json!(null))).unwrap();
    assert_eq!(first.load("current").unwrap().data, json!(null));

    assert!(!other.exists("current").unwrap());
  }

  #[test]
  fn test_usage_reports_every_key() {
    let (store, _clock) = memory_store();
    store.put(Resource::new("a", json!("xyz"))).unwrap();
    store.put(Resource::new("bb", json!(1))).unwrap();

    let usage = store.usage().unwrap();
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0], ("a".to_string(), 1 + "\"xyz\"".len()));
    assert_eq!(usage[1], ("bb".to_string(), 2 + 1));
  }
}
