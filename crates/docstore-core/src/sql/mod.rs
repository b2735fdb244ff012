//! SQL-backed document store
//!
//! Records live in one table per collection; every successful mutation
//! also appends a row to the collection's history table (when history is
//! enabled). The live statement and its history statement run inside one
//! transaction, so the audit trail never diverges from the live data.
//!
//! ## Tables
//!
//! - `<base>` - live records: key, payload, created, updated, version
//! - `<base>_history` - append-only audit trail keyed by (key, version)
//! - `schema_info` - schema version tracking

pub mod pool;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::backend::{BackendKind, HistoryEntry, StorageBackend};
use crate::dsn::{ConnectionUri, Driver, PoolSettings};
use crate::error::{StoreError, StoreResult};
use crate::keys::normalize;

pub use pool::{ConnectionPool, PooledConnection};
pub use schema::{init_schema, needs_init, TableNames, SCHEMA_VERSION};

/// Document store over a relational database
pub struct SqlStore {
    tables: TableNames,
    history: bool,
    pool: ConnectionPool,
}

impl SqlStore {
    /// Connect to the collection's database and make sure its tables exist
    ///
    /// `root` is the collection directory; sqlite paths are resolved
    /// against it. Only the sqlite driver is compiled in.
    pub fn open(
        root: &Path,
        collection_name: &str,
        uri: &ConnectionUri,
        history: bool,
        settings: PoolSettings,
    ) -> StoreResult<Self> {
        let dsn = uri.driver_dsn(root);
        let path = match uri.driver {
            Driver::Sqlite if !dsn.is_empty() => PathBuf::from(dsn),
            Driver::Sqlite => return Err(StoreError::MalformedConnectionUri(uri.to_string())),
            Driver::Mysql | Driver::Postgres => {
                debug!("No {} driver compiled in", uri.driver);
                return Err(StoreError::Unsupported {
                    operation: "connect",
                    backend: format!("{} driver", uri.driver),
                });
            }
        };

        let tables = TableNames::for_collection(collection_name);
        let pool = ConnectionPool::open(&path, settings)?;
        {
            let conn = pool.get()?;
            if needs_init(&conn, &tables) {
                init_schema(&conn, &tables)?;
                info!("Initialized tables {} and {}", tables.live, tables.history);
            }
        }

        debug!("Opened sql store at {:?}", path);
        Ok(Self {
            tables,
            history,
            pool,
        })
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn history_enabled(&self) -> bool {
        self.history
    }

    /// Copy the current live row for `key` into the history table
    fn append_history(&self, tx: &Transaction, key: &str) -> StoreResult<()> {
        tx.execute(
            &format!(
                "INSERT INTO {history} (key, payload, created, updated, version) \
                 SELECT key, payload, created, updated, version FROM {live} WHERE key = ?1",
                history = self.tables.history,
                live = self.tables.live,
            ),
            params![key],
        )?;
        Ok(())
    }
}

impl StorageBackend for SqlStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn create(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        let key = normalize(key)?;
        let payload = payload_text(payload)?;
        let now = Utc::now().timestamp_millis();

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // a re-created key continues after its previous history
        let inserted = tx.execute(
            &format!(
                "INSERT INTO {live} (key, payload, created, updated, version) \
                 VALUES (?1, ?2, ?3, ?3, \
                 (SELECT COALESCE(MAX(version), -1) + 1 FROM {history} WHERE key = ?1))",
                live = self.tables.live,
                history = self.tables.history,
            ),
            params![key, payload, now],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                return Err(StoreError::DuplicateKey { key });
            }
            Err(e) => return Err(e.into()),
        }
        if self.history {
            self.append_history(&tx, &key)?;
        }
        tx.commit()?;

        debug!("Created record {}", key);
        Ok(())
    }

    fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        let key = normalize(key)?;
        let conn = self.pool.get()?;
        let payload: Option<String> = conn
            .query_row(
                &format!("SELECT payload FROM {} WHERE key = ?1", self.tables.live),
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(String::into_bytes)
            .ok_or(StoreError::NotFound { key })
    }

    fn update(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        let key = normalize(key)?;
        let payload = payload_text(payload)?;
        let now = Utc::now().timestamp_millis();

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // updated is set explicitly; sqlite has no on-update clause
        let changed = tx.execute(
            &format!(
                "UPDATE {} SET payload = ?1, updated = ?2, version = version + 1 WHERE key = ?3",
                self.tables.live
            ),
            params![payload, now, key],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { key });
        }
        if self.history {
            self.append_history(&tx, &key)?;
        }
        tx.commit()?;

        debug!("Updated record {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let key = normalize(key)?;
        let now = Utc::now().timestamp_millis();

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if self.history {
            // tombstone first: empty payload, next version
            tx.execute(
                &format!(
                    "INSERT INTO {history} (key, payload, created, updated, version) \
                     SELECT key, '', created, ?2, version + 1 FROM {live} WHERE key = ?1",
                    history = self.tables.history,
                    live = self.tables.live,
                ),
                params![key, now],
            )?;
        }
        let removed = tx.execute(
            &format!("DELETE FROM {} WHERE key = ?1", self.tables.live),
            params![key],
        )?;
        if removed == 0 {
            return Err(StoreError::NotFound { key });
        }
        tx.commit()?;

        debug!("Deleted record {}", key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key FROM {} ORDER BY key",
            self.tables.live
        ))?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn has_key(&self, key: &str) -> bool {
        let Ok(key) = normalize(key) else {
            return false;
        };
        let Ok(conn) = self.pool.get() else {
            return false;
        };
        let exists = conn
            .prepare(&format!("SELECT 1 FROM {} WHERE key = ?1", self.tables.live))
            .and_then(|mut stmt| stmt.exists(params![key]));
        exists.unwrap_or(false)
    }

    fn length(&self) -> i64 {
        let Ok(conn) = self.pool.get() else {
            return -1;
        };
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.tables.live),
            [],
            |row| row.get(0),
        );
        count.unwrap_or(-1)
    }

    fn history(&self, key: &str) -> StoreResult<Vec<HistoryEntry>> {
        let key = normalize(key)?;
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key, payload, created, updated, version FROM {} WHERE key = ?1 ORDER BY version",
            self.tables.history
        ))?;
        let entries = stmt
            .query_map(params![key], |row| {
                Ok(HistoryEntry {
                    key: row.get(0)?,
                    payload: row.get(1)?,
                    created: from_millis(row.get(2)?),
                    updated: from_millis(row.get(3)?),
                    version: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn read_version(&self, key: &str, version: i64) -> StoreResult<Vec<u8>> {
        let key = normalize(key)?;
        let conn = self.pool.get()?;
        let payload: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT payload FROM {} WHERE key = ?1 AND version = ?2",
                    self.tables.history
                ),
                params![key, version],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(p) if !p.is_empty() => Ok(p.into_bytes()),
            _ => Err(StoreError::NotFound { key }),
        }
    }

    fn updated_keys(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key FROM {} WHERE updated >= ?1 AND updated < ?2 ORDER BY updated, key",
            self.tables.live
        ))?;
        let keys = stmt
            .query_map(
                params![start.timestamp_millis(), end.timestamp_millis()],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn query(&self, sql: &str) -> StoreResult<Vec<Value>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (i, name) in columns.iter().enumerate() {
                object.insert(name.clone(), json_value(row.get_ref(i)?));
            }
            out.push(Value::Object(object));
        }
        Ok(out)
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        self.pool.close()?;
        debug!("Closed sql store {:?}", self.pool.path());
        Ok(())
    }
}

fn payload_text(payload: &[u8]) -> StoreResult<&str> {
    std::str::from_utf8(payload).map_err(|e| StoreError::InvalidJson(e.to_string()))
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir, history: bool) -> SqlStore {
        let uri = ConnectionUri::parse("sqlite://collection.db").unwrap();
        SqlStore::open(
            temp_dir.path(),
            "people.ds",
            &uri,
            history,
            PoolSettings::default(),
        )
        .unwrap()
    }

    fn json(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn parse(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_create_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        let value = serde_json::json!({"name": "freda", "age": 42, "tags": ["a", "b"]});
        store.create("freda", &json(value.clone())).unwrap();

        assert_eq!(parse(&store.read("freda").unwrap()), value);
        assert!(temp_dir.path().join("collection.db").exists());
    }

    #[test]
    fn test_duplicate_create_keeps_original() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        store
            .create("freda", &json(serde_json::json!({"v": 1})))
            .unwrap();
        let err = store
            .create("FREDA", &json(serde_json::json!({"v": 2})))
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateKey { ref key } if key == "freda"));
        assert_eq!(parse(&store.read("freda").unwrap())["v"], 1);
        assert_eq!(store.history("freda").unwrap().len(), 1);
    }

    #[test]
    fn test_update_missing_appends_no_history() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        let err = store.update("ghost", b"{}").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.history("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        assert!(matches!(
            store.delete("ghost"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.history("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_history_monotonic_with_tombstone() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        store.create("k", &json(serde_json::json!({"n": 0}))).unwrap();
        store.update("k", &json(serde_json::json!({"n": 1}))).unwrap();
        store.update("k", &json(serde_json::json!({"n": 2}))).unwrap();
        store.delete("k").unwrap();

        let history = store.history("k").unwrap();
        let versions: Vec<i64> = history.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![0, 1, 2, 3]);

        let last = history.last().unwrap();
        assert!(last.is_tombstone());
        assert!(history[..3].iter().all(|e| !e.is_tombstone()));

        // created is carried from the live row across every entry
        assert!(history.iter().all(|e| e.created == history[0].created));
        assert!(last.updated >= history[0].updated);
    }

    #[test]
    fn test_recreate_after_delete_continues_history() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        store.create("k", &json(serde_json::json!({"n": 0}))).unwrap();
        store.delete("k").unwrap();
        store.create("k", &json(serde_json::json!({"again": 1}))).unwrap();

        assert!(store.has_key("k"));
        assert_eq!(parse(&store.read("k").unwrap())["again"], 1);

        let history = store.history("k").unwrap();
        let versions: Vec<i64> = history.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![0, 1, 2]);
        assert!(history[1].is_tombstone());
        assert_eq!(parse(&store.read_version("k", 2).unwrap())["again"], 1);

        store.update("k", &json(serde_json::json!({"again": 2}))).unwrap();
        store.delete("k").unwrap();
        let versions: Vec<i64> = store.history("k").unwrap().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_recreate_without_history_starts_at_zero() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, false);

        store.create("k", b"{}").unwrap();
        store.delete("k").unwrap();
        store.create("k", b"{}").unwrap();

        let rows = store.query("SELECT version FROM people WHERE key = 'k'").unwrap();
        assert_eq!(rows, vec![serde_json::json!({"version": 0})]);
    }

    #[test]
    fn test_read_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        store.create("k", &json(serde_json::json!({"n": 0}))).unwrap();
        store.update("k", &json(serde_json::json!({"n": 1}))).unwrap();
        store.delete("k").unwrap();

        assert_eq!(parse(&store.read_version("k", 0).unwrap())["n"], 0);
        assert_eq!(parse(&store.read_version("k", 1).unwrap())["n"], 1);
        assert!(store.read_version("k", 2).is_err());
        assert!(store.read_version("k", 9).is_err());
    }

    #[test]
    fn test_live_version_column_tracks_updates() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        store.create("k", b"{}").unwrap();
        store.update("k", b"{\"a\":1}").unwrap();

        let rows = store.query("SELECT key, version FROM people").unwrap();
        assert_eq!(rows, vec![serde_json::json!({"key": "k", "version": 1})]);
    }

    #[test]
    fn test_history_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, false);

        store.create("k", b"{}").unwrap();
        store.update("k", b"{\"a\":1}").unwrap();
        store.delete("k").unwrap();

        assert!(store.history("k").unwrap().is_empty());
        assert!(!store.has_key("k"));
    }

    #[test]
    fn test_keys_sorted_and_length() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        for key in ["charlie", "Alpha", "bravo"] {
            store.create(key, b"{}").unwrap();
        }

        assert_eq!(store.keys().unwrap(), vec!["alpha", "bravo", "charlie"]);
        assert_eq!(store.length(), 3);
        assert!(store.has_key("ALPHA"));
        assert!(!store.has_key("delta"));
        assert!(!store.has_key("   "));
    }

    #[test]
    fn test_updated_keys_range() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        let before = Utc::now() - chrono::Duration::seconds(1);
        store.create("a", b"{}").unwrap();
        store.create("b", b"{}").unwrap();
        let after = Utc::now() + chrono::Duration::seconds(1);

        let mut keys = store.updated_keys(before, after).unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        let later = after + chrono::Duration::hours(1);
        assert!(store.updated_keys(after, later).unwrap().is_empty());
    }

    #[test]
    fn test_raw_query_maps_columns() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir, true);

        store.create("a", b"{\"x\":1}").unwrap();
        let rows = store
            .query("SELECT key, payload, 1.5 AS ratio, NULL AS nothing FROM people")
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["key"], "a");
        assert_eq!(rows[0]["payload"], "{\"x\":1}");
        assert_eq!(rows[0]["ratio"], 1.5);
        assert!(rows[0]["nothing"].is_null());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir, true);
            store.create("keep", b"{\"x\":1}").unwrap();
            Box::new(store).close().unwrap();
        }

        let store = open_store(&temp_dir, true);
        assert_eq!(store.keys().unwrap(), vec!["keep"]);
    }

    #[test]
    fn test_absolute_sqlite_dsn_outside_root() {
        let temp_dir = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let db = elsewhere.path().join("shared.db");
        let uri = ConnectionUri::parse(&format!("sqlite://{}", db.display())).unwrap();

        let store = SqlStore::open(
            temp_dir.path(),
            "people.ds",
            &uri,
            true,
            PoolSettings::default(),
        )
        .unwrap();
        store.create("k", b"{}").unwrap();

        assert!(db.is_file());
        assert!(!temp_dir.path().join("shared.db").exists());
    }

    #[test]
    fn test_server_drivers_unsupported() {
        let temp_dir = TempDir::new().unwrap();
        let uri = ConnectionUri::parse("postgres://localhost/people").unwrap();
        let result = SqlStore::open(
            temp_dir.path(),
            "people.ds",
            &uri,
            true,
            PoolSettings::default(),
        );
        assert!(matches!(result, Err(StoreError::Unsupported { .. })));
    }

    #[test]
    fn test_concurrent_create_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir, true));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.create("race", format!("{{\"i\":{}}}", i).as_bytes()))
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        assert_eq!(successes, 1);
        assert_eq!(store.history("race").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_mutations_keep_history_dense() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir, true));
        store.create("shared", b"{}").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..5 {
                        let payload = format!("{{\"t\":{},\"i\":{}}}", t, i);
                        store.update("shared", payload.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let versions: Vec<i64> = store
            .history("shared")
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, (0..=20).collect::<Vec<i64>>());

        let rows = store
            .query("SELECT version FROM people WHERE key = 'shared'")
            .unwrap();
        assert_eq!(rows, vec![serde_json::json!({"version": 20})]);
    }

    #[test]
    fn test_concurrent_delete_and_recreate() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&temp_dir, true));
        store.create("cycle", b"{}").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..5 {
                        // losers of each race see NotFound or DuplicateKey
                        let _ = store.delete("cycle");
                        let _ = store.create("cycle", b"{}");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let versions: Vec<i64> = store
            .history("cycle")
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        let expected: Vec<i64> = (0..versions.len() as i64).collect();
        assert_eq!(versions, expected);
    }
}
