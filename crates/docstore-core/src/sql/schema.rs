//! SQL schema for a collection
//!
//! Each collection gets a live table holding the current value of every
//! record and an append-only history table, both named after the
//! collection's base name.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Table names for one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub live: String,
    pub history: String,
}

impl TableNames {
    /// Derive table names from a collection name such as `people.ds`
    ///
    /// The `.ds` extension is dropped and anything that is not an ASCII
    /// alphanumeric becomes `_`. A leading digit gets a `_` prefix.
    pub fn for_collection(name: &str) -> Self {
        let base = name.strip_suffix(".ds").unwrap_or(name).to_lowercase();
        let mut live: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if live.is_empty() || live.starts_with(|c: char| c.is_ascii_digit()) {
            live.insert(0, '_');
        }
        let history = format!("{}_history", live);
        Self { live, history }
    }
}

/// Initialize the database schema
///
/// Every statement is idempotent, so re-running against an existing
/// collection is safe.
pub fn init_schema(conn: &Connection, tables: &TableNames) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Live records
        CREATE TABLE IF NOT EXISTS {live} (
            key VARCHAR(255) NOT NULL PRIMARY KEY,
            payload TEXT NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        );

        -- Append-only audit trail
        CREATE TABLE IF NOT EXISTS {history} (
            key VARCHAR(255) NOT NULL,
            payload TEXT NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (key, version)
        );

        -- Time-range scans over updates
        CREATE INDEX IF NOT EXISTS idx_{live}_updated ON {live}(updated);
        "#,
        live = tables.live,
        history = tables.history,
    ))?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection, tables: &TableNames) -> bool {
    let table_exists = |name: &str| -> bool {
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?")
            .and_then(|mut stmt| stmt.exists([name]))
            .unwrap_or(false)
    };

    if !table_exists("schema_info") || !table_exists(&tables.live) || !table_exists(&tables.history)
    {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> TableNames {
        TableNames::for_collection("people.ds")
    }

    #[test]
    fn test_table_names() {
        let t = tables();
        assert_eq!(t.live, "people");
        assert_eq!(t.history, "people_history");

        let t = TableNames::for_collection("My-Data.v2.ds");
        assert_eq!(t.live, "my_data_v2");

        let t = TableNames::for_collection("2024.ds");
        assert_eq!(t.live, "_2024");
    }

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, &tables()).unwrap();

        let names: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(names.contains(&"people".to_string()));
        assert!(names.contains(&"people_history".to_string()));
        assert!(names.contains(&"schema_info".to_string()));
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, &tables()).unwrap();
        conn.execute(
            "INSERT INTO people (key, payload, created, updated) VALUES ('a', '{}', 0, 0)",
            [],
        )
        .unwrap();

        init_schema(&conn, &tables()).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_schema_version() {
        let conn = Connection::open_in_memory().unwrap();

        assert!(needs_init(&conn, &tables()));

        init_schema(&conn, &tables()).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert!(!needs_init(&conn, &tables()));

        // A different collection sharing the database still needs its tables
        assert!(needs_init(&conn, &TableNames::for_collection("other.ds")));
    }

    #[test]
    fn test_history_primary_key() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, &tables()).unwrap();

        let insert = "INSERT INTO people_history (key, payload, created, updated, version) VALUES ('a', '{}', 0, 0, 0)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
