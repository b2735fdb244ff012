//! Storage backend contract
//!
//! Defines the [`StorageBackend`] trait which every document backend
//! implements. The collection façade and everything layered above it
//! (CLI, interchange) program only against this trait.
//!
//! Keys passed to a backend may be raw; backends normalize them with
//! [`crate::keys::normalize`] before touching storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Which document backend a collection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Relational store with live and history tables
    Sql,
    /// One JSON file per key under a pairtree directory
    Pairtree,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sql => f.write_str("sql"),
            BackendKind::Pairtree => f.write_str("pairtree"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sql" | "sqlstore" => Ok(BackendKind::Sql),
            "pairtree" | "ptstore" => Ok(BackendKind::Pairtree),
            other => Err(StoreError::Unsupported {
                operation: "open",
                backend: other.to_string(),
            }),
        }
    }
}

/// One row of a record's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    /// JSON payload at this version; empty for the entry written by a delete
    pub payload: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub version: i64,
}

impl HistoryEntry {
    /// Whether this entry records the deletion of the key
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Operations every document backend provides
///
/// All calls block on disk or network I/O. Operations a backend cannot
/// support fail with [`StoreError::Unsupported`] rather than doing nothing.
pub trait StorageBackend: Send + Sync {
    /// Which kind of backend this is
    fn kind(&self) -> BackendKind;

    /// Store a new record. Fails with `DuplicateKey` if the key is live.
    fn create(&self, key: &str, payload: &[u8]) -> StoreResult<()>;

    /// Fetch a live record's payload
    fn read(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Replace a live record's payload. Fails with `NotFound` if absent.
    fn update(&self, key: &str, payload: &[u8]) -> StoreResult<()>;

    /// Remove a live record. Fails with `NotFound` if absent.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// All live keys, sorted
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Whether the key has a live record; false when the backend is unusable
    fn has_key(&self, key: &str) -> bool;

    /// Number of live records, or -1 when the backend cannot tell
    fn length(&self) -> i64;

    /// Audit trail for a key, oldest first
    fn history(&self, _key: &str) -> StoreResult<Vec<HistoryEntry>> {
        Err(self.unsupported("history"))
    }

    /// Payload of a specific historical version
    fn read_version(&self, _key: &str, _version: i64) -> StoreResult<Vec<u8>> {
        Err(self.unsupported("read_version"))
    }

    /// Keys whose last update falls in `[start, end)`, oldest update first
    fn updated_keys(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> StoreResult<Vec<String>> {
        Err(self.unsupported("updated_keys"))
    }

    /// Pass-through SQL; each row becomes a JSON object keyed by column name
    fn query(&self, _sql: &str) -> StoreResult<Vec<serde_json::Value>> {
        Err(self.unsupported("query"))
    }

    /// Release backend resources
    fn close(self: Box<Self>) -> StoreResult<()>;

    /// Build the `Unsupported` error for this backend
    fn unsupported(&self, operation: &'static str) -> StoreError {
        StoreError::Unsupported {
            operation,
            backend: self.kind().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_round_trip() {
        assert_eq!("sql".parse::<BackendKind>().unwrap(), BackendKind::Sql);
        assert_eq!(
            "Pairtree".parse::<BackendKind>().unwrap(),
            BackendKind::Pairtree
        );
        assert_eq!(BackendKind::Sql.to_string(), "sql");
        assert!("dynamo".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_serde() {
        let json = serde_json::to_string(&BackendKind::Pairtree).unwrap();
        assert_eq!(json, "\"pairtree\"");
    }

    #[test]
    fn test_tombstone() {
        let now = Utc::now();
        let entry = HistoryEntry {
            key: "freda".to_string(),
            payload: String::new(),
            created: now,
            updated: now,
            version: 3,
        };
        assert!(entry.is_tombstone());
    }
}
