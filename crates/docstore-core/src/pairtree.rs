//! File-tree document store
//!
//! Each record is a JSON file at
//! `<root>/pairtree/<fan_out_path(key)>/<key>.json`. Retained for
//! collections created before the SQL store existed; it keeps no history.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::{BackendKind, StorageBackend};
use crate::error::{StoreError, StoreResult};
use crate::fsutil::{atomic_write, remove_empty_dirs};
use crate::keys::{fan_out_path, key_and_payload_name, normalize};

/// Directory under the collection root holding the tree
pub const PAIRTREE_DIR: &str = "pairtree";

pub struct PairtreeStore {
    root: PathBuf,
}

impl PairtreeStore {
    /// Open the tree under a collection directory, creating it if needed
    pub fn open(collection_root: &Path) -> StoreResult<Self> {
        let root = collection_root.join(PAIRTREE_DIR);
        fs::create_dir_all(&root).map_err(|e| StoreError::from_io(e, root.clone()))?;
        Ok(Self { root })
    }

    /// Where the payload for a canonical key lives
    ///
    /// `x` and `x.json` name the same record.
    pub fn document_path(&self, key: &str) -> PathBuf {
        let (key, file_name) = key_and_payload_name(key);
        self.root.join(fan_out_path(&key)).join(file_name)
    }

    fn collect_keys(dir: &Path, keys: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_dir() {
                Self::collect_keys(&entry.path(), keys)?;
            } else if file_type.is_file() {
                // staging files end in .tmp and never match
                let (key, file_name) = key_and_payload_name(&name);
                if file_name == name {
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl StorageBackend for PairtreeStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Pairtree
    }

    fn create(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        let key = record_key(key)?;
        let path = self.document_path(&key);
        if path.exists() {
            return Err(StoreError::DuplicateKey { key });
        }
        atomic_write(&path, payload)?;
        debug!("Created record {} at {:?}", key, path);
        Ok(())
    }

    fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        let key = record_key(key)?;
        let path = self.document_path(&key);
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { key },
            _ => StoreError::from_io_read(e, path.clone()),
        })
    }

    fn update(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        let key = record_key(key)?;
        let path = self.document_path(&key);
        if !path.is_file() {
            return Err(StoreError::NotFound { key });
        }
        atomic_write(&path, payload)?;
        debug!("Updated record {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let key = record_key(key)?;
        let path = self.document_path(&key);
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { key: key.clone() },
            _ => StoreError::from_io(e, path.clone()),
        })?;
        if let Some(parent) = path.parent() {
            remove_empty_dirs(parent, &self.root);
        }
        debug!("Deleted record {}", key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        Self::collect_keys(&self.root, &mut keys)
            .map_err(|e| StoreError::from_io_read(e, self.root.clone()))?;
        keys.sort();
        Ok(keys)
    }

    fn has_key(&self, key: &str) -> bool {
        record_key(key)
            .map(|key| self.document_path(&key).is_file())
            .unwrap_or(false)
    }

    fn length(&self) -> i64 {
        self.keys().map(|keys| keys.len() as i64).unwrap_or(-1)
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

/// Canonical key with any payload suffix removed
fn record_key(raw: &str) -> StoreResult<String> {
    let key = normalize(raw)?;
    Ok(key_and_payload_name(&key).0)
}
