//! Table of open collections
//!
//! A [`CollectionRegistry`] is owned by whoever needs to share collection
//! handles (a long-running CLI session, a service). Handles are keyed by
//! the collection's name, lower-cased. Opening the same directory twice
//! returns the same handle; opening a second directory with a name that
//! is already taken fails.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub struct CollectionRegistry {
    open: Mutex<HashMap<String, Arc<Collection>>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a collection, or return the handle already open for its directory
    ///
    /// Fails with `CollectionNameInUse` when another directory with the
    /// same name is already open.
    pub fn open(&self, path: &Path) -> StoreResult<Arc<Collection>> {
        let root = fs::canonicalize(path)
            .map_err(|_| StoreError::CollectionNotFound { path: path.to_path_buf() })?;
        let mut open = self.lock();
        if let Some(collection) = open.values().find(|c| c.root() == root) {
            return Ok(Arc::clone(collection));
        }

        let collection = Collection::open(&root)?;
        let name = registry_name(collection.name());
        if let Some(existing) = open.get(&name) {
            let path = existing.root().to_path_buf();
            collection.close()?;
            return Err(StoreError::CollectionNameInUse { name, path });
        }

        let collection = Arc::new(collection);
        open.insert(name, Arc::clone(&collection));
        Ok(collection)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Collection>> {
        self.lock().get(&registry_name(name)).cloned()
    }

    /// Names of the open collections, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a collection from the registry and close it
    ///
    /// If other handles are still alive the backend is released when the
    /// last of them is dropped.
    pub fn close(&self, name: &str) -> StoreResult<()> {
        let collection = self
            .lock()
            .remove(&registry_name(name))
            .ok_or_else(|| StoreError::CollectionNotFound {
                path: name.into(),
            })?;
        close_handle(collection)
    }

    /// Close every open collection, reporting the first failure
    pub fn close_all(&self) -> StoreResult<()> {
        let drained: Vec<Arc<Collection>> = self.lock().drain().map(|(_, c)| c).collect();
        let mut first_error = None;
        for collection in drained {
            if let Err(e) = close_handle(collection) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Collection>>> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn close_handle(collection: Arc<Collection>) -> StoreResult<()> {
    match Arc::try_unwrap(collection) {
        Ok(collection) => collection.close(),
        Err(shared) => {
            debug!("Collection {} still in use; closing on last drop", shared.name());
            Ok(())
        }
    }
}

/// Registry key for a collection name or path: its last path segment, lower-cased
fn registry_name(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches(['/', '\\']);
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed);
    base.to_lowercase()
}
