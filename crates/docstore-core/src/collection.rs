//! Collection façade
//!
//! A collection is a directory (conventionally `<name>.ds`) holding its
//! settings in `collection.json`, a `codemeta.json` description, the
//! document backend's data and an attachment tree. [`Collection`] is the
//! entry point: it owns the active backend and the attachment manager and
//! forwards record operations to the backend unchanged.
//!
//! ## Usage
//!
//! ```ignore
//! let people = Collection::init(Path::new("people.ds"), InitOptions::default())?;
//! people.create("Freda", br#"{"name": "freda"}"#)?;
//! let freda = people.read_json("freda")?;
//! people.close()?;
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::attachments::{AttachmentManager, Versioning};
use crate::backend::{BackendKind, HistoryEntry, StorageBackend};
use crate::dsn::{ConnectionUri, PoolSettings, DEFAULT_CONNECTION};
use crate::error::{StoreError, StoreResult};
use crate::fsutil::atomic_write;
use crate::pairtree::PairtreeStore;
use crate::sql::SqlStore;

/// Settings file at the collection root
pub const METADATA_FILE: &str = "collection.json";

/// Descriptive metadata file at the collection root
pub const CODEMETA_FILE: &str = "codemeta.json";

/// Engine version recorded in new collections
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Persistent collection settings (`collection.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub name: String,
    pub backend: BackendKind,
    #[serde(default = "default_connection")]
    pub connection: String,
    #[serde(default = "default_true")]
    pub history: bool,
    #[serde(default)]
    pub versioning: Versioning,
    #[serde(default = "default_true")]
    pub serialize_attachment_writes: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub engine_version: String,
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

fn default_true() -> bool {
    true
}

/// Options for [`Collection::init`]
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub backend: BackendKind,
    /// Connection URI for the SQL backend; defaults to a sqlite file in the collection
    pub connection: Option<String>,
    pub history: bool,
    pub versioning: Versioning,
    pub serialize_attachment_writes: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sql,
            connection: None,
            history: true,
            versioning: Versioning::Off,
            serialize_attachment_writes: true,
        }
    }
}

/// An open collection
pub struct Collection {
    root: PathBuf,
    metadata: CollectionMetadata,
    backend: Box<dyn StorageBackend>,
    attachments: AttachmentManager,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("root", &self.root)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl Collection {
    /// Create a new collection at `path`
    ///
    /// Fails with `CollectionExists` if `path` already holds one. The
    /// backend is opened before any settings are written, so an
    /// unusable connection leaves no half-initialized collection behind.
    pub fn init(path: &Path, options: InitOptions) -> StoreResult<Self> {
        if path.join(METADATA_FILE).exists() {
            return Err(StoreError::CollectionExists {
                path: path.to_path_buf(),
            });
        }

        let created_dir = !path.exists();
        fs::create_dir_all(path).map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;

        let result = Self::init_in(path, options);
        if result.is_err() && created_dir {
            let _ = fs::remove_dir_all(path);
        }
        result
    }

    fn init_in(path: &Path, options: InitOptions) -> StoreResult<Self> {
        let root = fs::canonicalize(path).map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;
        let name = collection_name(&root);

        let connection = match options.backend {
            BackendKind::Sql => options
                .connection
                .unwrap_or_else(default_connection),
            BackendKind::Pairtree => String::new(),
        };

        let now = Utc::now();
        let metadata = CollectionMetadata {
            name,
            backend: options.backend,
            connection,
            history: options.history,
            versioning: options.versioning,
            serialize_attachment_writes: options.serialize_attachment_writes,
            created: now,
            updated: now,
            engine_version: ENGINE_VERSION.to_string(),
        };

        let backend = open_backend(&root, &metadata)?;
        write_metadata(&root, &metadata)?;
        write_codemeta(&root, &metadata)?;

        info!(
            "Initialized {} collection {} at {:?}",
            metadata.backend, metadata.name, root
        );
        Ok(Self::assemble(root, metadata, backend))
    }

    /// Open an existing collection
    pub fn open(path: &Path) -> StoreResult<Self> {
        let metadata_path = path.join(METADATA_FILE);
        let content = fs::read(&metadata_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::CollectionNotFound {
                path: path.to_path_buf(),
            },
            _ => StoreError::from_io_read(e, metadata_path.clone()),
        })?;
        let metadata: CollectionMetadata = serde_json::from_slice(&content)?;

        let root = fs::canonicalize(path).map_err(|e| StoreError::from_io_read(e, path.to_path_buf()))?;
        let backend = open_backend(&root, &metadata)?;

        info!("Opened collection {} at {:?}", metadata.name, root);
        Ok(Self::assemble(root, metadata, backend))
    }

    fn assemble(
        root: PathBuf,
        metadata: CollectionMetadata,
        backend: Box<dyn StorageBackend>,
    ) -> Self {
        let attachments = AttachmentManager::new(
            &root,
            metadata.versioning,
            metadata.serialize_attachment_writes,
        );
        Self {
            root,
            metadata,
            backend,
            attachments,
        }
    }

    /// Release the backend; the handle cannot be used afterwards
    pub fn close(self) -> StoreResult<()> {
        let name = self.metadata.name;
        self.backend.close()?;
        info!("Closed collection {}", name);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &CollectionMetadata {
        &self.metadata
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The collection's attachment manager
    pub fn attachments(&self) -> &AttachmentManager {
        &self.attachments
    }

    // ==================== Record Operations ====================

    /// Store a new record; the payload must be a JSON object
    pub fn create(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        validate_object(payload)?;
        self.backend.create(key, payload)
    }

    pub fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.backend.read(key)
    }

    /// Read a record and decode it
    pub fn read_json(&self, key: &str) -> StoreResult<Value> {
        let payload = self.backend.read(key)?;
        serde_json::from_slice(&payload).map_err(|e| StoreError::InvalidJson(e.to_string()))
    }

    /// Replace a record; the payload must be a JSON object
    pub fn update(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        validate_object(payload)?;
        self.backend.update(key, payload)
    }

    pub fn delete(&self, key: &str) -> StoreResult<()> {
        self.backend.delete(key)
    }

    pub fn keys(&self) -> StoreResult<Vec<String>> {
        self.backend.keys()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.backend.has_key(key)
    }

    /// Number of records, or -1 when the backend cannot tell
    pub fn length(&self) -> i64 {
        self.backend.length()
    }

    pub fn history(&self, key: &str) -> StoreResult<Vec<HistoryEntry>> {
        self.backend.history(key)
    }

    pub fn read_version(&self, key: &str, version: i64) -> StoreResult<Vec<u8>> {
        self.backend.read_version(key, version)
    }

    pub fn updated_keys(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<String>> {
        self.backend.updated_keys(start, end)
    }

    pub fn query(&self, sql: &str) -> StoreResult<Vec<Value>> {
        self.backend.query(sql)
    }
}

fn open_backend(root: &Path, metadata: &CollectionMetadata) -> StoreResult<Box<dyn StorageBackend>> {
    match metadata.backend {
        BackendKind::Sql => {
            let uri = ConnectionUri::parse(&metadata.connection)?;
            let store = SqlStore::open(
                root,
                &metadata.name,
                &uri,
                metadata.history,
                PoolSettings::default(),
            )?;
            Ok(Box::new(store))
        }
        BackendKind::Pairtree => Ok(Box::new(PairtreeStore::open(root)?)),
    }
}

fn collection_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "collection".to_string())
}

fn write_metadata(root: &Path, metadata: &CollectionMetadata) -> StoreResult<()> {
    let content = serde_json::to_vec_pretty(metadata)?;
    atomic_write(&root.join(METADATA_FILE), &content)?;
    debug!("Wrote {}", METADATA_FILE);
    Ok(())
}

fn write_codemeta(root: &Path, metadata: &CollectionMetadata) -> StoreResult<()> {
    let codemeta = json!({
        "@context": "https://w3id.org/codemeta/3.0",
        "@type": "Dataset",
        "name": metadata.name.strip_suffix(".ds").unwrap_or(&metadata.name),
        "dateCreated": metadata.created.format("%Y-%m-%d").to_string(),
        "dateModified": metadata.updated.format("%Y-%m-%d").to_string(),
        "softwareVersion": metadata.engine_version,
    });
    let content = serde_json::to_vec_pretty(&codemeta)?;
    atomic_write(&root.join(CODEMETA_FILE), &content)?;
    Ok(())
}

fn validate_object(payload: &[u8]) -> StoreResult<()> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| StoreError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(StoreError::InvalidJson(
            "record payload must be a JSON object".to_string(),
        ));
    }
    Ok(())
}
