//! Storage error handling
//!
//! Every engine operation returns a [`StoreResult`]. Errors carry enough
//! context (key, filename, path, operation) for callers to log or surface
//! them. The engine never retries internally.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during collection, record and attachment operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Create on a key that already has a live record
    #[error("Key '{key}' already exists")]
    DuplicateKey { key: String },

    /// Read, update or delete on a key without a live record
    #[error("Key '{key}' not found")]
    NotFound { key: String },

    /// Attachment (or a specific version of it) is missing
    #[error("Attachment '{filename}'{} not found for key '{key}'", version_label(.version))]
    AttachmentNotFound {
        key: String,
        filename: String,
        version: Option<String>,
    },

    /// Version string is not `v?N.N[.N[suffix]]`
    #[error("Malformed version '{0}'")]
    MalformedVersion(String),

    /// Connection URI is not `driver://body` or names an unknown driver
    #[error("Malformed connection URI '{0}'")]
    MalformedConnectionUri(String),

    /// Operation is not available on the active backend
    #[error("'{operation}' is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: String,
    },

    /// Connection or filesystem level failure reported by the substrate
    #[error("Backend unavailable: {details}")]
    BackendUnavailable { details: String },

    /// Key is empty after normalization or contains unusable characters
    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    /// Attachment filename cannot be stored
    #[error("Invalid attachment filename '{0}'")]
    InvalidFilename(String),

    /// Payload is not a JSON object
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// Init on a path that already holds a collection
    #[error("Collection already exists at '{path}'")]
    CollectionExists { path: PathBuf },

    /// A registry already holds a different collection under this name
    #[error("A collection named '{name}' is already open at '{path}'")]
    CollectionNameInUse { name: String, path: PathBuf },

    /// Open on a path without collection metadata
    #[error("No collection found at '{path}'")]
    CollectionNotFound { path: PathBuf },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File or directory missing where one was expected
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Collection metadata could not be encoded or decoded
    #[error("Invalid collection metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn version_label(version: &Option<String>) -> String {
    match version {
        Some(v) => format!(" (version {})", v),
        None => String::new(),
    }
}

impl StoreError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path,
                source: error,
            },
            io::ErrorKind::NotFound => StoreError::FileNotFound { path },
            _ if is_disk_full_error(&error) => StoreError::DiskFull {
                path,
                source: error,
            },
            _ => StoreError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Like [`StoreError::from_io`] but for failures while reading
    pub fn from_io_read(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                Self::from_io(error, path)
            }
            _ => StoreError::ReadError {
                path,
                source: error,
            },
        }
    }

    /// Check if this is one of the "missing" kinds
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. }
                | StoreError::AttachmentNotFound { .. }
                | StoreError::FileNotFound { .. }
                | StoreError::CollectionNotFound { .. }
        )
    }

    /// Check if this error reports bad caller input rather than a storage fault
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateKey { .. }
                | StoreError::MalformedVersion(_)
                | StoreError::MalformedConnectionUri(_)
                | StoreError::InvalidKey(_)
                | StoreError::InvalidFilename(_)
                | StoreError::InvalidJson(_)
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::DiskFull { .. } => Some("Free up disk space and try again."),
            StoreError::PermissionDenied { .. } => {
                Some("Check file and directory permissions. You may need to run with different permissions or change ownership.")
            }
            StoreError::DuplicateKey { .. } => Some("Use update to change an existing record."),
            StoreError::CollectionNotFound { .. } => {
                Some("Check the collection path, or create it with init.")
            }
            StoreError::CollectionNameInUse { .. } => {
                Some("Close the open collection first, or rename one of the directories.")
            }
            StoreError::MalformedConnectionUri(_) => {
                Some("Connection strings look like sqlite://collection.db or postgres://user@host/db.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
