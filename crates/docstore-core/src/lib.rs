//! docstore core library
//!
//! A JSON-document storage engine. Keyed JSON objects ("records") are kept
//! in named collections backed by either a SQL database with an
//! append-only history table or a pairtree of JSON files. Arbitrary files
//! can be attached to records and versioned independently of them.
//!
//! # Quick Start
//!
//! ```text
//! let people = Collection::init(Path::new("people.ds"), InitOptions::default())?;
//!
//! people.create("Freda", br#"{"name": "freda"}"#)?;
//! let freda = people.read_json("freda")?;
//!
//! people.attachments().attach("freda", "photo.jpg", &mut file)?;
//! ```
//!
//! # Modules
//!
//! - `collection`: Collection façade (main entry point)
//! - `backend`: Storage backend contract
//! - `sql`: SQL-backed store with history
//! - `pairtree`: File-tree store
//! - `attachments`: Versioned attachments
//! - `keys`: Key normalization and fan-out paths
//! - `semver`: Semantic version allocation
//! - `registry`: Table of open collections
//! - `interchange`: JSON-lines dump and load
//! - `config`: Application configuration

pub mod attachments;
pub mod backend;
pub mod collection;
pub mod config;
pub mod dsn;
pub mod error;
pub mod fsutil;
pub mod interchange;
pub mod keys;
pub mod pairtree;
pub mod registry;
pub mod semver;
pub mod sql;

pub use attachments::{Attachment, AttachmentManager, Versioning};
pub use backend::{BackendKind, HistoryEntry, StorageBackend};
pub use collection::{Collection, CollectionMetadata, InitOptions};
pub use config::Config;
pub use dsn::{ConnectionUri, Driver, PoolSettings};
pub use error::{StoreError, StoreResult};
pub use pairtree::PairtreeStore;
pub use registry::CollectionRegistry;
pub use semver::{Increment, SemVer};
pub use sql::SqlStore;
