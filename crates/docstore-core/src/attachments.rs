//! Attachment manager
//!
//! Stores arbitrary files alongside records, independent of the document
//! backend, under `<collection>/attachments/<fan_out_path(key)>/obj/`.
//!
//! ## Layout
//!
//! ```text
//! attachments/<fan_out>/obj/<filename>               current version (file or symlink)
//! attachments/<fan_out>/obj/_/<filename>/<version>   version chain (versioned mode only)
//! ```
//!
//! Fan-out segments are at most two characters, so the `obj` leaf keeps a
//! key's files apart from the directories of longer keys sharing its prefix.
//!
//! With versioning on, every write allocates the next semantic version,
//! stages the payload into the chain and then swaps the top-level symlink
//! to point at it. The swap creates the new link under a temporary name
//! and renames it over the old one, which replaces it atomically on Unix.
//! On platforms without symlinks the current version is copied instead.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::fsutil::{atomic_write_from, checksum_file, remove_empty_dirs, staging_path, WrittenFile};
use crate::keys::{fan_out_path, normalize, VERSION_DIR};
use crate::semver::{Increment, SemVer};

/// Directory under the collection root holding attachments
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Leaf directory holding one key's files below its fan-out path
pub const OBJECT_DIR: &str = "obj";

/// Collection-level attachment versioning setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Versioning {
    /// Writes overwrite the single stored copy
    #[default]
    Off,
    Major,
    Minor,
    Patch,
}

impl Versioning {
    /// The increment applied on each write, if versioning is on
    pub fn increment(self) -> Option<Increment> {
        match self {
            Versioning::Off => None,
            Versioning::Major => Some(Increment::Major),
            Versioning::Minor => Some(Increment::Minor),
            Versioning::Patch => Some(Increment::Patch),
        }
    }
}

impl FromStr for Versioning {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "off" | "none" | "false" => Ok(Versioning::Off),
            other => Ok(match other.parse::<Increment>()? {
                Increment::Major => Versioning::Major,
                Increment::Minor => Versioning::Minor,
                Increment::Patch => Versioning::Patch,
            }),
        }
    }
}

impl fmt::Display for Versioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.increment() {
            Some(increment) => increment.fmt(f),
            None => f.write_str("off"),
        }
    }
}

/// Description of a stored attachment
///
/// Callers may persist this alongside the record; the manager itself never
/// verifies checksums on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    /// Size in bytes of the current version
    pub size: u64,
    /// SHA-256 (hex) of the current version
    pub checksum: String,
    /// Current version, absent when versioning is off
    pub version: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Stored path of every version, relative to the collection root
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub version_paths: BTreeMap<String, String>,
    /// Checksums of the versions hashed by the call that built this value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub version_checksums: BTreeMap<String, String>,
}

/// Manages the attachment tree of one collection
pub struct AttachmentManager {
    collection_root: PathBuf,
    root: PathBuf,
    versioning: Versioning,
    serialize_writes: bool,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AttachmentManager {
    /// Create a manager for the collection at `collection_root`
    ///
    /// With `serialize_writes`, writes and prunes for the same
    /// `(key, filename)` are serialized so concurrent writers cannot
    /// allocate the same version.
    pub fn new(collection_root: &Path, versioning: Versioning, serialize_writes: bool) -> Self {
        Self {
            collection_root: collection_root.to_path_buf(),
            root: collection_root.join(ATTACHMENTS_DIR),
            versioning,
            serialize_writes,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn versioning(&self) -> Versioning {
        self.versioning
    }

    /// Directory holding the attachments of a key
    pub fn key_dir(&self, key: &str) -> StoreResult<PathBuf> {
        let key = normalize(key)?;
        Ok(self.dir_for(&key))
    }

    fn dir_for(&self, key: &str) -> PathBuf {
        self.root.join(fan_out_path(key)).join(OBJECT_DIR)
    }

    /// Store a file, allocating the next version when versioning is on
    pub fn attach<R: Read + ?Sized>(
        &self,
        key: &str,
        filename: &str,
        reader: &mut R,
    ) -> StoreResult<Attachment> {
        let key = normalize(key)?;
        validate_filename(filename)?;
        let dir = self.dir_for(&key);

        self.with_write_lock(&key, filename, || match self.versioning.increment() {
            None => {
                let path = dir.join(filename);
                let written = atomic_write_from(&path, reader)?;
                debug!("Attached {} to {}", filename, key);
                self.describe(&dir, filename, None, &written)
            }
            Some(increment) => {
                let chain = dir.join(VERSION_DIR).join(filename);
                let current = highest_version(&chain)?;
                let next = SemVer::next(current.as_ref(), increment)?.to_string();
                self.write_version(&key, &dir, filename, &next, reader)
            }
        })
    }

    /// Store a file under an explicit version and make it current
    pub fn attach_at_version<R: Read + ?Sized>(
        &self,
        key: &str,
        filename: &str,
        version: &str,
        reader: &mut R,
    ) -> StoreResult<Attachment> {
        if self.versioning == Versioning::Off {
            return Err(StoreError::Unsupported {
                operation: "attach_at_version",
                backend: "unversioned attachment".to_string(),
            });
        }
        let key = normalize(key)?;
        validate_filename(filename)?;
        let version = SemVer::parse(version)?.to_string();
        let dir = self.dir_for(&key);

        self.with_write_lock(&key, filename, || {
            self.write_version(&key, &dir, filename, &version, reader)
        })
    }

    /// Filenames attached to a key (the version chain is excluded)
    pub fn list(&self, key: &str) -> StoreResult<Vec<String>> {
        let dir = self.key_dir(key)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::from_io_read(e, dir)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::from_io_read(e, dir.clone()))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::from_io_read(e, entry.path()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // the only directory is the version chain
            if (file_type.is_file() || file_type.is_symlink()) && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Versions stored for a file, in numeric order
    pub fn list_versions(&self, key: &str, filename: &str) -> StoreResult<Vec<String>> {
        validate_filename(filename)?;
        let chain = self.key_dir(key)?.join(VERSION_DIR).join(filename);
        Ok(versions_in(&chain)?
            .into_iter()
            .map(|v| v.to_string())
            .collect())
    }

    /// Open the current version of a file
    pub fn read(&self, key: &str, filename: &str) -> StoreResult<File> {
        validate_filename(filename)?;
        let path = self.key_dir(key)?.join(filename);
        open_attachment(&path, key, filename, None)
    }

    /// Open a specific version, bypassing the current-version link
    pub fn read_version(&self, key: &str, filename: &str, version: &str) -> StoreResult<File> {
        validate_filename(filename)?;
        let version = SemVer::parse(version)?.to_string();
        let path = self
            .key_dir(key)?
            .join(VERSION_DIR)
            .join(filename)
            .join(&version);
        open_attachment(&path, key, filename, Some(version))
    }

    /// Describe a stored file, hashing the current and every chained version
    pub fn metadata(&self, key: &str, filename: &str) -> StoreResult<Attachment> {
        validate_filename(filename)?;
        let dir = self.key_dir(key)?;
        let path = dir.join(filename);

        let written = checksum_file(&path).map_err(|e| match e {
            StoreError::FileNotFound { .. } => not_found(key, filename, None),
            other => other,
        })?;
        let mut attachment = self.describe(&dir, filename, current_version(&path), &written)?;

        let chain = dir.join(VERSION_DIR).join(filename);
        for version in versions_in(&chain)? {
            let version = version.to_string();
            let hashed = checksum_file(&chain.join(&version))?;
            attachment.version_checksums.insert(version, hashed.checksum);
        }
        Ok(attachment)
    }

    /// Remove a file: its version chain and its current entry
    pub fn prune(&self, key: &str, filename: &str) -> StoreResult<()> {
        let key = normalize(key)?;
        validate_filename(filename)?;
        let dir = self.dir_for(&key);

        self.with_write_lock(&key, filename, || {
            let chain = dir.join(VERSION_DIR).join(filename);
            let had_chain = chain.is_dir();
            if had_chain {
                fs::remove_dir_all(&chain).map_err(|e| StoreError::from_io(e, chain.clone()))?;
            }

            let path = dir.join(filename);
            // symlink_metadata so a dangling link still counts
            let had_current = fs::symlink_metadata(&path).is_ok();
            if had_current {
                fs::remove_file(&path).map_err(|e| StoreError::from_io(e, path.clone()))?;
            }

            if !had_chain && !had_current {
                return Err(not_found(&key, filename, None));
            }

            let _ = fs::remove_dir(dir.join(VERSION_DIR));
            remove_empty_dirs(&dir, &self.root);
            debug!("Pruned {} from {}", filename, key);
            Ok(())
        })
    }

    /// Remove one version from the chain
    ///
    /// The current-version link is left as is, so it dangles if it pointed
    /// at the pruned version.
    pub fn prune_version(&self, key: &str, filename: &str, version: &str) -> StoreResult<()> {
        let key = normalize(key)?;
        validate_filename(filename)?;
        let version = SemVer::parse(version)?.to_string();
        let dir = self.dir_for(&key);

        self.with_write_lock(&key, filename, || {
            let chain = dir.join(VERSION_DIR).join(filename);
            let path = chain.join(&version);
            fs::remove_file(&path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => not_found(&key, filename, Some(version.clone())),
                _ => StoreError::from_io(e, path.clone()),
            })?;

            let _ = fs::remove_dir(&chain);
            let _ = fs::remove_dir(dir.join(VERSION_DIR));
            debug!("Pruned version {} of {} from {}", version, filename, key);
            Ok(())
        })
    }

    /// Remove every attachment of a key
    ///
    /// Fan-out directories still used by longer keys are left in place.
    pub fn prune_all(&self, key: &str) -> StoreResult<()> {
        let key = normalize(key)?;
        let dir = self.dir_for(&key);

        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::from_io(e, dir)),
        }
        if let Some(parent) = dir.parent() {
            remove_empty_dirs(parent, &self.root);
        }
        debug!("Pruned all attachments from {}", key);
        Ok(())
    }

    fn write_version<R: Read + ?Sized>(
        &self,
        key: &str,
        dir: &Path,
        filename: &str,
        version: &str,
        reader: &mut R,
    ) -> StoreResult<Attachment> {
        let target = dir.join(VERSION_DIR).join(filename).join(version);
        let written = atomic_write_from(&target, reader)?;
        point_current(dir, filename, version)?;
        debug!("Attached {} version {} to {}", filename, version, key);

        let mut attachment = self.describe(dir, filename, Some(version.to_string()), &written)?;
        attachment
            .version_checksums
            .insert(version.to_string(), written.checksum);
        Ok(attachment)
    }

    fn describe(
        &self,
        dir: &Path,
        filename: &str,
        version: Option<String>,
        written: &WrittenFile,
    ) -> StoreResult<Attachment> {
        let chain = dir.join(VERSION_DIR).join(filename);
        let versions = versions_in(&chain)?;

        let mut version_paths = BTreeMap::new();
        for v in &versions {
            let v = v.to_string();
            let path = chain.join(&v);
            let relative = path.strip_prefix(&self.collection_root).unwrap_or(path.as_path());
            version_paths.insert(v, relative.to_string_lossy().into_owned());
        }

        // the oldest stored version marks when the attachment first appeared
        let oldest = match versions.first() {
            Some(v) => chain.join(v.to_string()),
            None => dir.join(filename),
        };
        let (created, _) = file_times(&oldest);
        let (_, modified) = file_times(&dir.join(filename));

        Ok(Attachment {
            name: filename.to_string(),
            size: written.size,
            checksum: written.checksum.clone(),
            version,
            created,
            modified,
            version_paths,
            version_checksums: BTreeMap::new(),
        })
    }

    /// Run `f` holding the `(key, filename)` write lock, if writes are serialized
    ///
    /// The lock entry is dropped again once no other caller holds or waits on it.
    fn with_write_lock<T>(
        &self,
        key: &str,
        filename: &str,
        f: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<T> {
        if !self.serialize_writes {
            return f();
        }
        let name = format!("{}/{}", key, filename);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(
                locks
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&name);
        }
        result
    }
}

/// Point `<dir>/<filename>` at `_/<filename>/<version>`
#[cfg(unix)]
fn point_current(dir: &Path, filename: &str, version: &str) -> StoreResult<()> {
    let current = dir.join(filename);
    let target = Path::new(VERSION_DIR).join(filename).join(version);
    let temp = staging_path(&current);

    std::os::unix::fs::symlink(&target, &temp).map_err(|e| StoreError::from_io(e, temp.clone()))?;
    if let Err(e) = fs::rename(&temp, &current) {
        let _ = fs::remove_file(&temp);
        return Err(StoreError::from_io(e, current));
    }
    Ok(())
}

#[cfg(not(unix))]
fn point_current(dir: &Path, filename: &str, version: &str) -> StoreResult<()> {
    let current = dir.join(filename);
    let source = dir.join(VERSION_DIR).join(filename).join(version);
    let mut file = File::open(&source).map_err(|e| StoreError::from_io_read(e, source.clone()))?;
    atomic_write_from(&current, &mut file)?;
    Ok(())
}

/// Version the top-level entry points at, if it is a link into the chain
fn current_version(path: &Path) -> Option<String> {
    let target = fs::read_link(path).ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

fn versions_in(chain: &Path) -> StoreResult<Vec<SemVer>> {
    let entries = match fs::read_dir(chain) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::from_io_read(e, chain.to_path_buf())),
    };

    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::from_io_read(e, chain.to_path_buf()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        match SemVer::parse(&name) {
            Ok(version) => versions.push(version),
            Err(_) => warn!("Ignoring unversioned entry {:?} in {:?}", name, chain),
        }
    }
    versions.sort();
    Ok(versions)
}

fn highest_version(chain: &Path) -> StoreResult<Option<SemVer>> {
    Ok(versions_in(chain)?.pop())
}

fn open_attachment(
    path: &Path,
    key: &str,
    filename: &str,
    version: Option<String>,
) -> StoreResult<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => not_found(key, filename, version),
        _ => StoreError::from_io_read(e, path.to_path_buf()),
    })
}

fn not_found(key: &str, filename: &str, version: Option<String>) -> StoreError {
    StoreError::AttachmentNotFound {
        key: key.to_string(),
        filename: filename.to_string(),
        version,
    }
}

fn file_times(path: &Path) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let Ok(meta) = fs::metadata(path) else {
        return (now, now);
    };
    let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or(now);
    let created = meta
        .created()
        .or_else(|_| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or(modified);
    (created, modified)
}

fn validate_filename(filename: &str) -> StoreResult<()> {
    let invalid = filename.is_empty()
        || filename == VERSION_DIR
        || filename.starts_with('.')
        || filename.contains('/')
        || filename.contains('\\')
        || filename.chars().any(char::is_control);
    if invalid {
        return Err(StoreError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}
