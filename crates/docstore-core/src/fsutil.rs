//! Filesystem helpers shared by the file-backed parts of the engine
//!
//! Writes go to a hidden staging file in the target directory, are synced,
//! and are then renamed over the target, so a reader never observes a
//! partially-written file.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};

/// Size and SHA-256 of a written payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub size: u64,
    pub checksum: String,
}

/// Write data to a file atomically
pub fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<WrittenFile> {
    atomic_write_from(path, &mut io::Cursor::new(data))
}

/// Stream a reader into a file atomically, hashing as it goes
///
/// 1. Copy into a staging file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the staging file over the target
pub fn atomic_write_from<R: Read + ?Sized>(path: &Path, reader: &mut R) -> StoreResult<WrittenFile> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::from_io(e, parent.to_path_buf()))?;
    }

    let temp_path = staging_path(path);
    let result = write_staged(&temp_path, reader).and_then(|written| {
        fs::rename(&temp_path, path).map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;
        Ok(written)
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_staged<R: Read + ?Sized>(temp_path: &Path, reader: &mut R) -> StoreResult<WrittenFile> {
    let to_err = |e| StoreError::from_io(e, temp_path.to_path_buf());

    let mut file = File::create(temp_path).map_err(to_err)?;
    let mut hashing = HashingWriter::new(&mut file);
    io::copy(reader, &mut hashing).map_err(to_err)?;
    let written = hashing.finish();
    file.sync_all().map_err(to_err)?;

    Ok(written)
}

/// Hidden sibling path used for staging writes to `path`
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// SHA-256 of a file's contents, streamed
pub fn checksum_file(path: &Path) -> StoreResult<WrittenFile> {
    let mut file = File::open(path).map_err(|e| StoreError::from_io_read(e, path.to_path_buf()))?;
    let mut hashing = HashingWriter::new(io::sink());
    io::copy(&mut file, &mut hashing)
        .map_err(|e| StoreError::from_io_read(e, path.to_path_buf()))?;
    Ok(hashing.finish())
}

/// Remove empty directories from `dir` upwards, stopping at `stop`
pub fn remove_empty_dirs(dir: &Path, stop: &Path) {
    let mut current = Some(dir);
    while let Some(d) = current {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        if fs::remove_dir(d).is_err() {
            break;
        }
        current = d.parent();
    }
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    fn finish(self) -> WrittenFile {
        WrittenFile {
            size: self.size,
            checksum: format!("{:x}", self.hasher.finalize()),
        }
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
