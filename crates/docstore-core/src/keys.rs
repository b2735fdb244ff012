//! Key codec
//!
//! Turns caller-supplied identifiers into canonical keys, pairs each key
//! with the name of its payload file, and maps keys onto a pairtree
//! fan-out path so that no directory holds an unbounded number of entries.

use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};

/// Suffix of the document file holding a record's payload
pub const PAYLOAD_SUFFIX: &str = ".json";

/// Name of the version-chain directory inside an attachment directory
pub const VERSION_DIR: &str = "_";

/// Normalize a raw key: trim, lower-case and reject empty results
///
/// Keys containing path separators or control characters are rejected
/// since they cannot be stored as payload file names.
pub fn normalize(raw: &str) -> StoreResult<String> {
    let key = raw.trim().to_lowercase();
    if key.is_empty() {
        return Err(StoreError::InvalidKey(raw.to_string()));
    }
    if key.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(StoreError::InvalidKey(raw.to_string()));
    }
    Ok(key)
}

/// Split a name into `(key, payload file name)`
///
/// A name already ending in [`PAYLOAD_SUFFIX`] is stripped to get the key;
/// otherwise the suffix is appended to form the file name.
pub fn key_and_payload_name(name: &str) -> (String, String) {
    match name.strip_suffix(PAYLOAD_SUFFIX) {
        Some(key) if !key.is_empty() => (key.to_string(), name.to_string()),
        _ => (name.to_string(), format!("{}{}", name, PAYLOAD_SUFFIX)),
    }
}

/// Map a canonical key to its relative pairtree directory
///
/// The key is escaped (pairtree rules, plus `_` so that no segment can
/// collide with [`VERSION_DIR`]) and then split into two-character segments.
pub fn fan_out_path(key: &str) -> PathBuf {
    let encoded = encode(key);
    let chars: Vec<char> = encoded.chars().collect();
    chars
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect()
}

fn encode(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'/' => out.push('='),
            b':' => out.push('+'),
            b'.' => out.push(','),
            b'"' | b'*' | b'+' | b',' | b'<' | b'=' | b'>' | b'?' | b'\\' | b'^' | b'|'
            | b'_' => out.push_str(&format!("^{:02x}", byte)),
            0x21..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("^{:02x}", byte)),
        }
    }
    out
}
