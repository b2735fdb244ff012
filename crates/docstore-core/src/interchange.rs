//! JSON-lines bulk dump and load
//!
//! Each line is one record: `{"key": "<key>", "object": {...}}`.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Serialize, Deserialize)]
struct Line {
    key: String,
    object: Value,
}

/// Write every record in key order; returns how many were written
pub fn dump<W: Write + ?Sized>(collection: &Collection, writer: &mut W) -> StoreResult<usize> {
    let mut count = 0;
    for key in collection.keys()? {
        let object = collection.read_json(&key)?;
        let line = serde_json::to_string(&Line { key, object })?;
        writeln!(writer, "{}", line)?;
        count += 1;
    }
    writer.flush()?;
    info!("Dumped {} records from {}", count, collection.name());
    Ok(count)
}

/// Read records from JSON lines; returns how many were stored
///
/// With `overwrite`, existing keys are updated; otherwise the first
/// existing key stops the load with `DuplicateKey`. Blank lines are
/// skipped.
pub fn load<R: BufRead>(collection: &Collection, reader: R, overwrite: bool) -> StoreResult<usize> {
    let mut count = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let number = index + 1;
        let Line { key, object } = serde_json::from_str(&line)
            .map_err(|e| StoreError::InvalidJson(format!("line {}: {}", number, e)))?;
        let payload = serde_json::to_vec(&object)?;

        if overwrite && collection.has_key(&key) {
            collection.update(&key, &payload)?;
        } else {
            collection.create(&key, &payload)?;
        }
        debug!("Loaded {} from line {}", key, number);
        count += 1;
    }
    info!("Loaded {} records into {}", count, collection.name());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::collection::InitOptions;
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn init(temp_dir: &TempDir, name: &str, backend: BackendKind) -> Collection {
        let options = InitOptions {
            backend,
            ..Default::default()
        };
        Collection::init(&temp_dir.path().join(name), options).unwrap()
    }

    #[test]
    fn test_dump_format() {
        let temp_dir = TempDir::new().unwrap();
        let collection = init(&temp_dir, "a.ds", BackendKind::Sql);
        collection.create("b", br#"{"n":2}"#).unwrap();
        collection.create("a", br#"{"n":1}"#).unwrap();

        let mut out = Vec::new();
        assert_eq!(dump(&collection, &mut out).unwrap(), 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0], json!({"key": "a", "object": {"n": 1}}));
        assert_eq!(lines[1], json!({"key": "b", "object": {"n": 2}}));
    }

    #[test]
    fn test_copy_between_backends() {
        let temp_dir = TempDir::new().unwrap();
        let source = init(&temp_dir, "sql.ds", BackendKind::Sql);
        let target = init(&temp_dir, "tree.ds", BackendKind::Pairtree);
        source.create("freda", br#"{"name":"freda"}"#).unwrap();
        source.create("mojo", br#"{"name":"mojo"}"#).unwrap();

        let mut buf = Vec::new();
        dump(&source, &mut buf).unwrap();
        assert_eq!(load(&target, Cursor::new(buf), false).unwrap(), 2);

        assert_eq!(target.keys().unwrap(), vec!["freda", "mojo"]);
        assert_eq!(target.read_json("mojo").unwrap(), json!({"name": "mojo"}));
    }

    #[test]
    fn test_load_duplicate_without_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let collection = init(&temp_dir, "a.ds", BackendKind::Sql);
        collection.create("a", br#"{"n":0}"#).unwrap();

        let input = "{\"key\":\"a\",\"object\":{\"n\":1}}\n";
        assert!(matches!(
            load(&collection, Cursor::new(input), false),
            Err(StoreError::DuplicateKey { .. })
        ));

        assert_eq!(load(&collection, Cursor::new(input), true).unwrap(), 1);
        assert_eq!(collection.read_json("a").unwrap(), json!({"n": 1}));
    }

    #[test]
    fn test_load_reports_line_number() {
        let temp_dir = TempDir::new().unwrap();
        let collection = init(&temp_dir, "a.ds", BackendKind::Pairtree);

        let input = "{\"key\":\"a\",\"object\":{}}\n\n{\"key\": 3}\n";
        match load(&collection, Cursor::new(input), false) {
            Err(StoreError::InvalidJson(message)) => assert!(message.starts_with("line 3:")),
            other => panic!("expected InvalidJson, got {:?}", other.map(|_| ())),
        }
        assert!(collection.has_key("a"));
    }
}
