//! Dump and load command handlers

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};

use docstore_core::{interchange, Collection};

use crate::output::Output;

/// Write every record as JSON lines to a file or stdout
pub fn dump(collection: &Collection, destination: Option<&Path>, output: &Output) -> Result<()> {
    match destination {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            let count = interchange::dump(collection, &mut BufWriter::new(file))
                .context("Failed to dump records")?;
            output.success(&format!("Dumped {} record(s) to {}", count, path.display()));
        }
        None => {
            let stdout = io::stdout();
            interchange::dump(collection, &mut stdout.lock()).context("Failed to dump records")?;
        }
    }
    Ok(())
}

/// Read JSON lines from a file or stdin
pub fn load(collection: &Collection, source: Option<&Path>, overwrite: bool, output: &Output) -> Result<()> {
    let count = match source {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
            interchange::load(collection, BufReader::new(file), overwrite)
        }
        None => interchange::load(collection, io::stdin().lock(), overwrite),
    }
    .context("Failed to load records")?;

    output.success(&format!("Loaded {} record(s)", count));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use docstore_core::{BackendKind, InitOptions};
    use tempfile::TempDir;

    #[test]
    fn test_dump_then_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let output = Output::new(OutputFormat::Quiet);
        let source =
            Collection::init(&temp_dir.path().join("a.ds"), InitOptions::default()).unwrap();
        let target = Collection::init(
            &temp_dir.path().join("b.ds"),
            InitOptions {
                backend: BackendKind::Pairtree,
                ..Default::default()
            },
        )
        .unwrap();
        source.create("freda", br#"{"name":"freda"}"#).unwrap();

        let path = temp_dir.path().join("records.jsonl");
        dump(&source, Some(&path), &output).unwrap();
        load(&target, Some(&path), false, &output).unwrap();

        assert_eq!(target.keys().unwrap(), vec!["freda"]);
    }
}
