//! Attachment command handlers

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use docstore_core::Collection;

use crate::output::Output;

/// Attach one or more files, each under its own file name
pub fn attach(
    collection: &Collection,
    key: &str,
    files: &[PathBuf],
    version: Option<&str>,
    output: &Output,
) -> Result<()> {
    let attachments = collection.attachments();
    for path in files {
        let filename = file_name(path)?;
        let mut file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let attachment = match version {
            Some(version) => attachments.attach_at_version(key, &filename, version, &mut file),
            None => attachments.attach(key, &filename, &mut file),
        }
        .with_context(|| format!("Failed to attach {} to {}", filename, key))?;

        output.success(&format!("Attached {} to {}", filename, key));
        output.print_attachment(&attachment);
    }
    Ok(())
}

pub fn list(collection: &Collection, key: &str, output: &Output) -> Result<()> {
    let names = collection
        .attachments()
        .list(key)
        .with_context(|| format!("Failed to list attachments of {}", key))?;
    output.print_names(&names, "attachment");
    Ok(())
}

pub fn versions(collection: &Collection, key: &str, filename: &str, output: &Output) -> Result<()> {
    let versions = collection
        .attachments()
        .list_versions(key, filename)
        .with_context(|| format!("Failed to list versions of {}", filename))?;
    output.print_names(&versions, "version");
    Ok(())
}

/// Copy an attachment to a file, or to stdout
pub fn retrieve(
    collection: &Collection,
    key: &str,
    filename: &str,
    version: Option<&str>,
    destination: Option<&Path>,
    output: &Output,
) -> Result<()> {
    let attachments = collection.attachments();
    let mut source = match version {
        Some(version) => attachments.read_version(key, filename, version),
        None => attachments.read(key, filename),
    }
    .with_context(|| format!("Failed to read {} from {}", filename, key))?;

    match destination {
        Some(path) => {
            let mut target =
                File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            let size = io::copy(&mut source, &mut target)
                .with_context(|| format!("Failed to write {:?}", path))?;
            output.success(&format!("Wrote {} ({} bytes) to {}", filename, size, path.display()));
        }
        None => {
            io::copy(&mut source, &mut io::stdout().lock()).context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

/// Remove one version, one attachment, or all of a key's attachments
pub fn prune(
    collection: &Collection,
    key: &str,
    filename: Option<&str>,
    version: Option<&str>,
    output: &Output,
) -> Result<()> {
    let attachments = collection.attachments();
    match (filename, version) {
        (Some(filename), Some(version)) => {
            attachments
                .prune_version(key, filename, version)
                .with_context(|| format!("Failed to prune {} version {}", filename, version))?;
            output.success(&format!("Pruned {} version {} from {}", filename, version, key));
        }
        (Some(filename), None) => {
            attachments
                .prune(key, filename)
                .with_context(|| format!("Failed to prune {}", filename))?;
            output.success(&format!("Pruned {} from {}", filename, key));
        }
        (None, _) => {
            attachments
                .prune_all(key)
                .with_context(|| format!("Failed to prune attachments of {}", key))?;
            output.success(&format!("Pruned all attachments from {}", key));
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{:?} does not name a file", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use docstore_core::{InitOptions, Versioning};
    use tempfile::TempDir;

    #[test]
    fn test_attach_retrieve_prune() {
        let temp_dir = TempDir::new().unwrap();
        let options = InitOptions {
            versioning: Versioning::Patch,
            ..Default::default()
        };
        let collection = Collection::init(&temp_dir.path().join("people.ds"), options).unwrap();
        let output = Output::new(OutputFormat::Quiet);

        let source = temp_dir.path().join("report.pdf");
        std::fs::write(&source, b"v1").unwrap();
        attach(&collection, "123", &[source.clone()], None, &output).unwrap();
        std::fs::write(&source, b"v2").unwrap();
        attach(&collection, "123", &[source.clone()], None, &output).unwrap();

        let copy = temp_dir.path().join("copy.pdf");
        retrieve(&collection, "123", "report.pdf", Some("0.0.1"), Some(&copy), &output).unwrap();
        assert_eq!(std::fs::read(&copy).unwrap(), b"v1");
        retrieve(&collection, "123", "report.pdf", None, Some(&copy), &output).unwrap();
        assert_eq!(std::fs::read(&copy).unwrap(), b"v2");

        prune(&collection, "123", None, None, &output).unwrap();
        assert!(collection.attachments().list("123").unwrap().is_empty());
    }
}
