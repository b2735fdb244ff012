//! Collection command handlers

use std::path::Path;

use anyhow::{Context, Result};

use docstore_core::{Collection, InitOptions};

use crate::output::{Output, OutputFormat};

/// Create a new collection
pub fn init(path: &Path, options: InitOptions, output: &Output) -> Result<()> {
    let collection = Collection::init(path, options)
        .with_context(|| format!("Failed to create collection {:?}", path))?;
    let metadata = collection.metadata().clone();
    let root = collection.root().to_path_buf();
    collection.close()?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "path": root,
                    "collection": metadata,
                })
            );
        }
        OutputFormat::Quiet => println!("{}", root.display()),
        OutputFormat::Human => {
            output.success(&format!("Created collection {}", metadata.name));
            println!("  Path:    {}", root.display());
            println!("  Backend: {}", metadata.backend);
            if !metadata.connection.is_empty() {
                println!("  Connection: {}", metadata.connection);
            }
            println!();
            println!("Make it the default with:");
            println!("  docstore config set collection {}", root.display());
        }
    }

    Ok(())
}

/// Show collection settings and counts
pub fn status(collection: &Collection, output: &Output) -> Result<()> {
    let metadata = collection.metadata();
    let count = collection.length();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "path": collection.root(),
                    "collection": metadata,
                    "count": count,
                })
            );
        }
        OutputFormat::Quiet => println!("{}", count),
        OutputFormat::Human => {
            println!("Collection {}", metadata.name);
            println!("==========={}", "=".repeat(metadata.name.chars().count()));
            println!();
            println!("  Path:        {}", collection.root().display());
            println!("  Backend:     {}", metadata.backend);
            if !metadata.connection.is_empty() {
                println!("  Connection:  {}", metadata.connection);
            }
            println!(
                "  History:     {}",
                if metadata.history { "enabled" } else { "disabled" }
            );
            println!("  Versioning:  {}", metadata.versioning);
            println!("  Created:     {}", metadata.created.format("%Y-%m-%d %H:%M"));
            println!("  Engine:      {}", metadata.engine_version);
            println!();
            println!("  Records:     {}", count);
        }
    }

    Ok(())
}
