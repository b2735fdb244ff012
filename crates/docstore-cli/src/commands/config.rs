//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use docstore_core::{Config, ConnectionUri, Versioning};

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "collection": config.collection,
                    "connection": config.connection,
                    "versioning": config.versioning,
                    "history": config.history
                })
            );
        }
        OutputFormat::Quiet => {
            if let Some(ref collection) = config.collection {
                println!("{}", collection.display());
            }
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!(
                "  collection: {}",
                config
                    .collection
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  connection: {}", config.connection);
            println!("  versioning: {}", config.versioning);
            println!("  history:    {}", config.history);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match key.as_str() {
        "collection" => {
            config.collection = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.clone().into())
            };
        }
        "connection" => {
            ConnectionUri::parse(&value).context("Invalid value for connection")?;
            config.connection = value.clone();
        }
        "versioning" => {
            config.versioning = value
                .parse::<Versioning>()
                .context("Invalid value for versioning. Use off, major, minor or patch.")?;
        }
        "history" => {
            config.history = value
                .parse()
                .context("Invalid value for history. Use 'true' or 'false'.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: collection, connection, versioning, history",
                key
            );
        }
    }

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
