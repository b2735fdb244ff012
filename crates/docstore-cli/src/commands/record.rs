//! Record command handlers

use std::io::Read;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use docstore_core::Collection;

use crate::output::{Output, OutputFormat};

/// Create a record from an argument or stdin
pub fn create(collection: &Collection, key: &str, json: Option<String>, output: &Output) -> Result<()> {
    let payload = read_payload(json)?;
    collection
        .create(key, &payload)
        .with_context(|| format!("Failed to create {}", key))?;
    output.success(&format!("Created {}", key));
    Ok(())
}

/// Print a record, or one of its historical versions
pub fn read(collection: &Collection, key: &str, version: Option<i64>, output: &Output) -> Result<()> {
    let record = match version {
        Some(version) => {
            let payload = collection
                .read_version(key, version)
                .with_context(|| format!("Failed to read {} version {}", key, version))?;
            serde_json::from_slice::<Value>(&payload)
                .with_context(|| format!("Stored payload for {} is not JSON", key))?
        }
        None => collection
            .read_json(key)
            .with_context(|| format!("Failed to read {}", key))?,
    };
    output.print_record(&record);
    Ok(())
}

/// Replace a record from an argument or stdin
pub fn update(collection: &Collection, key: &str, json: Option<String>, output: &Output) -> Result<()> {
    let payload = read_payload(json)?;
    collection
        .update(key, &payload)
        .with_context(|| format!("Failed to update {}", key))?;
    output.success(&format!("Updated {}", key));
    Ok(())
}

pub fn delete(collection: &Collection, key: &str, output: &Output) -> Result<()> {
    collection
        .delete(key)
        .with_context(|| format!("Failed to delete {}", key))?;
    output.success(&format!("Deleted {}", key));
    Ok(())
}

pub fn keys(collection: &Collection, output: &Output) -> Result<()> {
    let keys = collection.keys().context("Failed to list keys")?;
    output.print_names(&keys, "key");
    Ok(())
}

/// Report whether a key exists; a missing key is not an error
pub fn has_key(collection: &Collection, key: &str, output: &Output) -> Result<()> {
    let exists = collection.has_key(key);
    match output.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "key": key, "exists": exists })),
        OutputFormat::Quiet => println!("{}", exists),
        OutputFormat::Human => {
            let verb = if exists { "exists" } else { "does not exist" };
            output.message(&format!("{} {}", key, verb));
        }
    }
    Ok(())
}

pub fn count(collection: &Collection, output: &Output) -> Result<()> {
    let count = collection.length();
    if count < 0 {
        bail!("The {} backend could not count its records", collection.kind());
    }
    output.print_count(count, "record");
    Ok(())
}

pub fn history(collection: &Collection, key: &str, output: &Output) -> Result<()> {
    let entries = collection
        .history(key)
        .with_context(|| format!("Failed to read history of {}", key))?;
    output.print_history(&entries);
    Ok(())
}

/// List keys updated in `[start, end)`
pub fn updated(collection: &Collection, start: &str, end: &str, output: &Output) -> Result<()> {
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    let keys = collection
        .updated_keys(start, end)
        .context("Failed to list updated keys")?;
    output.print_names(&keys, "key");
    Ok(())
}

pub fn query(collection: &Collection, sql: &str, output: &Output) -> Result<()> {
    let rows = collection.query(sql).context("Query failed")?;
    output.print_rows(&rows);
    Ok(())
}

/// Use the argument if given, otherwise read stdin
fn read_payload(json: Option<String>) -> Result<Vec<u8>> {
    match json {
        Some(text) if text != "-" => Ok(text.into_bytes()),
        _ => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read JSON from stdin")?;
            Ok(buf)
        }
    }
}

/// Parse an RFC 3339 timestamp or a bare date (midnight UTC)
fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("Invalid time '{}'. Use YYYY-MM-DD or RFC 3339.", text))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid time '{}'", text))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
