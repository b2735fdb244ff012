//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde_json::Value;

use docstore_core::{Attachment, HistoryEntry};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a record
    ///
    /// Records are JSON already, so quiet mode prints them compactly
    /// rather than suppressing them.
    pub fn print_record(&self, record: &Value) {
        match self.format {
            OutputFormat::Human => println!("{}", pretty(record)),
            OutputFormat::Json | OutputFormat::Quiet => println!("{}", record),
        }
    }

    /// Print a list of names (keys, filenames, versions)
    pub fn print_names(&self, names: &[String], noun: &str) {
        match self.format {
            OutputFormat::Human => {
                if names.is_empty() {
                    println!("No {}s found.", noun);
                    return;
                }
                for name in names {
                    println!("{}", name);
                }
                println!("\n{} {}(s)", names.len(), noun);
            }
            OutputFormat::Json => println!("{}", pretty(&Value::from(names.to_vec()))),
            OutputFormat::Quiet => {
                for name in names {
                    println!("{}", name);
                }
            }
        }
    }

    /// Print a record's history
    pub fn print_history(&self, entries: &[HistoryEntry]) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("No history found.");
                    return;
                }
                for entry in entries {
                    let payload = if entry.is_tombstone() {
                        "(deleted)".to_string()
                    } else {
                        truncate(&entry.payload, 50)
                    };
                    println!(
                        "v{:<4} {} | {}",
                        entry.version,
                        entry.updated.format("%Y-%m-%d %H:%M:%S"),
                        payload
                    );
                }
                println!("\n{} version(s)", entries.len());
            }
            OutputFormat::Json => println!("{}", to_pretty(entries)),
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.version);
                }
            }
        }
    }

    /// Print an attachment description
    pub fn print_attachment(&self, attachment: &Attachment) {
        match self.format {
            OutputFormat::Human => {
                println!("Name:     {}", attachment.name);
                println!("Size:     {} bytes", attachment.size);
                println!("SHA-256:  {}", attachment.checksum);
                if let Some(ref version) = attachment.version {
                    println!("Version:  {}", version);
                }
                println!("Modified: {}", attachment.modified.format("%Y-%m-%d %H:%M"));
                if attachment.version_paths.len() > 1 {
                    println!("Versions: {}", attachment.version_paths.len());
                }
            }
            OutputFormat::Json => println!("{}", to_pretty(attachment)),
            OutputFormat::Quiet => {
                println!(
                    "{}",
                    attachment.version.as_deref().unwrap_or(&attachment.name)
                );
            }
        }
    }

    /// Print query rows or other free-form JSON
    pub fn print_rows(&self, rows: &[Value]) {
        match self.format {
            OutputFormat::Human | OutputFormat::Json => println!("{}", to_pretty(rows)),
            OutputFormat::Quiet => {
                for row in rows {
                    println!("{}", row);
                }
            }
        }
    }

    /// Print a count
    pub fn print_count(&self, count: i64, noun: &str) {
        match self.format {
            OutputFormat::Human => println!("{} {}(s)", count, noun),
            OutputFormat::Json => println!("{}", serde_json::json!({ "count": count })),
            OutputFormat::Quiet => println!("{}", count),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn to_pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééééé", 6), "ééé...");
    }
}
