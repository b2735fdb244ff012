//! docstore CLI
//!
//! Command-line interface for docstore collections: records, history and
//! attachments.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docstore_core::{BackendKind, Collection, Config, StoreError, Versioning};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "docstore")]
#[command(about = "docstore - keyed JSON collections with history and versioned attachments")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More log output on stderr (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Collection to operate on (defaults to the configured collection)
    #[arg(short, long, global = true)]
    collection: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new collection
    Init {
        /// Collection directory, conventionally ending in .ds
        path: PathBuf,
        /// Document backend (sql or pairtree)
        #[arg(short, long, default_value = "sql")]
        backend: BackendKind,
        /// Connection URI for the sql backend
        #[arg(long)]
        connection: Option<String>,
        /// Attachment versioning (off, major, minor, patch)
        #[arg(long)]
        versioning: Option<Versioning>,
        /// Do not keep a history table
        #[arg(long)]
        no_history: bool,
    },
    /// Show collection settings and counts
    Status,
    /// Create a record
    #[command(alias = "add")]
    Create {
        key: String,
        /// JSON object (read from stdin if omitted)
        json: Option<String>,
    },
    /// Print a record
    #[command(alias = "get")]
    Read {
        key: String,
        /// Read a historical version instead of the live record
        #[arg(long)]
        version: Option<i64>,
    },
    /// Replace a record
    Update {
        key: String,
        /// JSON object (read from stdin if omitted)
        json: Option<String>,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Delete { key: String },
    /// List record keys
    #[command(alias = "ls")]
    Keys,
    /// Check whether a key has a record
    HasKey { key: String },
    /// Count records
    Count,
    /// Show the history of a record
    History { key: String },
    /// List keys updated in [start, end)
    Updated {
        /// RFC 3339 timestamp or YYYY-MM-DD
        start: String,
        /// RFC 3339 timestamp or YYYY-MM-DD
        end: String,
    },
    /// Run a SQL query against the collection's database
    Query { sql: String },
    /// Attach files to a record
    Attach {
        key: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Store under this version instead of allocating the next one
        #[arg(long)]
        version: Option<String>,
    },
    /// List a record's attachments
    Attachments { key: String },
    /// List the stored versions of an attachment
    Versions { key: String, filename: String },
    /// Copy an attachment out of the collection
    Retrieve {
        key: String,
        filename: String,
        #[arg(long)]
        version: Option<String>,
        /// Destination file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove attachments
    Prune {
        key: String,
        /// Attachment to remove (all of the key's attachments if omitted)
        filename: Option<String>,
        /// Remove only this version
        #[arg(long, requires = "filename")]
        version: Option<String>,
    },
    /// Write all records as JSON lines
    Dump {
        /// Destination file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Read records from JSON lines
    Load {
        /// Source file (stdin if omitted)
        input: Option<PathBuf>,
        /// Update records that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (collection, connection, versioning, history)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let store_error = e.chain().find_map(|cause| cause.downcast_ref::<StoreError>());
            if let Some(hint) = store_error.and_then(StoreError::recovery_suggestion) {
                eprintln!("Hint: {}", hint);
            }
            match store_error {
                Some(err) if err.is_not_found() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_env("DOCSTORE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!("docstore_core={},docstore_cli={}", level, level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Commands that don't need an open collection
    let command = match cli.command {
        Commands::Config { command } => return handle_config_command(command, config_path, &output),
        Commands::Init {
            path,
            backend,
            connection,
            versioning,
            no_history,
        } => {
            let config = Config::load_with_cli_override(config_path)
                .context("Failed to load configuration")?;
            let mut options = config.init_options(backend);
            if let Some(connection) = connection {
                options.connection = Some(connection);
            }
            if let Some(versioning) = versioning {
                options.versioning = versioning;
            }
            if no_history {
                options.history = false;
            }
            return commands::collection::init(&path, options, &output);
        }
        command => command,
    };

    let collection = open_collection(cli.collection.as_ref(), config_path)?;
    let result = dispatch(command, &collection, &output);
    let closed = collection.close().context("Failed to close collection");
    result.and(closed)
}

fn dispatch(command: Commands, collection: &Collection, output: &Output) -> Result<()> {
    use commands::{attachment, interchange, record};

    match command {
        Commands::Init { .. } | Commands::Config { .. } => unreachable!(), // Handled in run
        Commands::Status => commands::collection::status(collection, output),
        Commands::Create { key, json } => record::create(collection, &key, json, output),
        Commands::Read { key, version } => record::read(collection, &key, version, output),
        Commands::Update { key, json } => record::update(collection, &key, json, output),
        Commands::Delete { key } => record::delete(collection, &key, output),
        Commands::Keys => record::keys(collection, output),
        Commands::HasKey { key } => record::has_key(collection, &key, output),
        Commands::Count => record::count(collection, output),
        Commands::History { key } => record::history(collection, &key, output),
        Commands::Updated { start, end } => record::updated(collection, &start, &end, output),
        Commands::Query { sql } => record::query(collection, &sql, output),
        Commands::Attach {
            key,
            files,
            version,
        } => attachment::attach(collection, &key, &files, version.as_deref(), output),
        Commands::Attachments { key } => attachment::list(collection, &key, output),
        Commands::Versions { key, filename } => {
            attachment::versions(collection, &key, &filename, output)
        }
        Commands::Retrieve {
            key,
            filename,
            version,
            output: destination,
        } => attachment::retrieve(
            collection,
            &key,
            &filename,
            version.as_deref(),
            destination.as_deref(),
            output,
        ),
        Commands::Prune {
            key,
            filename,
            version,
        } => attachment::prune(
            collection,
            &key,
            filename.as_deref(),
            version.as_deref(),
            output,
        ),
        Commands::Dump {
            output: destination,
        } => interchange::dump(collection, destination.as_deref(), output),
        Commands::Load { input, overwrite } => {
            interchange::load(collection, input.as_deref(), overwrite, output)
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Open the collection named on the command line, or the configured default
fn open_collection(collection: Option<&PathBuf>, config_path: Option<&PathBuf>) -> Result<Collection> {
    let path = match collection {
        Some(path) => path.clone(),
        None => {
            let config = Config::load_with_cli_override(config_path)
                .context("Failed to load configuration")?;
            config.collection.ok_or_else(|| {
                anyhow::anyhow!(
                    "No collection given. Pass --collection <path> or set one with:\n  \
                     docstore config set collection <path>"
                )
            })?
        }
    };

    Collection::open(&path).with_context(|| format!("Failed to open collection {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags_after_command() {
        let cli = Cli::try_parse_from(["docstore", "keys", "-c", "people.ds", "--json"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.collection, Some(PathBuf::from("people.ds")));
        assert!(matches!(cli.command, Commands::Keys));
    }

    #[test]
    fn test_parse_init_options() {
        let cli = Cli::try_parse_from([
            "docstore",
            "init",
            "people.ds",
            "--backend",
            "pairtree",
            "--versioning",
            "patch",
        ])
        .unwrap();
        match cli.command {
            Commands::Init {
                backend,
                versioning,
                ..
            } => {
                assert_eq!(backend, BackendKind::Pairtree);
                assert_eq!(versioning, Some(Versioning::Patch));
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn test_prune_version_requires_filename() {
        assert!(Cli::try_parse_from(["docstore", "prune", "k", "--version", "1.0.0"]).is_err());
    }
}
