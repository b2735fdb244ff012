//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/docstore/config.toml)
//! 3. Environment variables (DOCSTORE_* prefix)
//!
//! Environment variables take precedence over config file values.
//! Per-collection settings are not kept here; they live in each
//! collection's `collection.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::attachments::Versioning;
use crate::backend::BackendKind;
use crate::collection::InitOptions;
use crate::dsn::DEFAULT_CONNECTION;

/// Environment variable prefix
const ENV_PREFIX: &str = "DOCSTORE";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Collection used when none is given on the command line
    #[serde(default)]
    pub collection: Option<PathBuf>,

    /// Connection URI for newly initialized SQL collections
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Attachment versioning for newly initialized collections
    #[serde(default)]
    pub versioning: Versioning,

    /// Whether new SQL collections keep a history table
    #[serde(default = "default_history")]
    pub history: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection: None,
            connection: default_connection(),
            versioning: Versioning::Off,
            history: true,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (DOCSTORE_COLLECTION, DOCSTORE_CONNECTION,
    ///    DOCSTORE_VERSIONING, DOCSTORE_HISTORY)
    /// 2. Config file (~/.config/docstore/config.toml or DOCSTORE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from an explicit path when given, otherwise the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // DOCSTORE_COLLECTION
        if let Ok(val) = std::env::var(format!("{}_COLLECTION", ENV_PREFIX)) {
            self.collection = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // DOCSTORE_CONNECTION
        if let Ok(val) = std::env::var(format!("{}_CONNECTION", ENV_PREFIX)) {
            if !val.is_empty() {
                self.connection = val;
            }
        }

        // DOCSTORE_VERSIONING
        if let Ok(val) = std::env::var(format!("{}_VERSIONING", ENV_PREFIX)) {
            match val.parse() {
                Ok(versioning) => self.versioning = versioning,
                Err(_) => warn!("Ignoring {}_VERSIONING={:?}", ENV_PREFIX, val),
            }
        }

        // DOCSTORE_HISTORY
        if let Ok(val) = std::env::var(format!("{}_HISTORY", ENV_PREFIX)) {
            self.history = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with DOCSTORE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docstore")
            .join("config.toml")
    }

    /// Options for initializing a collection with these defaults
    pub fn init_options(&self, backend: BackendKind) -> InitOptions {
        InitOptions {
            backend,
            connection: Some(self.connection.clone()),
            history: self.history,
            versioning: self.versioning,
            ..Default::default()
        }
    }
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

fn default_history() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "DOCSTORE_COLLECTION",
        "DOCSTORE_CONNECTION",
        "DOCSTORE_VERSIONING",
        "DOCSTORE_HISTORY",
        "DOCSTORE_CONFIG",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.collection.is_none());
        assert_eq!(config.connection, "sqlite://collection.db");
        assert_eq!(config.versioning, Versioning::Off);
        assert!(config.history);
    }

    #[test]
    fn test_config_file_path_override() {
        let _guard = EnvGuard::new(ENV_VARS);

        assert!(Config::config_file_path().ends_with("docstore/config.toml"));

        env::set_var("DOCSTORE_CONFIG", "/tmp/docstore-test.toml");
        assert_eq!(
            Config::config_file_path(),
            PathBuf::from("/tmp/docstore-test.toml")
        );
    }

    #[test]
    fn test_env_override_collection() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("DOCSTORE_COLLECTION", "/data/people.ds");
        config.apply_env_overrides();
        assert_eq!(config.collection, Some(PathBuf::from("/data/people.ds")));

        // Empty string clears it
        env::set_var("DOCSTORE_COLLECTION", "");
        config.apply_env_overrides();
        assert!(config.collection.is_none());
    }

    #[test]
    fn test_env_override_versioning() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("DOCSTORE_VERSIONING", "minor");
        config.apply_env_overrides();
        assert_eq!(config.versioning, Versioning::Minor);

        // Unknown values leave the setting alone
        env::set_var("DOCSTORE_VERSIONING", "weekly");
        config.apply_env_overrides();
        assert_eq!(config.versioning, Versioning::Minor);
    }

    #[test]
    fn test_env_override_history() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("DOCSTORE_HISTORY", "false");
        config.apply_env_overrides();
        assert!(!config.history);

        env::set_var("DOCSTORE_HISTORY", "1");
        config.apply_env_overrides();
        assert!(config.history);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            collection = "/custom/people.ds"
            connection = "sqlite://people.db"
            versioning = "patch"
            history = false
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.collection, Some(PathBuf::from("/custom/people.ds")));
        assert_eq!(config.connection, "sqlite://people.db");
        assert_eq!(config.versioning, Versioning::Patch);
        assert!(!config.history);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = Config {
            versioning: Versioning::Major,
            ..Default::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.versioning, Versioning::Major);
        assert_eq!(loaded.connection, config.connection);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(config.history);
        assert!(config.collection.is_none());
    }

    #[test]
    fn test_init_options() {
        let config = Config {
            versioning: Versioning::Patch,
            history: false,
            ..Default::default()
        };
        let options = config.init_options(BackendKind::Pairtree);

        assert_eq!(options.backend, BackendKind::Pairtree);
        assert_eq!(options.versioning, Versioning::Patch);
        assert!(!options.history);
        assert!(options.serialize_attachment_writes);
    }
}
