//! Connection URIs
//!
//! A collection's connection string is `driver://body`. The body is
//! rewritten per driver: sqlite paths are resolved against the collection
//! root so the database travels with the collection, postgres bodies are
//! rebuilt into a URL and mysql bodies pass through untouched.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

const SCHEME_SEPARATOR: &str = "://";

/// Default connection string for new SQL collections
pub const DEFAULT_CONNECTION: &str = "sqlite://collection.db";

/// Supported SQL drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Sqlite,
    Mysql,
    Postgres,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Driver::Sqlite => "sqlite",
            Driver::Mysql => "mysql",
            Driver::Postgres => "postgres",
        };
        f.write_str(name)
    }
}

/// A parsed `driver://body` connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    pub driver: Driver,
    pub body: String,
}

impl ConnectionUri {
    pub fn parse(uri: &str) -> StoreResult<Self> {
        let malformed = || StoreError::MalformedConnectionUri(uri.to_string());
        let (scheme, body) = uri.trim().split_once(SCHEME_SEPARATOR).ok_or_else(malformed)?;
        let driver = match scheme.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Driver::Sqlite,
            "mysql" => Driver::Mysql,
            "postgres" | "postgresql" => Driver::Postgres,
            _ => return Err(malformed()),
        };
        if body.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            driver,
            body: body.to_string(),
        })
    }

    /// The sqlite database file, resolved against the collection root
    ///
    /// Returns `None` for other drivers.
    pub fn sqlite_path(&self, root: &Path) -> Option<PathBuf> {
        if self.driver != Driver::Sqlite {
            return None;
        }
        let path = Path::new(&self.body);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(root.join(path))
        }
    }

    /// The DSN handed to the driver
    pub fn driver_dsn(&self, root: &Path) -> String {
        match self.driver {
            Driver::Sqlite => self
                .sqlite_path(root)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Driver::Postgres => format!("postgres://{}", self.body),
            Driver::Mysql => self.body.clone(),
        }
    }
}

impl FromStr for ConnectionUri {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionUri::parse(s)
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.driver, SCHEME_SEPARATOR, self.body)
    }
}

/// Connection pool sizing
///
/// Connections never expire by lifetime; collections live as long as the
/// process that opened them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_open: usize,
    pub max_idle: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 4,
            max_idle: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sqlite() {
        let uri = ConnectionUri::parse("sqlite://collection.db").unwrap();
        assert_eq!(uri.driver, Driver::Sqlite);
        assert_eq!(uri.body, "collection.db");
        assert_eq!(uri.to_string(), "sqlite://collection.db");
    }

    #[test]
    fn test_missing_scheme_is_malformed() {
        assert!(matches!(
            ConnectionUri::parse("collection.db"),
            Err(StoreError::MalformedConnectionUri(_))
        ));
        assert!(ConnectionUri::parse("oracle://x").is_err());
        assert!(ConnectionUri::parse("sqlite://").is_err());
    }

    #[test]
    fn test_sqlite_path_is_relative_to_root() {
        let uri = ConnectionUri::parse("sqlite://collection.db").unwrap();
        let root = Path::new("/data/people.ds");
        assert_eq!(
            uri.sqlite_path(root).unwrap(),
            PathBuf::from("/data/people.ds/collection.db")
        );
        assert_eq!(uri.driver_dsn(root), "/data/people.ds/collection.db");
    }

    #[test]
    fn test_absolute_sqlite_path_kept() {
        let uri = ConnectionUri::parse("sqlite:///var/db/people.db").unwrap();
        assert_eq!(
            uri.sqlite_path(Path::new("/data/people.ds")).unwrap(),
            PathBuf::from("/var/db/people.db")
        );
    }

    #[test]
    fn test_server_drivers() {
        let root = Path::new("/data/people.ds");
        let pg = ConnectionUri::parse("postgres://jane@localhost/people").unwrap();
        assert_eq!(pg.driver, Driver::Postgres);
        assert_eq!(pg.driver_dsn(root), "postgres://jane@localhost/people");
        assert!(pg.sqlite_path(root).is_none());

        let my = ConnectionUri::parse("mysql://jane:pw@tcp(localhost:3306)/people").unwrap();
        assert_eq!(my.driver, Driver::Mysql);
        assert_eq!(my.driver_dsn(root), "jane:pw@tcp(localhost:3306)/people");
    }
}
