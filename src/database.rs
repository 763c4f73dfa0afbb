use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use rusqlite::Connection;

use crate::error::SqlMigrateError;

const SQLITE_URL_PREFIX: &str = "sqlite://";
const SQLITE_PREFIX: &str = "sqlite:";
const MEMORY: &str = ":memory:";

/// Where a DSN points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    /// Accepts a bare path, `sqlite://<path>`, `sqlite:<path>`, `:memory:` and
    /// `sqlite::memory:`.
    pub fn parse(dsn: &str) -> Result<Self, SqlMigrateError> {
        let dsn = dsn.trim();
        if dsn.is_empty() {
            return Err(config_error("database url is empty"));
        }

        let rest = dsn
            .strip_prefix(SQLITE_URL_PREFIX)
            .or_else(|| dsn.strip_prefix(SQLITE_PREFIX))
            .unwrap_or(dsn);

        if rest == MEMORY {
            return Ok(DatabaseLocation::Memory);
        }

        if let Some((scheme, _)) = rest.split_once("://") {
            return Err(config_error(&format!(
                "unsupported database scheme '{}' (only sqlite is supported)",
                scheme
            )));
        }

        if rest.is_empty() {
            return Err(config_error(&format!("database url '{}' has no path", dsn)));
        }

        Ok(DatabaseLocation::File(PathBuf::from(rest)))
    }
}

fn config_error(msg: &str) -> SqlMigrateError {
    SqlMigrateError::ConfigError(figment::Error::from(msg.to_owned()))
}

pub struct Database;

impl Database {
    /// Opens a connection for `dsn`. A busy database makes statements wait up
    /// to `busy_timeout` before failing; zero fails immediately.
    pub fn connect(dsn: &str, busy_timeout: Duration) -> Result<Connection, SqlMigrateError> {
        let conn = match DatabaseLocation::parse(dsn)? {
            DatabaseLocation::Memory => {
                debug!("Opening in-memory database");
                Connection::open_in_memory()?
            }
            DatabaseLocation::File(path) => {
                let db_path = Self::resolve(&path)?;
                let conn = Connection::open(&db_path)?;
                info!("Database opened at: {}", db_path.display());
                conn
            }
        };

        conn.busy_timeout(busy_timeout)?;

        Ok(conn)
    }

    /// Canonicalizes the parent folder, which must already exist.
    fn resolve(path: &Path) -> Result<PathBuf, SqlMigrateError> {
        let file_name = path.file_name().ok_or_else(|| {
            config_error(&format!("database path '{}' has no file name", path.display()))
        })?;

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        if !parent.is_dir() {
            return Err(SqlMigrateError::io(
                parent,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "database folder does not exist or is not a directory",
                ),
            ));
        }

        let parent = dunce::canonicalize(parent).map_err(|e| SqlMigrateError::io(parent, e))?;
        Ok(parent.join(file_name))
    }
}
