use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlMigrateError {
    #[error("Malformed migration file name '{file}': {reason}")]
    MalformedName { file: String, reason: String },

    #[error("I/O error on '{}': {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Migration '{file}' failed: {source}")]
    ExecutionError {
        file: String,
        #[source]
        source: RusqliteError,
    },

    #[error("Ledger error: {0}")]
    PersistenceError(String),

    #[error("Cannot roll back {requested} migration(s): only {available} applied")]
    InsufficientHistory { requested: usize, available: usize },

    #[error("No down script found for applied version {0}")]
    MissingDownScript(String),

    #[error("Version {0} does not match any migration in the directory")]
    UnknownVersion(String),

    #[error("Another migration run holds the lock on this database")]
    Locked,

    #[error("Migration run was interrupted")]
    Interrupted,

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Connection and transaction control failures

    #[error("Configuration error: {0}")]
    ConfigError(#[from] figment::Error),

    #[error("Logging error: {0}")]
    LoggingError(#[from] flexi_logger::FlexiLoggerError),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl SqlMigrateError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SqlMigrateError::IoFailure {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(file: &str, reason: impl Into<String>) -> Self {
        SqlMigrateError::MalformedName {
            file: file.to_owned(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_name_message_names_file() {
        let err = SqlMigrateError::malformed("migration.sql", "missing '_' separator");
        assert_eq!(
            err.to_string(),
            "Malformed migration file name 'migration.sql': missing '_' separator"
        );
    }

    #[test]
    fn test_insufficient_history_message() {
        let err = SqlMigrateError::InsufficientHistory {
            requested: 5,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Cannot roll back 5 migration(s): only 2 applied"
        );
    }

    #[test]
    fn test_io_failure_keeps_source() {
        use std::error::Error as _;

        let err = SqlMigrateError::io(
            "/no/such/dir",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/no/such/dir"));
        assert!(err.source().is_some());
    }
}
