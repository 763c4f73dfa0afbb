use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::SqlMigrateError;

/// Width of the `YYYYMMDDHHMMSS` version prefix.
pub const VERSION_LEN: usize = 14;
pub const SEPARATOR: char = '_';

pub const UP_EXTENSION: &str = ".up.sql";
pub const DOWN_EXTENSION: &str = ".down.sql";
/// Matches both directions when listing a directory.
pub const SQL_EXTENSION: &str = ".sql";

/// A migration version: exactly 14 ASCII digits.
///
/// Because every version has the same width, the derived string ordering is
/// the chronological ordering. Nothing compares versions as integers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn parse(s: &str) -> Result<Self, SqlMigrateError> {
        if s.len() != VERSION_LEN {
            return Err(SqlMigrateError::malformed(
                s,
                format!("version should be {} digits, got {}", VERSION_LEN, s.len()),
            ));
        }

        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SqlMigrateError::malformed(
                s,
                "version contains non-digit characters",
            ));
        }

        Ok(Version(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = SqlMigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

#[derive(AsRefStr, EnumIter, EnumString, Debug, Display, PartialEq, Eq, Hash, Copy, Clone)]
pub enum Direction {
    #[strum(serialize = "up")]
    Up,
    #[strum(serialize = "down")]
    Down,
}

impl Direction {
    pub fn extension(&self) -> &'static str {
        match self {
            Direction::Up => UP_EXTENSION,
            Direction::Down => DOWN_EXTENSION,
        }
    }
}

/// Extracts the version prefix of a migration file name.
///
/// Splits on the first `_`. Fails when there is no separator, when the prefix
/// is not exactly 14 characters, or when any prefix character is not a digit.
pub fn parse_version(file_name: &str) -> Result<Version, SqlMigrateError> {
    let (prefix, _) = file_name.split_once(SEPARATOR).ok_or_else(|| {
        SqlMigrateError::malformed(file_name, "file name doesn't contain an '_' separator")
    })?;

    Version::parse(prefix).map_err(|err| match err {
        SqlMigrateError::MalformedName { reason, .. } => {
            SqlMigrateError::malformed(file_name, reason)
        }
        other => other,
    })
}

/// One side (up or down) of a migration, parsed from
/// `<version>_<name>.<up|down>.sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    version: Version,
    name: String,
    direction: Direction,
    file_name: String,
}

impl MigrationFile {
    pub fn parse(file_name: &str) -> Result<Self, SqlMigrateError> {
        let version = parse_version(file_name)?;

        // parse_version guarantees the separator is present
        let rest = &file_name[VERSION_LEN + SEPARATOR.len_utf8()..];

        let (name, direction) = if let Some(name) = rest.strip_suffix(UP_EXTENSION) {
            (name, Direction::Up)
        } else if let Some(name) = rest.strip_suffix(DOWN_EXTENSION) {
            (name, Direction::Down)
        } else {
            return Err(SqlMigrateError::malformed(
                file_name,
                format!("expected a '{}' or '{}' suffix", UP_EXTENSION, DOWN_EXTENSION),
            ));
        };

        if name.is_empty() {
            return Err(SqlMigrateError::malformed(file_name, "migration name is empty"));
        }

        Ok(MigrationFile {
            version,
            name: name.to_owned(),
            direction,
            file_name: file_name.to_owned(),
        })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Hex SHA-256 of a script, stored in the ledger at apply time.
pub fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())
}
