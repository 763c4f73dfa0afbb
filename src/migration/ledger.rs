use std::collections::BTreeSet;

use log::{debug, info};
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;

use crate::error::SqlMigrateError;

use super::file::{checksum, MigrationFile, Version};

/// Name of the table recording applied versions.
pub const LEDGER_TABLE: &str = "_gomigrate";

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub id: i64,
    pub version: Version,
    pub name: String,
    pub checksum: Option<String>,
    pub applied_at: i64,
}

/// A migration whose up script ran in the current transaction and is about
/// to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: Version,
    pub name: String,
    pub checksum: String,
}

impl AppliedMigration {
    pub fn new(file: &MigrationFile, sql: &str) -> Self {
        AppliedMigration {
            version: file.version().clone(),
            name: file.name().to_owned(),
            checksum: checksum(sql),
        }
    }
}

fn persistence(context: &str, err: rusqlite::Error) -> SqlMigrateError {
    SqlMigrateError::PersistenceError(format!("{}: {}", context, err))
}

pub struct Ledger;

impl Ledger {
    /// Creates the ledger table unless it already exists. Returns `true` when
    /// the table was created by this call.
    pub fn ensure_schema(conn: &Connection) -> Result<bool, SqlMigrateError> {
        let table_exists: bool = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [LEDGER_TABLE],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .map_err(|e| persistence("Unable to query ledger table", e))?;

        if table_exists {
            return Ok(false);
        }

        let sql = format!(
            "CREATE TABLE {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                checksum TEXT,
                applied_at INTEGER NOT NULL
            )",
            LEDGER_TABLE
        );

        conn.execute_batch(&sql)
            .map_err(|e| persistence("Unable to create ledger table", e))?;

        info!("Table {} created", LEDGER_TABLE);
        Ok(true)
    }

    /// Every recorded version. Reads through `conn`, so it sees committed rows
    /// plus whatever the caller's own open transaction has written.
    pub fn applied_set(conn: &Connection) -> Result<BTreeSet<Version>, SqlMigrateError> {
        let mut versions = BTreeSet::new();

        Self::for_each_record(conn, |record| {
            versions.insert(record.version);
            Ok(())
        })?;

        Ok(versions)
    }

    /// Full ledger rows ordered by version.
    pub fn records(conn: &Connection) -> Result<Vec<VersionRecord>, SqlMigrateError> {
        let mut records = Vec::new();

        Self::for_each_record(conn, |record| {
            records.push(record);
            Ok(())
        })?;

        Ok(records)
    }

    fn for_each_record<F>(conn: &Connection, mut func: F) -> Result<(), SqlMigrateError>
    where
        F: FnMut(VersionRecord) -> Result<(), SqlMigrateError>,
    {
        let sql = format!(
            "SELECT id, version, name, checksum, applied_at
            FROM {}
            ORDER BY version ASC",
            LEDGER_TABLE
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| persistence("Unable to query ledger", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,            // id
                    row.get::<_, String>(1)?,         // version
                    row.get::<_, String>(2)?,         // name
                    row.get::<_, Option<String>>(3)?, // checksum
                    row.get::<_, i64>(4)?,            // applied_at
                ))
            })
            .map_err(|e| persistence("Unable to query ledger", e))?;

        for row in rows {
            let (id, version, name, checksum, applied_at) =
                row.map_err(|e| persistence("Unable to read ledger row", e))?;

            let version = Version::parse(&version).map_err(|_| {
                SqlMigrateError::PersistenceError(format!(
                    "Ledger row {} holds an invalid version '{}'",
                    id, version
                ))
            })?;

            func(VersionRecord {
                id,
                version,
                name,
                checksum,
                applied_at,
            })?;
        }

        Ok(())
    }

    /// Inserts one row per migration inside `tx`. Nothing becomes visible to
    /// other connections until the caller commits, so a failure part way
    /// through leaves no rows behind once the transaction is dropped.
    pub fn record(tx: &Transaction, applied: &[AppliedMigration]) -> Result<(), SqlMigrateError> {
        let sql = format!(
            "INSERT INTO {} (version, name, checksum, applied_at) VALUES (?1, ?2, ?3, ?4)",
            LEDGER_TABLE
        );
        let applied_at = chrono::Utc::now().timestamp();

        for migration in applied {
            let rows = tx
                .execute(
                    &sql,
                    params![
                        migration.version.as_str(),
                        migration.name,
                        migration.checksum,
                        applied_at
                    ],
                )
                .map_err(|e| {
                    persistence(&format!("Unable to record version {}", migration.version), e)
                })?;

            if rows == 0 {
                return Err(SqlMigrateError::PersistenceError(format!(
                    "Recording version {} affected no rows",
                    migration.version
                )));
            }

            debug!("Recorded version {}", migration.version);
        }

        Ok(())
    }

    /// Deletes the row for `version`. A missing row is an error: it means the
    /// ledger and the caller disagree about what is applied.
    pub fn remove(tx: &Transaction, version: &Version) -> Result<(), SqlMigrateError> {
        let sql = format!("DELETE FROM {} WHERE version = ?1", LEDGER_TABLE);

        let rows = tx
            .execute(&sql, [version.as_str()])
            .map_err(|e| persistence(&format!("Unable to remove version {}", version), e))?;

        if rows == 0 {
            return Err(SqlMigrateError::PersistenceError(format!(
                "Version {} is not recorded in the ledger",
                version
            )));
        }

        debug!("Removed version {}", version);
        Ok(())
    }
}
