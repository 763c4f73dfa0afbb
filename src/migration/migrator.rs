use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn, Level};
use logging_timer::timer;
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};

use crate::cancel::CancelToken;
use crate::error::SqlMigrateError;

use super::discovery::{Discovery, FsSource, MigrationSource};
use super::executor::Executor;
use super::file::{checksum, Version};
use super::ledger::{AppliedMigration, Ledger, VersionRecord};
use super::status::{MigrationState, StatusEntry};

/// SQLite VM instructions between cancellation checks while a statement runs.
const PROGRESS_OPS: i32 = 1_000;

/// Applies and rolls back the migrations of a directory against one database.
///
/// Every mutating operation runs in a single `BEGIN IMMEDIATE` transaction:
/// the write lock is taken before the ledger is read, scripts and ledger rows
/// commit together, and a concurrent run against the same database fails with
/// [`SqlMigrateError::Locked`] instead of racing.
pub struct Migrator<S: MigrationSource = FsSource> {
    conn: Connection,
    source: S,
    cancel: CancelToken,
}

impl Migrator<FsSource> {
    pub fn new(conn: Connection) -> Self {
        Self::with_source(conn, FsSource)
    }
}

impl<S: MigrationSource> Migrator<S> {
    pub fn with_source(conn: Connection, source: S) -> Self {
        Migrator {
            conn,
            source,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Applies every pending migration in ascending version order.
    pub fn apply_all(&mut self, dir: &Path) -> Result<Vec<AppliedMigration>, SqlMigrateError> {
        let _tmr = timer!(Level::Debug; "Migrator.apply_all", "{}", dir.display());
        self.apply(dir, None)
    }

    /// Applies pending migrations up to and including `target`.
    pub fn apply_up_to(
        &mut self,
        dir: &Path,
        target: &Version,
    ) -> Result<Vec<AppliedMigration>, SqlMigrateError> {
        let _tmr = timer!(Level::Debug; "Migrator.apply_up_to", "{} {}", dir.display(), target);
        self.apply(dir, Some(target))
    }

    /// Rolls back the highest applied version. "Latest" means latest by
    /// version, not by the order rows were inserted into the ledger.
    pub fn rollback_latest(&mut self, dir: &Path) -> Result<Version, SqlMigrateError> {
        let _tmr = timer!(Level::Debug; "Migrator.rollback_latest", "{}", dir.display());
        let mut rolled_back = self.rollback(dir, 1)?;
        rolled_back
            .pop()
            .ok_or_else(|| SqlMigrateError::Error("Rollback returned no version".into()))
    }

    /// Rolls back the `steps` highest applied versions, highest first. Either
    /// all of them are rolled back or none are.
    pub fn rollback_steps(
        &mut self,
        dir: &Path,
        steps: usize,
    ) -> Result<Vec<Version>, SqlMigrateError> {
        let _tmr = timer!(Level::Debug; "Migrator.rollback_steps", "{} {}", dir.display(), steps);
        self.rollback(dir, steps)
    }

    /// Merges the directory listing with the ledger, ordered by version.
    pub fn current_status(&self, dir: &Path) -> Result<Vec<StatusEntry>, SqlMigrateError> {
        let _tmr = timer!(Level::Debug; "Migrator.current_status", "{}", dir.display());

        let set = Discovery::scan(&self.source, dir, &self.cancel)?;

        Ledger::ensure_schema(&self.conn)?;
        let mut recorded: BTreeMap<Version, VersionRecord> = Ledger::records(&self.conn)?
            .into_iter()
            .map(|record| (record.version.clone(), record))
            .collect();

        let mut entries = Vec::with_capacity(set.len() + recorded.len());

        for pair in set.iter() {
            let entry = match recorded.remove(pair.version()) {
                Some(record) => {
                    let modified = match (pair.up(), record.checksum.as_deref()) {
                        (Some(up), Some(recorded_sum)) => {
                            let sql = Discovery::read_sql(&self.source, dir, up, &self.cancel)?;
                            checksum(&sql) != recorded_sum
                        }
                        _ => false,
                    };

                    StatusEntry {
                        version: pair.version().clone(),
                        name: pair.name().to_owned(),
                        state: MigrationState::Applied,
                        applied_at: Some(record.applied_at),
                        modified,
                    }
                }
                None => StatusEntry {
                    version: pair.version().clone(),
                    name: pair.name().to_owned(),
                    state: MigrationState::Pending,
                    applied_at: None,
                    modified: false,
                },
            };
            entries.push(entry);
        }

        for (version, record) in recorded {
            warn!(
                "Version {} ({}) is recorded as applied but its files are missing",
                version, record.name
            );
            entries.push(StatusEntry {
                version,
                name: record.name,
                state: MigrationState::Missing,
                applied_at: Some(record.applied_at),
                modified: false,
            });
        }

        entries.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(entries)
    }

    fn apply(
        &mut self,
        dir: &Path,
        target: Option<&Version>,
    ) -> Result<Vec<AppliedMigration>, SqlMigrateError> {
        info!("Running migration files inside {}", dir.display());

        let set = Discovery::scan(&self.source, dir, &self.cancel)?;
        set.ensure_paired()?;

        if let Some(target) = target {
            if !set.contains(target) {
                return Err(SqlMigrateError::UnknownVersion(target.to_string()));
            }
        }

        self.with_interrupt(|conn, source, cancel| {
            let tx = Self::begin_locked(conn)?;
            Ledger::ensure_schema(&tx)?;

            let applied = Ledger::applied_set(&tx)?;
            let latest = applied.iter().next_back().cloned();

            let mut done = Vec::new();
            for pair in set.pending(&applied, target) {
                let up = pair.up().ok_or_else(|| {
                    SqlMigrateError::malformed(pair.name(), "no .up.sql file for this version")
                })?;

                if let Some(latest) = &latest {
                    if pair.version() < latest {
                        warn!(
                            "Applying {} out of order: {} is already applied",
                            up.file_name(),
                            latest
                        );
                    }
                }

                let sql = Discovery::read_sql(source, dir, up, cancel)?;
                Executor::apply(&tx, up, &sql, cancel)?;
                done.push(AppliedMigration::new(up, &sql));
            }

            Ledger::record(&tx, &done)?;

            cancel.check()?;
            tx.commit()?;

            if done.is_empty() {
                info!("Database is up to date, no migrations applied");
            } else {
                info!("Applied {} migration(s) from {}", done.len(), dir.display());
            }

            Ok(done)
        })
    }

    fn rollback(&mut self, dir: &Path, steps: usize) -> Result<Vec<Version>, SqlMigrateError> {
        info!("Rolling back {} migration(s) inside {}", steps, dir.display());

        let set = Discovery::scan(&self.source, dir, &self.cancel)?;
        set.ensure_paired()?;

        self.with_interrupt(|conn, source, cancel| {
            let tx = Self::begin_locked(conn)?;
            Ledger::ensure_schema(&tx)?;

            let applied = Ledger::applied_set(&tx)?;
            if steps > applied.len() {
                return Err(SqlMigrateError::InsufficientHistory {
                    requested: steps,
                    available: applied.len(),
                });
            }

            let mut rolled_back = Vec::with_capacity(steps);
            for version in applied.iter().rev().take(steps) {
                let down = set
                    .get(version)
                    .and_then(|pair| pair.down())
                    .ok_or_else(|| SqlMigrateError::MissingDownScript(version.to_string()))?;

                let sql = Discovery::read_sql(source, dir, down, cancel)?;
                Executor::apply(&tx, down, &sql, cancel)?;
                Ledger::remove(&tx, version)?;

                rolled_back.push(version.clone());
            }

            cancel.check()?;
            tx.commit()?;

            for version in &rolled_back {
                info!("Migration {} rolled back", version);
            }

            Ok(rolled_back)
        })
    }

    /// Runs `func` with a progress handler that aborts the current statement
    /// once the cancel token fires.
    fn with_interrupt<T, F>(&mut self, func: F) -> Result<T, SqlMigrateError>
    where
        F: FnOnce(&mut Connection, &S, &CancelToken) -> Result<T, SqlMigrateError>,
    {
        let cancel = self.cancel.clone();
        self.conn
            .progress_handler(PROGRESS_OPS, Some(move || cancel.is_cancelled()));

        let result = func(&mut self.conn, &self.source, &self.cancel);

        self.conn.progress_handler(0, None::<fn() -> bool>);
        result
    }

    fn begin_locked(conn: &mut Connection) -> Result<Transaction<'_>, SqlMigrateError> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| match err.sqlite_error_code() {
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                    SqlMigrateError::Locked
                }
                _ => SqlMigrateError::DatabaseError(err),
            })
    }
}
