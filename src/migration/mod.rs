mod discovery;
mod executor;
mod file;
mod ledger;
mod migrator;
mod status;

pub use discovery::{Discovery, FsSource, MigrationPair, MigrationSet, MigrationSource};
pub use executor::Executor;
pub use file::{checksum, Direction, MigrationFile, Version, DOWN_EXTENSION, UP_EXTENSION};
pub use ledger::{AppliedMigration, Ledger, VersionRecord, LEDGER_TABLE};
pub use migrator::Migrator;
pub use status::{MigrationState, StatusEntry};
