//! Applies and rolls back timestamped SQL migration files against SQLite,
//! recording applied versions in a ledger table.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod generator;
pub mod logging;
pub mod migration;
