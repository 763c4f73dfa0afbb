use chrono::{DateTime, Local};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use super::file::Version;

#[derive(
    AsRefStr, EnumIter, EnumString, Debug, Display, PartialEq, Eq, Copy, Clone, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// Recorded in the ledger and present on disk
    #[strum(serialize = "applied")]
    Applied,
    /// Present on disk, not recorded
    #[strum(serialize = "pending")]
    Pending,
    /// Recorded in the ledger but its files are gone
    #[strum(serialize = "missing")]
    Missing,
}

/// One line of `currentStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub version: Version,
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<i64>,
    /// The up script no longer matches the checksum recorded when it ran.
    pub modified: bool,
}

impl StatusEntry {
    pub fn applied_at_local(&self) -> Option<DateTime<Local>> {
        self.applied_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|utc| utc.with_timezone(&Local))
    }
}
