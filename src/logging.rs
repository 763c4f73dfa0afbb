use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};

use crate::config::LoggingConfig;
use crate::error::SqlMigrateError;

/// Starts the global logger. Everything outside this crate logs at `warn`.
///
/// The returned handle must be kept alive for the life of the process when
/// logging to a file, or buffered lines may be lost.
pub fn init(config: &LoggingConfig) -> Result<LoggerHandle, SqlMigrateError> {
    let spec = log_spec(config);
    let logger = Logger::try_with_str(&spec)?;

    let handle = match &config.log_dir {
        Some(dir) => logger
            .log_to_file(
                FileSpec::default()
                    .directory(dir)
                    .basename("sqlmigrate")
                    .suppress_timestamp(),
            )
            .append()
            .format(flexi_logger::detailed_format)
            .duplicate_to_stderr(Duplicate::Warn)
            .start()?,
        None => logger
            .format(flexi_logger::default_format)
            .log_to_stderr()
            .start()?,
    };

    Ok(handle)
}

fn log_spec(config: &LoggingConfig) -> String {
    format!("warn, sqlmigrate={}", config.sqlmigrate)
}
