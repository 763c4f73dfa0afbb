use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use log::debug;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::database::Database;
use crate::error::SqlMigrateError;
use crate::generator::Generator;
use crate::logging;
use crate::migration::{Migrator, StatusEntry, Version};

#[derive(Parser, Debug)]
#[command(
    name = "sqlmigrate",
    version,
    about = "sqlmigrate: apply and roll back timestamped SQL migrations"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the platform config directory)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Database to migrate, e.g. sqlite://app.db (overrides DATABASE_URL)
    #[arg(long = "database-url", short = 'u', global = true)]
    pub database_url: Option<String>,

    /// Directory holding the migration files
    #[arg(long = "dir", short = 'd', global = true)]
    pub dir: Option<PathBuf>,

    /// Abort the run after this many seconds
    #[arg(long = "timeout", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending migrations
    Migrate {
        /// Stop after this version (inclusive)
        #[arg(long = "to", value_parser = parse_version)]
        to: Option<Version>,
    },

    /// Roll back the most recently applied migrations
    Rollback {
        /// Number of migrations to roll back
        #[arg(long = "steps", short = 'n', default_value_t = 1)]
        steps: usize,
    },

    /// Show applied, pending and missing migrations
    Status {
        #[arg(long = "format", value_enum, default_value_t = StatusFormat::Table)]
        format: StatusFormat,
    },

    /// Create empty up and down migration files
    #[command(alias = "g")]
    Generate {
        /// Descriptive name, e.g. create_users_table
        name: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFormat {
    Table,
    Json,
}

fn parse_version(s: &str) -> Result<Version, String> {
    Version::parse(s).map_err(|e| e.to_string())
}

fn stdout_error(e: io::Error) -> SqlMigrateError {
    SqlMigrateError::io("<stdout>", e)
}

impl Cli {
    pub fn handle_command_line() -> Result<(), SqlMigrateError> {
        let args = Cli::parse();

        let config = args.resolve_config(Config::load(args.config.as_deref())?);
        let _logger = logging::init(&config.logging)?;
        debug!("Command-line args: {:?}", args);

        let stdout = io::stdout();
        args.run(&config, &mut stdout.lock())
    }

    /// Command-line values win over every other configuration layer.
    pub fn resolve_config(&self, mut config: Config) -> Config {
        if let Some(url) = &self.database_url {
            config.database.url = Some(url.clone());
        }
        if let Some(dir) = &self.dir {
            config.migrations.dir = dir.clone();
        }
        if let Some(timeout) = self.timeout {
            config.migrations.timeout_secs = Some(timeout);
        }
        config
    }

    pub fn run<W: Write>(&self, config: &Config, out: &mut W) -> Result<(), SqlMigrateError> {
        let dir = config.migrations.dir.as_path();

        match &self.command {
            Command::Migrate { to } => Self::migrate(config, dir, to.as_ref(), out),
            Command::Rollback { steps } => Self::rollback(config, dir, *steps, out),
            Command::Status { format } => Self::status(config, dir, *format, out),
            Command::Generate { name } => {
                let generated = Generator::generate(dir, name)?;
                writeln!(out, "Created {}", generated.up.display()).map_err(stdout_error)?;
                writeln!(out, "Created {}", generated.down.display()).map_err(stdout_error)
            }
        }
    }

    fn open_migrator(config: &Config) -> Result<Migrator, SqlMigrateError> {
        let url = config.database.url.as_deref().ok_or_else(|| {
            SqlMigrateError::ConfigError(figment::Error::from(
                "no database url: set DATABASE_URL or pass --database-url".to_owned(),
            ))
        })?;

        let conn = Database::connect(url, config.database.busy_timeout())?;

        let cancel = match config.migrations.timeout() {
            Some(timeout) => CancelToken::new().with_timeout(timeout),
            None => CancelToken::new(),
        };

        Ok(Migrator::new(conn).with_cancel_token(cancel))
    }

    fn migrate<W: Write>(
        config: &Config,
        dir: &Path,
        to: Option<&Version>,
        out: &mut W,
    ) -> Result<(), SqlMigrateError> {
        let mut migrator = Self::open_migrator(config)?;

        let applied = match to {
            Some(target) => migrator.apply_up_to(dir, target)?,
            None => migrator.apply_all(dir)?,
        };

        if applied.is_empty() {
            return writeln!(out, "Database is up to date").map_err(stdout_error);
        }

        for migration in &applied {
            writeln!(out, "Applied {}_{}", migration.version, migration.name)
                .map_err(stdout_error)?;
        }
        Ok(())
    }

    fn rollback<W: Write>(
        config: &Config,
        dir: &Path,
        steps: usize,
        out: &mut W,
    ) -> Result<(), SqlMigrateError> {
        let mut migrator = Self::open_migrator(config)?;

        let rolled_back = if steps == 1 {
            vec![migrator.rollback_latest(dir)?]
        } else {
            migrator.rollback_steps(dir, steps)?
        };

        for version in &rolled_back {
            writeln!(out, "Rolled back {}", version).map_err(stdout_error)?;
        }
        Ok(())
    }

    fn status<W: Write>(
        config: &Config,
        dir: &Path,
        format: StatusFormat,
        out: &mut W,
    ) -> Result<(), SqlMigrateError> {
        let migrator = Self::open_migrator(config)?;
        let entries = migrator.current_status(dir)?;

        match format {
            StatusFormat::Json => {
                let json = serde_json::to_string_pretty(&entries)
                    .map_err(|e| SqlMigrateError::Error(format!("Unable to encode status: {}", e)))?;
                writeln!(out, "{}", json).map_err(stdout_error)
            }
            StatusFormat::Table => print_status_table(&entries, out).map_err(stdout_error),
        }
    }
}

fn print_status_table<W: Write>(entries: &[StatusEntry], out: &mut W) -> io::Result<()> {
    if entries.is_empty() {
        return writeln!(out, "No migrations found");
    }

    let name_width = entries
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    writeln!(
        out,
        "{:<14}  {:<name_width$}  {:<8}  APPLIED AT",
        "VERSION", "NAME", "STATE"
    )?;

    for entry in entries {
        let applied_at = entry
            .applied_at_local()
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_owned());
        let state = if entry.modified {
            format!("{}*", entry.state)
        } else {
            entry.state.to_string()
        };

        writeln!(
            out,
            "{:<14}  {:<name_width$}  {:<8}  {}",
            entry.version, entry.name, state, applied_at
        )?;
    }

    if entries.iter().any(|e| e.modified) {
        writeln!(out, "* up script changed since it was applied")?;
    }

    Ok(())
}
