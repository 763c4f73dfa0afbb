use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::SqlMigrateError;

const CONFIG_FILE: &str = "config.toml";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            busy_timeout_ms: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrationsConfig {
    pub dir: PathBuf,
    /// Whole-run deadline. Unset means no deadline.
    pub timeout_secs: Option<u64>,
}

impl MigrationsConfig {
    const DIR: &str = "migrations";

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        MigrationsConfig {
            dir: PathBuf::from(Self::DIR),
            timeout_secs: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub sqlmigrate: String,
    pub log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const SQLMIGRATE_LEVEL: &str = "info";

    fn ensure_valid(&mut self) {
        // Trim and lowercase; an unknown level is reported and replaced by the default
        let str_original = self.sqlmigrate.clone();
        self.sqlmigrate = self.sqlmigrate.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.sqlmigrate.as_str()) {
            eprintln!(
                "Config error: sqlmigrate log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::SQLMIGRATE_LEVEL
            );
            self.sqlmigrate = Self::SQLMIGRATE_LEVEL.to_owned();
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sqlmigrate: Self::SQLMIGRATE_LEVEL.to_owned(),
            log_dir: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub const ENV_PREFIX: &str = "SQLMIGRATE_";
    pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

    /// `config.toml` inside the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sqlmigrate").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Defaults, then the TOML file, then `SQLMIGRATE_*` variables (`__`
    /// separates sections), then `DATABASE_URL`.
    pub fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&[Self::DATABASE_URL_ENV])
                    .map(|_| "database.url".into()),
            )
    }

    pub fn extract(figment: &Figment) -> Result<Self, SqlMigrateError> {
        let mut config: Config = figment.extract()?;
        config.ensure_valid();
        Ok(config)
    }

    /// Loads from `explicit` when given, which must exist. Otherwise uses the
    /// default location, writing a default file there first if none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SqlMigrateError> {
        let config_path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(SqlMigrateError::io(
                        path,
                        std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
                    ));
                }
                path.to_path_buf()
            }
            None => match Self::default_path() {
                Some(path) => {
                    Self::write_default(&path);
                    path
                }
                None => {
                    return Self::extract(&Self::figment(Path::new(CONFIG_FILE)));
                }
            },
        };

        Self::extract(&Self::figment(&config_path))
    }

    fn write_default(config_path: &Path) {
        if config_path.exists() {
            return;
        }

        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
                return;
            }
        }

        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(e) => eprintln!("Failed to serialize default config: {}", e),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    fn extract_in_jail(path: &str) -> figment::error::Result<Config> {
        Config::extract(&Config::figment(Path::new(path)))
            .map_err(|e| figment::Error::from(e.to_string()))
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = extract_in_jail("missing.toml")?;
            assert_eq!(config, Config::default());
            assert_eq!(config.migrations.dir, PathBuf::from("migrations"));
            assert_eq!(config.database.busy_timeout(), Duration::ZERO);
            assert_eq!(config.migrations.timeout(), None);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "config.toml",
                r#"
                [database]
                url = "sqlite://app.db"
                busy_timeout_ms = 250

                [migrations]
                dir = "db/migrations"
                timeout_secs = 30
                "#,
            )?;

            let config = extract_in_jail("config.toml")?;
            assert_eq!(config.database.url.as_deref(), Some("sqlite://app.db"));
            assert_eq!(config.database.busy_timeout(), Duration::from_millis(250));
            assert_eq!(config.migrations.dir, PathBuf::from("db/migrations"));
            assert_eq!(config.migrations.timeout(), Some(Duration::from_secs(30)));
            assert_eq!(config.logging, LoggingConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.toml", "[migrations]\ndir = \"from_file\"")?;
            jail.set_env("SQLMIGRATE_MIGRATIONS__DIR", "from_env");
            jail.set_env("SQLMIGRATE_LOGGING__SQLMIGRATE", "debug");

            let config = extract_in_jail("config.toml")?;
            assert_eq!(config.migrations.dir, PathBuf::from("from_env"));
            assert_eq!(config.logging.sqlmigrate, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_database_url_env_wins() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.toml", "[database]\nurl = \"file.db\"")?;
            jail.set_env("SQLMIGRATE_DATABASE__URL", "prefixed.db");
            jail.set_env("DATABASE_URL", "sqlite://plain.db");

            let config = extract_in_jail("config.toml")?;
            assert_eq!(config.database.url.as_deref(), Some("sqlite://plain.db"));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_falls_back() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.toml", "[logging]\nsqlmigrate = \" LOUD \"")?;

            let config = extract_in_jail("config.toml")?;
            assert_eq!(config.logging.sqlmigrate, "info");
            Ok(())
        });
    }

    #[test]
    fn test_log_level_is_normalized() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.toml", "[logging]\nsqlmigrate = \" WARN \"")?;

            let config = extract_in_jail("config.toml")?;
            assert_eq!(config.logging.sqlmigrate, "warn");
            Ok(())
        });
    }

    #[test]
    fn test_malformed_value_is_config_error() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.toml", "[database]\nbusy_timeout_ms = \"soon\"")?;

            let result = Config::extract(&Config::figment(Path::new("config.toml")));
            assert!(matches!(result, Err(SqlMigrateError::ConfigError(_))));
            Ok(())
        });
    }

    #[test]
    fn test_load_explicit_missing_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let result = Config::load(Some(Path::new("nope.toml")));
            assert!(matches!(result, Err(SqlMigrateError::IoFailure { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_write_default_round_trips() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let path = jail.directory().join("nested").join("config.toml");
            Config::write_default(&path);
            assert!(path.exists());

            let config = extract_in_jail(path.to_str().unwrap())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }
}
