use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{info, warn};

use crate::error::SqlMigrateError;
use crate::migration::{Direction, MigrationFile};

const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// Paths of a freshly generated up/down pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMigration {
    pub up: PathBuf,
    pub down: PathBuf,
}

pub struct Generator;

impl Generator {
    pub fn generate(dir: &Path, name: &str) -> Result<GeneratedMigration, SqlMigrateError> {
        Self::generate_at(dir, name, Local::now())
    }

    /// Writes `<YYYYMMDDHHMMSS>_<name>.up.sql` and `.down.sql` stubs stamped
    /// with `now`. Existing files are never overwritten.
    pub fn generate_at(
        dir: &Path,
        name: &str,
        now: DateTime<Local>,
    ) -> Result<GeneratedMigration, SqlMigrateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SqlMigrateError::Error("Migration name is empty".into()));
        }
        if name.contains(['/', '\\']) {
            return Err(SqlMigrateError::Error(format!(
                "Migration name '{}' must not contain path separators",
                name
            )));
        }

        let version = now.format(VERSION_FORMAT).to_string();

        // Generated names must be discoverable
        let up_name = format!("{}_{}{}", version, name, Direction::Up.extension());
        let down_name = format!("{}_{}{}", version, name, Direction::Down.extension());
        MigrationFile::parse(&up_name)?;
        MigrationFile::parse(&down_name)?;

        fs::create_dir_all(dir).map_err(|e| SqlMigrateError::io(dir, e))?;

        let up = dir.join(&up_name);
        let down = dir.join(&down_name);
        for path in [&up, &down] {
            if path.exists() {
                return Err(SqlMigrateError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file already exists"),
                ));
            }
        }

        write_pair(&up, &down)?;

        info!("Created {}", up.display());
        info!("Created {}", down.display());

        Ok(GeneratedMigration { up, down })
    }
}

/// Writes both stubs or neither.
fn write_pair(up: &Path, down: &Path) -> Result<(), SqlMigrateError> {
    write_stub(up, Direction::Up)?;

    if let Err(err) = write_stub(down, Direction::Down) {
        if let Err(e) = fs::remove_file(up) {
            warn!("Unable to remove {} after a failed generate: {}", up.display(), e);
        }
        return Err(err);
    }

    Ok(())
}

fn write_stub(path: &Path, direction: Direction) -> Result<(), SqlMigrateError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| SqlMigrateError::io(path, e))?;

    writeln!(file, "-- {} migration", direction).map_err(|e| SqlMigrateError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 4, 27, 22, 52, 3).unwrap()
    }

    #[test]
    fn test_generate_writes_both_stubs() {
        let dir = TempDir::new().unwrap();
        let migrations = dir.path().join("migrations");

        let generated = Generator::generate_at(&migrations, "create_users_table", fixed_time()).unwrap();

        assert_eq!(
            generated.up,
            migrations.join("20250427225203_create_users_table.up.sql")
        );
        assert_eq!(
            fs::read_to_string(&generated.up).unwrap(),
            "-- up migration\n"
        );
        assert_eq!(
            fs::read_to_string(&generated.down).unwrap(),
            "-- down migration\n"
        );
    }

    #[test]
    fn test_generated_names_parse() {
        let dir = TempDir::new().unwrap();
        let generated = Generator::generate(dir.path(), "add_index").unwrap();

        let up = MigrationFile::parse(generated.up.file_name().unwrap().to_str().unwrap()).unwrap();
        let down =
            MigrationFile::parse(generated.down.file_name().unwrap().to_str().unwrap()).unwrap();
        assert_eq!(up.version(), down.version());
        assert_eq!(up.name(), "add_index");
        assert_eq!(down.direction(), Direction::Down);
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        Generator::generate_at(dir.path(), "create_users_table", fixed_time()).unwrap();
        fs::write(
            dir.path().join("20250427225203_create_users_table.up.sql"),
            "CREATE TABLE users (id INTEGER);",
        )
        .unwrap();

        let err = Generator::generate_at(dir.path(), "create_users_table", fixed_time()).unwrap_err();

        assert!(matches!(err, SqlMigrateError::IoFailure { .. }));
        assert_eq!(
            fs::read_to_string(dir.path().join("20250427225203_create_users_table.up.sql")).unwrap(),
            "CREATE TABLE users (id INTEGER);"
        );
    }

    #[test]
    fn test_failed_down_stub_removes_up_stub() {
        let dir = TempDir::new().unwrap();
        let up = dir.path().join("20250427225203_create_users_table.up.sql");
        let down = dir
            .path()
            .join("missing")
            .join("20250427225203_create_users_table.down.sql");

        let err = write_pair(&up, &down).unwrap_err();

        assert!(matches!(err, SqlMigrateError::IoFailure { .. }));
        assert!(!up.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_generate_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        for name in ["", "   ", "../escape", "a\\b"] {
            assert!(
                Generator::generate_at(dir.path(), name, fixed_time()).is_err(),
                "expected '{name}' to be rejected"
            );
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
