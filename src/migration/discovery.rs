use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::SqlMigrateError;

use super::file::{Direction, MigrationFile, Version, SQL_EXTENSION};

/// Where migration scripts come from.
///
/// The file-system implementation is the only one the binary uses; the trait
/// keeps discovery and execution independent of how bytes are fetched.
pub trait MigrationSource {
    /// Names of the non-directory entries directly inside `dir`.
    fn list_files(&self, dir: &Path) -> Result<Vec<String>, SqlMigrateError>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, SqlMigrateError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsSource;

impl MigrationSource for FsSource {
    fn list_files(&self, dir: &Path) -> Result<Vec<String>, SqlMigrateError> {
        let entries = fs::read_dir(dir).map_err(|e| SqlMigrateError::io(dir, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SqlMigrateError::io(dir, e))?;
            let file_type = entry.file_type().map_err(|e| SqlMigrateError::io(entry.path(), e))?;
            if file_type.is_dir() {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!("Skipping non UTF-8 file name {:?}", name),
            }
        }

        Ok(names)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, SqlMigrateError> {
        fs::read(path).map_err(|e| SqlMigrateError::io(path, e))
    }
}

/// The up and down scripts that share one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPair {
    version: Version,
    name: String,
    up: Option<MigrationFile>,
    down: Option<MigrationFile>,
}

impl MigrationPair {
    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn up(&self) -> Option<&MigrationFile> {
        self.up.as_ref()
    }

    pub fn down(&self) -> Option<&MigrationFile> {
        self.down.as_ref()
    }

    pub fn file(&self, direction: Direction) -> Option<&MigrationFile> {
        match direction {
            Direction::Up => self.up(),
            Direction::Down => self.down(),
        }
    }
}

/// Every well-formed migration found in a directory, ordered by version.
#[derive(Debug, Default, Clone)]
pub struct MigrationSet {
    pairs: BTreeMap<Version, MigrationPair>,
    malformed: Vec<String>,
}

impl MigrationSet {
    fn insert(&mut self, file: MigrationFile) -> Result<(), SqlMigrateError> {
        let pair = self
            .pairs
            .entry(file.version().clone())
            .or_insert_with(|| MigrationPair {
                version: file.version().clone(),
                name: file.name().to_owned(),
                up: None,
                down: None,
            });

        if pair.name != file.name() {
            return Err(SqlMigrateError::malformed(
                file.file_name(),
                format!(
                    "version {} is already used by migration '{}'",
                    pair.version, pair.name
                ),
            ));
        }

        match file.direction() {
            Direction::Up => pair.up = Some(file),
            Direction::Down => pair.down = Some(file),
        }

        Ok(())
    }

    pub fn get(&self, version: &Version) -> Option<&MigrationPair> {
        self.pairs.get(version)
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.pairs.contains_key(version)
    }

    /// Pairs in ascending version order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MigrationPair> {
        self.pairs.values()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// File names that were skipped because they don't follow the naming
    /// convention.
    pub fn malformed(&self) -> &[String] {
        &self.malformed
    }

    /// Fails on the first version that lacks either its up or its down script.
    pub fn ensure_paired(&self) -> Result<(), SqlMigrateError> {
        for pair in self.pairs.values() {
            match (&pair.up, &pair.down) {
                (Some(_), Some(_)) => {}
                (Some(up), None) => {
                    return Err(SqlMigrateError::malformed(
                        up.file_name(),
                        "no matching .down.sql file",
                    ))
                }
                (None, Some(down)) => {
                    return Err(SqlMigrateError::malformed(
                        down.file_name(),
                        "no matching .up.sql file",
                    ))
                }
                (None, None) => unreachable!("pairs are created from a parsed file"),
            }
        }

        Ok(())
    }

    /// Versions to apply, ascending: every version not in `applied`, stopping
    /// after `target` (inclusive) when one is given.
    pub fn pending<'a>(
        &'a self,
        applied: &'a std::collections::BTreeSet<Version>,
        target: Option<&'a Version>,
    ) -> impl Iterator<Item = &'a MigrationPair> + 'a {
        self.pairs
            .values()
            .take_while(move |pair| target.is_none_or(|target| pair.version <= *target))
            .filter(move |pair| !applied.contains(&pair.version))
    }
}

pub struct Discovery;

impl Discovery {
    /// Lists files in `dir` ending with `extension`, sorted ascending by file
    /// name. Sorting by name is sorting by version because versions are
    /// fixed-width.
    pub fn list(
        source: &dyn MigrationSource,
        dir: &Path,
        extension: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, SqlMigrateError> {
        let mut names = Vec::new();

        for name in source.list_files(dir)? {
            cancel.check()?;
            if name.len() > extension.len() && name.ends_with(extension) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Parses every `.sql` file in `dir` into a [`MigrationSet`].
    ///
    /// Files that don't follow `<version>_<name>.<up|down>.sql` are skipped with
    /// a warning. Two names claiming the same version fail the scan.
    pub fn scan(
        source: &dyn MigrationSource,
        dir: &Path,
        cancel: &CancelToken,
    ) -> Result<MigrationSet, SqlMigrateError> {
        let mut set = MigrationSet::default();

        for file_name in Self::list(source, dir, SQL_EXTENSION, cancel)? {
            match MigrationFile::parse(&file_name) {
                Ok(file) => set.insert(file)?,
                Err(err) => {
                    warn!("Skipping {}: {}", file_name, err);
                    set.malformed.push(file_name);
                }
            }
        }

        debug!(
            "Discovered {} migration(s) in {} ({} skipped)",
            set.len(),
            dir.display(),
            set.malformed.len()
        );

        Ok(set)
    }

    pub fn read_sql(
        source: &dyn MigrationSource,
        dir: &Path,
        file: &MigrationFile,
        cancel: &CancelToken,
    ) -> Result<String, SqlMigrateError> {
        cancel.check()?;

        let path = dir.join(file.file_name());
        let bytes = source.read_file(&path)?;
        String::from_utf8(bytes).map_err(|e| {
            SqlMigrateError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }
}
