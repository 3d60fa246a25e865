//! Advisory lock that keeps two processes from migrating the same data
//! directory at once.

use super::error::MigrationError;
use chrono::{SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the lock inside the data directory.
pub const MIGRATION_LOCK_FILE: &str = ".migration.lock";

/// RAII guard for the migration lock.
///
/// The file holds a token naming its owner. On drop the file is removed only
/// if it still holds this guard's token.
#[derive(Debug)]
pub struct MigrationLock {
    path: PathBuf,
    token: String,
}

impl MigrationLock {
    /// Creates the lock file in `dir`.
    ///
    /// A lock older than `stale_after` is assumed to belong to a crashed
    /// process and is taken over.
    pub fn acquire(dir: &Path, stale_after: Duration) -> Result<Self, MigrationError> {
        let path = dir.join(MIGRATION_LOCK_FILE);

        if let Some((age, contents)) = stale_lock(&path, stale_after)? {
            tracing::warn!(
                "Found stale migration lock ({}s old) at {}, removing",
                age.as_secs(),
                path.display()
            );
            take_over(&path, &contents)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrationError::MigrationInProgress { path });
            }
            Err(e) => return Err(e.into()),
        };
        let token = format!(
            "pid:{}\ntime:{}",
            std::process::id(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        file.write_all(token.as_bytes())?;
        file.sync_all()?;

        Ok(Self { path, token })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Age and contents of the lock at `path` if it is older than `stale_after`.
fn stale_lock(path: &Path, stale_after: Duration) -> Result<Option<(Duration, String)>, MigrationError> {
    let Ok(modified) = fs::metadata(path).and_then(|metadata| metadata.modified()) else {
        return Ok(None);
    };
    let age = modified.elapsed().unwrap_or_default();
    if age <= stale_after {
        return Ok(None);
    }
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some((age, contents))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Moves the stale lock holding `expected` out of the way.
///
/// The rename is atomic, so of several processes breaking the same lock only
/// one moves it. If what got moved is not the lock that was judged stale,
/// another process has already replaced it; the file is put back and the
/// lock is reported as held.
fn take_over(path: &Path, expected: &str) -> Result<(), MigrationError> {
    let tombstone = path.with_file_name(format!(
        "{}.{}.{}.stale",
        MIGRATION_LOCK_FILE,
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    match fs::rename(path, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let moved = fs::read_to_string(&tombstone);
    if moved.as_deref().ok() == Some(expected) {
        if let Err(e) = fs::remove_file(&tombstone) {
            tracing::warn!("Failed to remove {}: {}", tombstone.display(), e);
        }
        return Ok(());
    }

    // hard_link never replaces an existing file
    let restored = fs::hard_link(&tombstone, path);
    let _ = fs::remove_file(&tombstone);
    match restored {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }
    Err(MigrationError::MigrationInProgress {
        path: path.to_path_buf(),
    })
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!("Failed to remove migration lock {}: {}", self.path.display(), e);
                }
            }
            Ok(_) => tracing::warn!(
                "Migration lock {} now belongs to another process, leaving it",
                self.path.display()
            ),
            Err(e) => tracing::warn!("Failed to read migration lock {}: {}", self.path.display(), e),
        }
    }
}
