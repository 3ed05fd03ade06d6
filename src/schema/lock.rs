// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Migration-mode marker file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::runner::MigrationError;
use crate::storage::StoragePaths;

/// Exclusive marker held while a migration batch runs.
///
/// Created with `create_new`, so only one process can hold it. Ordinary
/// store operations treat its presence as lock contention. Removed on drop.
/// A marker left behind by a crashed process must be removed by an operator.
#[derive(Debug)]
pub struct MigrationLock {
    path: PathBuf,
}

impl MigrationLock {
    pub fn acquire(paths: &StoragePaths) -> Result<Self, MigrationError> {
        let path = paths.migration_lock();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrationError::LockHeld(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(
            file,
            "pid={} started_at={}",
            std::process::id(),
            Utc::now().to_rfc3339()
        )?;
        tracing::debug!(path = %path.display(), "Entered migration mode");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove migration lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());

        let lock = MigrationLock::acquire(&paths).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(
            MigrationLock::acquire(&paths),
            Err(MigrationError::LockHeld(_))
        ));

        drop(lock);
        assert!(!paths.migration_lock().exists());
        assert!(MigrationLock::acquire(&paths).is_ok());
    }
}
