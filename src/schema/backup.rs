// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pre-migration backups.
//!
//! Backups use SQLite's online backup API, so the copy is a consistent
//! snapshot even with WAL content not yet checkpointed. A SHA-256 checksum
//! is recorded next to each backup and verified before it is restored.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::runner::MigrationError;
use crate::storage::StoragePaths;

/// A completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupHandle {
    pub path: PathBuf,
    pub sha256: String,
    pub from_version: u32,
}

fn checksum_path(backup: &Path) -> PathBuf {
    backup.with_extension("bak.sha256")
}

fn file_sha256(path: &Path) -> std::io::Result<String> {
    let digest = Sha256::digest(fs::read(path)?);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Copy the main database into the backups directory.
pub fn create_backup(
    conn: &Connection,
    paths: &StoragePaths,
    from_version: u32,
) -> Result<BackupHandle, MigrationError> {
    fs::create_dir_all(paths.backups_dir())?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%6fZ").to_string();
    let path = paths.backup_file(from_version, &stamp);

    conn.backup(DatabaseName::Main, &path, None)?;
    let sha256 = file_sha256(&path)?;
    fs::write(checksum_path(&path), format!("{sha256}\n"))?;

    tracing::info!(
        path = %path.display(),
        from_version,
        sha256 = %sha256,
        "Created pre-migration backup"
    );
    Ok(BackupHandle {
        path,
        sha256,
        from_version,
    })
}

/// Check that a backup file still matches its recorded checksum.
pub fn verify_backup(handle: &BackupHandle) -> Result<(), MigrationError> {
    let actual = file_sha256(&handle.path)?;
    if actual != handle.sha256 {
        return Err(MigrationError::BackupChecksum {
            path: handle.path.clone(),
            expected: handle.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

/// Overwrite the main database with a verified backup.
pub fn restore_backup(conn: &mut Connection, handle: &BackupHandle) -> Result<(), MigrationError> {
    verify_backup(handle)?;
    conn.restore(DatabaseName::Main, &handle.path, None::<fn(Progress)>)?;
    tracing::warn!(
        path = %handle.path.display(),
        version = handle.from_version,
        "Restored database from pre-migration backup"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{connect, ConnectionOptions};
    use tempfile::TempDir;

    #[test]
    fn backup_and_restore_round_trip() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let mut conn = connect(&paths, &ConnectionOptions::default()).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();

        let handle = create_backup(&conn, &paths, 0).unwrap();
        assert!(handle.path.starts_with(paths.backups_dir()));
        assert!(checksum_path(&handle.path).exists());

        conn.execute_batch("INSERT INTO t VALUES (2); CREATE TABLE extra (y);")
            .unwrap();
        restore_backup(&mut conn, &handle).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert!(conn.prepare("SELECT * FROM extra").is_err());
    }

    #[test]
    fn tampered_backup_is_not_restored() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let mut conn = connect(&paths, &ConnectionOptions::default()).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();

        let handle = create_backup(&conn, &paths, 0).unwrap();
        let mut bytes = fs::read(&handle.path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&handle.path, bytes).unwrap();

        assert!(matches!(
            restore_backup(&mut conn, &handle),
            Err(MigrationError::BackupChecksum { .. })
        ));
    }
}
