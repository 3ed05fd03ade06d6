// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the on-disk layout.

use std::path::{Path, PathBuf};

/// Default base directory for the shared store.
pub const DATA_ROOT: &str = "./data";

/// Default database file name under the data root.
pub const DEFAULT_DATABASE_FILE: &str = "crm.sqlite3";

/// Storage path utilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    root: PathBuf,
    database_file: String,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
        }
    }

    /// Override the database file name.
    pub fn with_database_file(mut self, name: impl Into<String>) -> Self {
        self.database_file = name.into();
        self
    }

    /// Root directory for all data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Store Paths ==========

    /// The shared database file.
    pub fn database(&self) -> PathBuf {
        self.root.join(&self.database_file)
    }

    /// Write-ahead log side file.
    pub fn database_wal(&self) -> PathBuf {
        self.root.join(format!("{}-wal", self.database_file))
    }

    /// Shared-memory index side file.
    pub fn database_shm(&self) -> PathBuf {
        self.root.join(format!("{}-shm", self.database_file))
    }

    /// Marker file held while a migration batch is being applied.
    pub fn migration_lock(&self) -> PathBuf {
        self.root.join(format!("{}.migrating", self.database_file))
    }

    // ========== Backup Paths ==========

    /// Directory containing pre-migration backups.
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Backup file for a batch starting at `from_version`.
    pub fn backup_file(&self, from_version: u32, stamp: &str) -> PathBuf {
        self.backups_dir()
            .join(format!("{}.v{from_version}.{stamp}.bak", self.database_file))
    }

    // ========== Audit Log Paths ==========

    /// Directory containing audit logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Directory for a specific date's audit logs.
    pub fn audit_date_dir(&self, date: &str) -> PathBuf {
        self.audit_dir().join(date)
    }

    /// Path to a daily audit events file (JSONL format).
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_date_dir(date).join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("./data"));
        assert_eq!(paths.database(), PathBuf::from("./data/crm.sqlite3"));
    }

    #[test]
    fn side_files_follow_database_name() {
        let paths = StoragePaths::new("/tmp/test-data").with_database_file("shared.db");
        assert_eq!(paths.database(), PathBuf::from("/tmp/test-data/shared.db"));
        assert_eq!(paths.database_wal(), PathBuf::from("/tmp/test-data/shared.db-wal"));
        assert_eq!(paths.database_shm(), PathBuf::from("/tmp/test-data/shared.db-shm"));
        assert_eq!(
            paths.migration_lock(),
            PathBuf::from("/tmp/test-data/shared.db.migrating")
        );
    }

    #[test]
    fn backup_paths_are_correct() {
        let paths = StoragePaths::new("/data");
        assert_eq!(paths.backups_dir(), PathBuf::from("/data/backups"));
        assert_eq!(
            paths.backup_file(3, "20260101T000000Z"),
            PathBuf::from("/data/backups/crm.sqlite3.v3.20260101T000000Z.bak")
        );
    }

    #[test]
    fn audit_paths_are_correct() {
        let paths = StoragePaths::new("/data");
        assert_eq!(paths.audit_dir(), PathBuf::from("/data/audit"));
        assert_eq!(
            paths.audit_events_file("2026-10-19"),
            PathBuf::from("/data/audit/2026-10-19/events.jsonl")
        );
    }
}
