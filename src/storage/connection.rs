// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SQLite connection setup shared by every process.
//!
//! All processes open the same database file in WAL mode. A committed write
//! is visible to the next transaction started by any other connection, so
//! nothing above this layer keeps rows across transactions.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row, Transaction, TransactionBehavior};

use super::paths::StoragePaths;
use super::records::ConflictError;
use super::retry::{Contention, LockError};
use crate::catalog::{EntityKind, FieldRef};
use crate::crypto::{DecryptionError, EncryptionError};
use crate::models::RecordId;

/// Default per-attempt busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("decryption failed: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("{entity} record {id} not found")]
    NotFound { entity: EntityKind, id: RecordId },

    #[error("field {field} does not belong to {entity}")]
    WrongEntity { field: FieldRef, entity: EntityKind },

    #[error("{entity} records carry no relationship flag")]
    NoRelationshipFlag { entity: EntityKind },

    #[error("{entity} record {id} has reached the last fence token")]
    FenceExhausted { entity: EntityKind, id: RecordId },

    #[error("database refused WAL journal mode (got {0})")]
    JournalMode(String),

    #[error("schema migration in progress ({})", .0.display())]
    MigrationInProgress(PathBuf),

    #[error("legacy column {table}.{column}: {reason}")]
    LegacyColumn {
        table: &'static str,
        column: &'static str,
        reason: &'static str,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl Contention for StoreError {
    fn is_contention(&self) -> bool {
        match self {
            StoreError::Sqlite(err) => err.is_contention(),
            StoreError::MigrationInProgress(_) => true,
            _ => false,
        }
    }
}

/// Connection tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// How long SQLite itself waits on a lock before reporting busy.
    pub busy_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Open (or create) the shared database and apply connection pragmas.
pub fn connect(paths: &StoragePaths, options: &ConnectionOptions) -> StoreResult<Connection> {
    std::fs::create_dir_all(paths.root())?;

    let conn = Connection::open_with_flags(
        paths.database(),
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(options.busy_timeout)?;

    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        return Err(StoreError::JournalMode(mode));
    }
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;

    tracing::debug!(path = %paths.database().display(), "Opened database connection");
    Ok(conn)
}

/// Fail with a contention error while another process holds the migration lock.
pub fn ensure_not_migrating(paths: &StoragePaths) -> StoreResult<()> {
    let lock = paths.migration_lock();
    if lock.exists() {
        return Err(StoreError::MigrationInProgress(lock));
    }
    Ok(())
}

/// Take the database write lock for an ordinary write.
///
/// The migration marker is checked again once the lock is held. A migrator
/// drains writers through the same lock after creating its marker, so a
/// write either commits before the pre-batch backup or is refused here.
pub fn begin_write<'c>(
    conn: &'c mut Connection,
    paths: &StoragePaths,
) -> StoreResult<Transaction<'c>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_not_migrating(paths)?;
    Ok(tx)
}

/// Timestamps are stored as RFC 3339 text.
pub(crate) fn timestamp_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Read an optional RFC 3339 timestamp column.
pub(crate) fn timestamp_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(text) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn connect_enables_wal() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let conn = connect(&paths, &ConnectionOptions::default()).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert!(paths.database().exists());
    }

    #[test]
    fn migration_lock_file_counts_as_contention() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        assert!(ensure_not_migrating(&paths).is_ok());

        std::fs::write(paths.migration_lock(), b"").unwrap();
        let err = ensure_not_migrating(&paths).unwrap_err();
        assert!(matches!(err, StoreError::MigrationInProgress(_)));
        assert!(err.is_contention());
    }

    #[test]
    fn second_writer_sees_busy() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let options = ConnectionOptions {
            busy_timeout: Duration::from_millis(10),
        };
        let holder = connect(&paths, &options).unwrap();
        holder
            .execute_batch("CREATE TABLE t (x INTEGER); BEGIN IMMEDIATE;")
            .unwrap();

        let other = connect(&paths, &options).unwrap();
        let err = other.execute("INSERT INTO t (x) VALUES (1)", []).unwrap_err();
        assert!(err.is_contention());

        holder.execute_batch("COMMIT;").unwrap();
        other.execute("INSERT INTO t (x) VALUES (1)", []).unwrap();
    }

    #[test]
    fn write_lock_refuses_once_marker_appears() {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let mut conn = connect(&paths, &ConnectionOptions::default()).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();

        let tx = begin_write(&mut conn, &paths).unwrap();
        tx.execute("INSERT INTO t (x) VALUES (1)", []).unwrap();
        tx.commit().unwrap();

        std::fs::write(paths.migration_lock(), b"").unwrap();
        let err = begin_write(&mut conn, &paths).unwrap_err();
        assert!(matches!(err, StoreError::MigrationInProgress(_)));
        assert!(err.is_contention());

        // The refused transaction was rolled back and released the lock.
        assert!(conn.is_autocommit());
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
