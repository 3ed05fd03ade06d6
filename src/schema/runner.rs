// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Applies pending migration units to a database.
//!
//! ## Unit State Machine
//!
//! ```text
//! Unapplied -> Validating -> Applying -> Committed
//!                  |            |
//!                  +------------+-> RolledBack (batch aborted, backup restored)
//! ```
//!
//! Each unit runs in its own transaction. Any failure rolls back that unit
//! and restores the whole database from the backup taken before the batch,
//! so earlier units of the same batch are undone as well.

use std::path::PathBuf;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use super::backup::{self, BackupHandle};
use super::ledger;
use super::lock::MigrationLock;
use super::migration::{MigrationUnit, Statement, ValidationError};
use crate::storage::{Contention, LockError, StoragePaths};

/// Default value recorded in `applied_by`.
pub const DEFAULT_APPLIED_BY: &str = "system";

/// Why a single unit failed.
#[derive(Debug, thiserror::Error)]
pub enum UnitFailure {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not begin transaction: {0}")]
    Begin(#[source] rusqlite::Error),

    #[error("statement {index} failed: {source}")]
    Statement {
        index: usize,
        source: rusqlite::Error,
    },

    #[error("commit failed: {0}")]
    Commit(#[source] rusqlite::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("migration lock {} is held by another process", .0.display())]
    LockHeld(PathBuf),

    #[error("no migration unit for version {version}")]
    MissingVersion { version: u32 },

    #[error("more than one migration unit for version {version}")]
    DuplicateVersion { version: u32 },

    #[error("database schema version {current} is newer than supported version {supported}")]
    NewerThanSupported { current: u32, supported: u32 },

    #[error("schema ledger has a gap: version {after} is followed by {next}")]
    LedgerGap { after: u32, next: u32 },

    #[error("migration {version} failed: {cause}; restored backup {}", .backup.display())]
    Failed {
        version: u32,
        #[source]
        cause: UnitFailure,
        backup: PathBuf,
    },

    #[error("migration {version} failed: {cause}; restore from {} also failed: {restore_error}", .backup.display())]
    RestoreFailed {
        version: u32,
        cause: UnitFailure,
        backup: PathBuf,
        restore_error: String,
    },

    #[error("backup {} does not match its checksum (expected {expected}, found {actual})", .path.display())]
    BackupChecksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl Contention for MigrationError {
    fn is_contention(&self) -> bool {
        match self {
            MigrationError::Sqlite(err) => err.is_contention(),
            MigrationError::LockHeld(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Unapplied,
    Validating,
    Applying,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub version: u32,
    pub description: String,
    pub state: UnitState,
    pub warnings: Vec<String>,
}

/// Result of a successful `apply` or `ensure_schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    pub outcomes: Vec<UnitOutcome>,
    pub backup: Option<BackupHandle>,
}

impl MigrationReport {
    fn unchanged(version: u32) -> Self {
        Self {
            from: version,
            to: version,
            outcomes: Vec::new(),
            backup: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Units needed to go from `current` to `required`, in ascending order.
pub fn pending(
    current: u32,
    required: u32,
    available: &[MigrationUnit],
) -> Result<Vec<&MigrationUnit>, MigrationError> {
    if current > required {
        return Err(MigrationError::NewerThanSupported {
            current,
            supported: required,
        });
    }
    let mut units = Vec::new();
    for version in current + 1..=required {
        let mut matching = available.iter().filter(|unit| unit.version == version);
        match (matching.next(), matching.next()) {
            (None, _) => return Err(MigrationError::MissingVersion { version }),
            (Some(unit), None) => units.push(unit),
            (Some(_), Some(_)) => return Err(MigrationError::DuplicateVersion { version }),
        }
    }
    Ok(units)
}

/// Migration engine bound to one database location and unit registry.
#[derive(Debug, Clone)]
pub struct Migrator<'a> {
    paths: &'a StoragePaths,
    units: &'a [MigrationUnit],
    applied_by: String,
}

impl<'a> Migrator<'a> {
    pub fn new(paths: &'a StoragePaths, units: &'a [MigrationUnit]) -> Self {
        Self {
            paths,
            units,
            applied_by: DEFAULT_APPLIED_BY.to_string(),
        }
    }

    pub fn applied_by(mut self, applied_by: impl Into<String>) -> Self {
        self.applied_by = applied_by.into();
        self
    }

    /// Current version after checking the ledger has no gaps.
    pub fn current_version(&self, conn: &Connection) -> Result<u32, MigrationError> {
        let applied: Vec<u32> = ledger::versions(conn)?.into_iter().map(|r| r.version).collect();
        if let Some(gap) = ledger::find_gap(&applied) {
            return Err(MigrationError::LedgerGap {
                after: gap.after,
                next: gap.next,
            });
        }
        Ok(applied.last().copied().unwrap_or(0))
    }

    pub fn pending(&self, current: u32, required: u32) -> Result<Vec<&'a MigrationUnit>, MigrationError> {
        pending(current, required, self.units)
    }

    /// Bring the database to `required`. A no-op when already there.
    pub fn ensure_schema(
        &self,
        conn: &mut Connection,
        required: u32,
    ) -> Result<MigrationReport, MigrationError> {
        let current = self.current_version(conn)?;
        if current == required {
            tracing::debug!(version = current, "Schema is up to date");
            return Ok(MigrationReport::unchanged(current));
        }
        // Fail before taking the lock or a backup when units are missing.
        self.pending(current, required)?;

        let _lock = MigrationLock::acquire(self.paths)?;
        // Another process may have migrated since the first read.
        let current = self.current_version(conn)?;
        let units = self.pending(current, required)?;
        self.apply_locked(conn, &units)
    }

    /// Apply an explicit batch, which must start right after the current version.
    pub fn apply(
        &self,
        conn: &mut Connection,
        units: &[&MigrationUnit],
    ) -> Result<MigrationReport, MigrationError> {
        let _lock = MigrationLock::acquire(self.paths)?;
        self.apply_locked(conn, units)
    }

    fn apply_locked(
        &self,
        conn: &mut Connection,
        units: &[&MigrationUnit],
    ) -> Result<MigrationReport, MigrationError> {
        let from = self.current_version(conn)?;
        for (offset, unit) in units.iter().enumerate() {
            let expected = from + 1 + offset as u32;
            if unit.version != expected {
                return Err(MigrationError::MissingVersion { version: expected });
            }
        }
        let Some(last) = units.last() else {
            return Ok(MigrationReport::unchanged(from));
        };
        let to = last.version;

        drain_writers(conn)?;
        ledger::bootstrap(conn)?;
        let backup = backup::create_backup(conn, self.paths, from)?;

        let mut outcomes: Vec<UnitOutcome> = units
            .iter()
            .map(|unit| UnitOutcome {
                version: unit.version,
                description: unit.description.clone(),
                state: UnitState::Unapplied,
                warnings: Vec::new(),
            })
            .collect();

        for (unit, outcome) in units.iter().zip(outcomes.iter_mut()) {
            outcome.state = UnitState::Validating;
            let result = match unit.validate() {
                Ok(warnings) => {
                    for warning in &warnings {
                        tracing::warn!(version = unit.version, warning = %warning, "Destructive migration statement");
                    }
                    outcome.warnings = warnings;
                    outcome.state = UnitState::Applying;
                    self.apply_unit(conn, unit)
                }
                Err(e) => Err(UnitFailure::Validation(e)),
            };

            if let Err(cause) = result {
                outcome.state = UnitState::RolledBack;
                tracing::error!(
                    version = unit.version,
                    error = %cause,
                    backup = %backup.path.display(),
                    "Migration failed, restoring pre-batch backup"
                );
                return Err(match backup::restore_backup(conn, &backup) {
                    Ok(()) => MigrationError::Failed {
                        version: unit.version,
                        cause,
                        backup: backup.path,
                    },
                    Err(restore) => MigrationError::RestoreFailed {
                        version: unit.version,
                        cause,
                        backup: backup.path,
                        restore_error: restore.to_string(),
                    },
                });
            }

            outcome.state = UnitState::Committed;
            tracing::info!(
                version = unit.version,
                description = %unit.description,
                "Applied schema migration"
            );
        }

        Ok(MigrationReport {
            from,
            to,
            outcomes,
            backup: Some(backup),
        })
    }

    fn apply_unit(&self, conn: &mut Connection, unit: &MigrationUnit) -> Result<(), UnitFailure> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(UnitFailure::Begin)?;
        for (index, statement) in unit.statements.iter().enumerate() {
            let result = match statement {
                Statement::Execute(sql) => tx.execute_batch(sql),
                Statement::RecordVersion(version) => {
                    ledger::append(&tx, *version, &self.applied_by, &unit.description)
                }
            };
            result.map_err(|source| UnitFailure::Statement { index, source })?;
        }
        tx.commit().map_err(UnitFailure::Commit)
    }
}

/// Wait for every writer already holding the database write lock.
///
/// Runs with the migration marker in place. A writer that got the lock
/// before the marker existed commits before this returns, so its row is in
/// the backup. Any later writer finds the marker once it holds the lock and
/// backs off without writing.
fn drain_writers(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE; COMMIT;")
}
