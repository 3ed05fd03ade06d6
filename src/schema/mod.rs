// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Schema Ledger & Migration Engine
//!
//! Versioned, transactional evolution of the shared database.
//!
//! - [`ledger`]: append-only `schema_version` table and integrity checks
//! - [`migration`]: migration units and their validation
//! - [`backup`]: checksummed pre-batch backups and restore
//! - [`lock`]: the migration-mode marker file
//! - [`runner`]: [`Migrator`], which applies pending units
//! - [`builtin`]: units shipped with this crate
//!
//! A failed batch never leaves a partially migrated database: the backup
//! taken before the batch is restored and the failing version reported.

pub mod backup;
pub mod builtin;
pub mod ledger;
pub mod lock;
pub mod migration;
pub mod runner;

pub use backup::BackupHandle;
pub use builtin::REQUIRED_SCHEMA_VERSION;
pub use ledger::{IntegrityReport, LedgerGap, VersionRecord};
pub use migration::{MigrationUnit, Statement, ValidationError};
pub use runner::{pending, MigrationError, MigrationReport, Migrator, UnitFailure, UnitOutcome, UnitState};
