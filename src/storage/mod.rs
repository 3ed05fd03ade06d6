// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Storage Module
//!
//! This module owns the physical store: a single SQLite database file shared
//! by every process of the application, opened in WAL mode.
//!
//! ## Concurrency Model
//!
//! - Readers never block on a writer (WAL)
//! - At most one writer holds the lock; contention is retried with bounded
//!   backoff and then surfaced as [`LockError`]
//! - Every mutable row carries a fence token (`modified_at`); writes present
//!   the token they read and are rejected with [`ConflictError`] on mismatch
//! - No rows are cached across transactions, so a commit by one process is
//!   visible to the next read of every other process
//!
//! ## Storage Layout
//!
//! ```text
//! <data>/
//!   crm.sqlite3            # Shared database
//!   crm.sqlite3-wal        # Write-ahead log
//!   crm.sqlite3-shm        # WAL index
//!   crm.sqlite3.migrating  # Present only while a migration batch runs
//!   backups/
//!     crm.sqlite3.v{n}.{stamp}.bak
//!   audit/
//!     {date}/events.jsonl  # Daily audit logs
//! ```

pub mod audit;
pub mod connection;
pub mod encrypted_columns;
pub mod paths;
pub mod records;
pub mod retry;

pub use audit::{AuditEvent, AuditEventType, AuditLog};
pub use connection::{begin_write, connect, ensure_not_migrating, ConnectionOptions, StoreError, StoreResult};
pub use encrypted_columns::{backfill_encrypted_columns, drop_legacy_column, BackfillSummary, ColumnState};
pub use paths::StoragePaths;
pub use records::{ColumnSet, ConflictError};
pub use retry::{with_retry, Contention, LockError, RetryPolicy};
