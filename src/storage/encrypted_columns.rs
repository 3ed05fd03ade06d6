// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transition from legacy plaintext columns to encrypted envelopes.
//!
//! ## Column Lifecycle
//!
//! ```text
//! legacy authoritative --backfill--> envelope authoritative --drop--> legacy removed
//! ```
//!
//! Progress is recorded per envelope column in `encrypted_column_state`,
//! inside the same database as the data, so every process agrees on which
//! column is authoritative.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::connection::{begin_write, timestamp_from_row, timestamp_to_sql, StoreError, StoreResult};
use super::paths::StoragePaths;
use super::records::envelope_context;
use crate::catalog::{EntityKind, FieldRef, SealedColumn};
use crate::crypto::FieldCipher;
use crate::models::{FieldValue, RecordId};
use crate::permission::sealed::seal_value;

/// Table tracking backfill and cleanup of each envelope column.
pub const STATE_TABLE: &str = "encrypted_column_state";

/// Recorded progress of one envelope column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnState {
    pub backfilled_at: Option<DateTime<Utc>>,
    pub legacy_dropped_at: Option<DateTime<Utc>>,
}

impl ColumnState {
    pub fn is_backfilled(&self) -> bool {
        self.backfilled_at.is_some()
    }

    pub fn legacy_dropped(&self) -> bool {
        self.legacy_dropped_at.is_some()
    }

    /// The legacy plaintext column is still the source of truth.
    pub fn legacy_authoritative(&self) -> bool {
        !self.is_backfilled() && !self.legacy_dropped()
    }
}

/// Result of backfilling one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub field: FieldRef,
    pub rows: usize,
}

pub fn column_state(
    conn: &Connection,
    entity: EntityKind,
    sealed: SealedColumn,
) -> StoreResult<ColumnState> {
    let state = conn
        .query_row(
            "SELECT backfilled_at, legacy_dropped_at FROM encrypted_column_state
             WHERE table_name = ?1 AND column_name = ?2",
            params![entity.table(), sealed.envelope_column],
            |row| {
                Ok(ColumnState {
                    backfilled_at: timestamp_from_row(row, 0)?,
                    legacy_dropped_at: timestamp_from_row(row, 1)?,
                })
            },
        )
        .optional()?;
    Ok(state.unwrap_or_default())
}

fn sealed_fields() -> impl Iterator<Item = (FieldRef, SealedColumn)> {
    FieldRef::all().filter_map(|field| field.sealed_column().map(|sealed| (field, sealed)))
}

/// Encrypt legacy plaintext into envelope columns, once per column.
///
/// Fences are left untouched: the logical value does not change. Columns
/// already backfilled (by this or any other process) are skipped.
pub fn backfill_encrypted_columns(
    conn: &mut Connection,
    paths: &StoragePaths,
    cipher: &FieldCipher,
) -> StoreResult<Vec<BackfillSummary>> {
    let mut summaries = Vec::new();
    for (field, sealed) in sealed_fields() {
        let entity = field.entity();
        let tx = begin_write(conn, paths)?;
        if !column_state(&tx, entity, sealed)?.legacy_authoritative() {
            continue;
        }

        let pending: Vec<(i64, FieldValue)> = {
            let sql = format!(
                "SELECT id, {legacy} FROM {table} WHERE {legacy} IS NOT NULL AND {envelope} IS NULL",
                legacy = sealed.legacy_column,
                envelope = sealed.envelope_column,
                table = entity.table(),
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, FieldValue::from_sql_ref(row.get_ref(1)?)))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let update = format!(
            "UPDATE {} SET {} = ?1 WHERE id = ?2",
            entity.table(),
            sealed.envelope_column
        );
        for (id, value) in &pending {
            let context = envelope_context(entity, sealed, RecordId(*id));
            let envelope = seal_value(cipher, sealed.tier, context, value)?;
            tx.execute(&update, params![envelope, id])?;
        }

        tx.execute(
            "INSERT INTO encrypted_column_state (table_name, column_name, backfilled_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (table_name, column_name) DO UPDATE SET backfilled_at = excluded.backfilled_at",
            params![entity.table(), sealed.envelope_column, timestamp_to_sql(Utc::now())],
        )?;
        tx.commit()?;

        tracing::info!(
            field = %field,
            rows = pending.len(),
            "Backfilled encrypted column"
        );
        summaries.push(BackfillSummary {
            field,
            rows: pending.len(),
        });
    }
    Ok(summaries)
}

/// Remove the legacy plaintext column of an encrypted field.
///
/// Refused until the column has been backfilled. Returns `false` if the
/// column was already dropped.
pub fn drop_legacy_column(
    conn: &mut Connection,
    paths: &StoragePaths,
    field: FieldRef,
) -> StoreResult<bool> {
    let entity = field.entity();
    let sealed = field.sealed_column().ok_or(StoreError::LegacyColumn {
        table: entity.table(),
        column: field.name(),
        reason: "field is not encrypted at rest",
    })?;

    let tx = begin_write(conn, paths)?;
    let state = column_state(&tx, entity, sealed)?;
    if state.legacy_dropped() {
        return Ok(false);
    }
    if !state.is_backfilled() {
        return Err(StoreError::LegacyColumn {
            table: entity.table(),
            column: sealed.legacy_column,
            reason: "backfill has not completed",
        });
    }

    tx.execute_batch(&format!(
        "ALTER TABLE {} DROP COLUMN {}",
        entity.table(),
        sealed.legacy_column
    ))?;
    tx.execute(
        "UPDATE encrypted_column_state SET legacy_dropped_at = ?1
         WHERE table_name = ?2 AND column_name = ?3",
        params![timestamp_to_sql(Utc::now()), entity.table(), sealed.envelope_column],
    )?;
    tx.commit()?;

    tracing::info!(field = %field, column = sealed.legacy_column, "Dropped legacy plaintext column");
    Ok(true)
}
