// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confidentiality flag store.
//!
//! Field-level flags live in `confidential_flags`, one row per
//! `(table_name, record_id, field_name)`. Relationship-level confidentiality
//! is the `is_confidential` column of the relationship row itself.
//!
//! Absence of a flag row means public. Records created before flags existed
//! keep their visibility, so sensitive fields must be flagged explicitly
//! when they are created.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::auth::Tier;
use crate::catalog::{EntityKind, FieldRef, SealedColumn, RELATIONSHIP_FLAG_COLUMN};
use crate::models::RecordId;
use crate::permission::FieldClass;
use crate::storage::connection::{timestamp_from_row, timestamp_to_sql};
use crate::storage::{StoreError, StoreResult};

/// A stored field-level flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfidentialFlag {
    pub field: FieldRef,
    pub record_id: RecordId,
    pub is_confidential: bool,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
}

/// Whether a field of a record is flagged confidential. Unflagged is public.
pub fn is_confidential(conn: &Connection, field: FieldRef, record_id: RecordId) -> StoreResult<bool> {
    let flag: Option<bool> = conn
        .query_row(
            "SELECT is_confidential FROM confidential_flags
             WHERE table_name = ?1 AND record_id = ?2 AND field_name = ?3",
            params![field.entity().table(), record_id.0, field.name()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flag.unwrap_or(false))
}

/// Set (or clear) a field-level flag. Last write wins; no history is kept.
pub fn set_confidential(
    conn: &Connection,
    field: FieldRef,
    record_id: RecordId,
    value: bool,
    set_by: &str,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO confidential_flags (table_name, record_id, field_name, is_confidential, set_by, set_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (table_name, record_id, field_name) DO UPDATE SET
             is_confidential = excluded.is_confidential,
             set_by = excluded.set_by,
             set_at = excluded.set_at",
        params![
            field.entity().table(),
            record_id.0,
            field.name(),
            value,
            set_by,
            timestamp_to_sql(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Read the flag carried on a relationship record.
pub fn is_relationship_confidential(conn: &Connection, relationship_id: RecordId) -> StoreResult<bool> {
    let entity = EntityKind::Relationship;
    let sql = format!(
        "SELECT {RELATIONSHIP_FLAG_COLUMN} FROM {} WHERE id = ?1",
        entity.table()
    );
    conn.query_row(&sql, params![relationship_id.0], |row| row.get(0))
        .optional()?
        .ok_or(StoreError::NotFound {
            entity,
            id: relationship_id,
        })
}

/// All stored flags of one record.
///
/// Rows naming a field the catalog does not know are skipped with a warning.
pub fn flags_for_record(
    conn: &Connection,
    entity: EntityKind,
    record_id: RecordId,
) -> StoreResult<BTreeMap<FieldRef, ConfidentialFlag>> {
    let mut stmt = conn.prepare(
        "SELECT field_name, is_confidential, set_by, set_at FROM confidential_flags
         WHERE table_name = ?1 AND record_id = ?2",
    )?;
    let rows = stmt.query_map(params![entity.table(), record_id.0], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, bool>(1)?,
            row.get::<_, String>(2)?,
            timestamp_from_row(row, 3)?,
        ))
    })?;

    let mut flags = BTreeMap::new();
    for row in rows {
        let (field_name, is_confidential, set_by, set_at) = row?;
        let Some(field) = FieldRef::from_names(entity.table(), &field_name) else {
            tracing::warn!(
                table = entity.table(),
                field = %field_name,
                record_id = %record_id,
                "Ignoring confidentiality flag for unknown field"
            );
            continue;
        };
        flags.insert(
            field,
            ConfidentialFlag {
                field,
                record_id,
                is_confidential,
                set_by,
                set_at: set_at.unwrap_or_default(),
            },
        );
    }
    Ok(flags)
}

/// Remove every flag of a record. Used when the record is deleted.
pub fn clear_record(conn: &Connection, entity: EntityKind, record_id: RecordId) -> StoreResult<usize> {
    Ok(conn.execute(
        "DELETE FROM confidential_flags WHERE table_name = ?1 AND record_id = ?2",
        params![entity.table(), record_id.0],
    )?)
}

/// Classification a field has regardless of flags.
///
/// Fields sealed with the Tier1 key are Tier1 whether or not they are
/// flagged: their value cannot be decrypted without the capability.
pub fn baseline_class(field: FieldRef) -> FieldClass {
    match field.sealed_column() {
        Some(SealedColumn {
            tier: Tier::Tier1,
            ..
        }) => FieldClass::Tier1,
        _ => FieldClass::Public,
    }
}

/// Classification of a non-Tier2 field of a stored record, for the resolver.
pub fn field_class(conn: &Connection, field: FieldRef, record_id: RecordId) -> StoreResult<FieldClass> {
    if baseline_class(field) == FieldClass::Tier1 {
        return Ok(FieldClass::Tier1);
    }
    Ok(if is_confidential(conn, field, record_id)? {
        FieldClass::Tier1
    } else {
        FieldClass::Public
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CompanyField, RelationshipField};
    use crate::storage::test_support;
    use tempfile::TempDir;

    const NOTES: FieldRef = FieldRef::Company(CompanyField::Notes);

    #[test]
    fn unflagged_fields_are_public() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        for field in FieldRef::all() {
            assert!(!is_confidential(&conn, field, RecordId(1)).unwrap());
        }
        assert_eq!(field_class(&conn, NOTES, RecordId(1)).unwrap(), FieldClass::Public);
    }

    #[test]
    fn set_confidential_is_last_write_wins() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());

        set_confidential(&conn, NOTES, RecordId(3), true, "alice").unwrap();
        assert!(is_confidential(&conn, NOTES, RecordId(3)).unwrap());
        assert!(!is_confidential(&conn, NOTES, RecordId(4)).unwrap());
        assert_eq!(field_class(&conn, NOTES, RecordId(3)).unwrap(), FieldClass::Tier1);

        set_confidential(&conn, NOTES, RecordId(3), false, "bob").unwrap();
        assert!(!is_confidential(&conn, NOTES, RecordId(3)).unwrap());

        let flags = flags_for_record(&conn, EntityKind::Company, RecordId(3)).unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[&NOTES].set_by, "bob");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM confidential_flags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn sealed_tier1_fields_are_never_public() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        let revenue = FieldRef::Company(CompanyField::Revenue);
        set_confidential(&conn, revenue, RecordId(1), false, "alice").unwrap();
        assert_eq!(field_class(&conn, revenue, RecordId(1)).unwrap(), FieldClass::Tier1);
    }

    #[test]
    fn relationship_flag_is_read_from_the_record() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        conn.execute(
            "INSERT INTO relationships (kind, is_confidential, modified_at) VALUES ('board', 1, 1)",
            [],
        )
        .unwrap();
        let id = RecordId(conn.last_insert_rowid());
        assert!(is_relationship_confidential(&conn, id).unwrap());
        assert!(matches!(
            is_relationship_confidential(&conn, RecordId(999)),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn clear_record_and_unknown_fields() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        let kind = FieldRef::Relationship(RelationshipField::Kind);
        set_confidential(&conn, kind, RecordId(5), true, "alice").unwrap();
        conn.execute(
            "INSERT INTO confidential_flags (table_name, record_id, field_name, is_confidential, set_by, set_at)
             VALUES ('relationships', 5, 'retired_field', 1, 'alice', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();

        let flags = flags_for_record(&conn, EntityKind::Relationship, RecordId(5)).unwrap();
        assert_eq!(flags.len(), 1);
        assert!(flags.contains_key(&kind));

        assert_eq!(clear_record(&conn, EntityKind::Relationship, RecordId(5)).unwrap(), 2);
        assert!(!is_confidential(&conn, kind, RecordId(5)).unwrap());
    }
}
