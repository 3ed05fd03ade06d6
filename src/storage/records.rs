// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Row access for entity tables, guarded by write fence tokens.
//!
//! Functions here take a plain `&Connection` so they compose inside a
//! transaction opened by the caller. Table and column names come only from
//! the catalog; user input is always bound as a parameter.

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::connection::{StoreError, StoreResult};
use super::encrypted_columns;
use crate::catalog::{EntityKind, FieldRef, FieldStorage, SealedColumn, FENCE_COLUMN, RELATIONSHIP_FLAG_COLUMN};
use crate::crypto::{EnvelopeContext, FieldCipher};
use crate::models::{FenceToken, FieldValue, RecordId};
use crate::permission::sealed::seal_value;
use crate::permission::{SealedValue, StoredValue};

/// The record changed between read and write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} record {id} changed since it was read (read at {expected}, now {actual})")]
pub struct ConflictError {
    pub entity: EntityKind,
    pub id: RecordId,
    pub expected: FenceToken,
    pub actual: FenceToken,
}

/// Column assignments for one insert or update.
///
/// Encrypted fields stay in plaintext here until the row id is known; they
/// are sealed for that row by [`insert_record`] and [`update_record`].
#[derive(Default)]
pub struct ColumnSet {
    columns: BTreeMap<&'static str, Value>,
    sealed: BTreeMap<&'static str, (SealedColumn, FieldValue)>,
}

impl ColumnSet {
    /// Map field values onto physical columns.
    ///
    /// Sealed fields are written to their envelope column only.
    pub fn from_values(entity: EntityKind, values: &[(FieldRef, FieldValue)]) -> StoreResult<Self> {
        let mut set = Self::default();
        for (field, value) in values {
            if field.entity() != entity {
                return Err(StoreError::WrongEntity {
                    field: *field,
                    entity,
                });
            }
            match field.storage() {
                FieldStorage::Plain { column } => {
                    set.columns.insert(column, to_sql_value(value));
                }
                FieldStorage::Sealed(sealed) => {
                    set.sealed
                        .insert(sealed.envelope_column, (sealed, value.clone()));
                }
            }
        }
        Ok(set)
    }

    /// Set the relationship-level confidentiality column.
    pub fn set_relationship_flag(&mut self, entity: EntityKind, confidential: bool) -> StoreResult<()> {
        if entity != EntityKind::Relationship {
            return Err(StoreError::NoRelationshipFlag { entity });
        }
        self.columns
            .insert(RELATIONSHIP_FLAG_COLUMN, Value::Integer(i64::from(confidential)));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.sealed.is_empty()
    }

    /// Envelope column assignments sealed for record `id`.
    fn seal_for(
        &self,
        cipher: &FieldCipher,
        entity: EntityKind,
        id: RecordId,
    ) -> StoreResult<Vec<(&'static str, Value)>> {
        let mut assignments = Vec::with_capacity(self.sealed.len());
        for (sealed, value) in self.sealed.values() {
            let context = envelope_context(entity, *sealed, id);
            let envelope = seal_value(cipher, sealed.tier, context, value)?;
            assignments.push((
                sealed.envelope_column,
                envelope.map(Value::Blob).unwrap_or(Value::Null),
            ));
        }
        Ok(assignments)
    }
}

impl std::fmt::Debug for ColumnSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Names only: sealed values are still plaintext here.
        f.debug_struct("ColumnSet")
            .field("columns", &self.columns.keys().collect::<Vec<_>>())
            .field("sealed", &self.sealed.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Location bound into an envelope stored for record `id`.
pub(crate) fn envelope_context(
    entity: EntityKind,
    sealed: SealedColumn,
    id: RecordId,
) -> EnvelopeContext {
    EnvelopeContext::new(entity.table(), sealed.envelope_column, id.0)
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Integer(i) => Value::Integer(*i),
        FieldValue::Real(r) => Value::Real(*r),
        FieldValue::Blob(b) => Value::Blob(b.clone()),
    }
}

/// Current fence token of a record.
pub fn read_fence(conn: &Connection, entity: EntityKind, id: RecordId) -> StoreResult<FenceToken> {
    let sql = format!(
        "SELECT {FENCE_COLUMN} FROM {} WHERE id = ?1",
        entity.table()
    );
    conn.query_row(&sql, params![id.0], |row| row.get::<_, i64>(0))
        .optional()?
        .map(FenceToken)
        .ok_or(StoreError::NotFound { entity, id })
}

/// Compare a presented token against the stored one.
pub fn check_fence(
    conn: &Connection,
    entity: EntityKind,
    id: RecordId,
    expected: FenceToken,
) -> StoreResult<FenceToken> {
    let actual = read_fence(conn, entity, id)?;
    if actual != expected {
        return Err(ConflictError {
            entity,
            id,
            expected,
            actual,
        }
        .into());
    }
    Ok(actual)
}

/// Insert a new record, stamping its first fence token.
///
/// Encrypted fields are sealed after the insert, once the row id exists.
/// Run this inside a transaction so the row never commits without them.
pub fn insert_record(
    conn: &Connection,
    cipher: &FieldCipher,
    entity: EntityKind,
    columns: ColumnSet,
) -> StoreResult<(RecordId, FenceToken)> {
    let fence = FenceToken::now();
    let mut names = vec![FENCE_COLUMN];
    let mut values = vec![Value::Integer(fence.0)];
    for (name, value) in &columns.columns {
        names.push(*name);
        values.push(value.clone());
    }
    let placeholders = (1..=names.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        entity.table(),
        names.join(", ")
    );
    conn.execute(&sql, params_from_iter(values))?;
    let id = RecordId(conn.last_insert_rowid());

    let sealed = columns.seal_for(cipher, entity, id)?;
    if !sealed.is_empty() {
        let mut assignments = Vec::with_capacity(sealed.len());
        let mut values = Vec::with_capacity(sealed.len() + 1);
        for (name, value) in sealed {
            values.push(value);
            assignments.push(format!("{name} = ?{}", values.len()));
        }
        values.push(Value::Integer(id.0));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            entity.table(),
            assignments.join(", "),
            values.len()
        );
        conn.execute(&sql, params_from_iter(values))?;
    }
    Ok((id, fence))
}

/// Apply column changes and advance the fence.
///
/// `current` must already have been checked in the same transaction; the
/// update is additionally conditioned on it so a stale token never writes.
pub fn update_record(
    conn: &Connection,
    cipher: &FieldCipher,
    entity: EntityKind,
    id: RecordId,
    current: FenceToken,
    columns: ColumnSet,
) -> StoreResult<FenceToken> {
    let next =
        FenceToken::next_after(current).ok_or(StoreError::FenceExhausted { entity, id })?;
    let mut assignments = vec![format!("{FENCE_COLUMN} = ?1")];
    let mut values = vec![Value::Integer(next.0)];
    let sealed = columns.seal_for(cipher, entity, id)?;
    for (name, value) in columns.columns.into_iter().chain(sealed) {
        values.push(value);
        assignments.push(format!("{name} = ?{}", values.len()));
    }
    values.push(Value::Integer(id.0));
    let id_param = values.len();
    values.push(Value::Integer(current.0));
    let fence_param = values.len();

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{id_param} AND {FENCE_COLUMN} = ?{fence_param}",
        entity.table(),
        assignments.join(", ")
    );
    if conn.execute(&sql, params_from_iter(values))? == 0 {
        return Err(stale(conn, entity, id, current));
    }
    Ok(next)
}

/// Delete a record if its fence still matches.
pub fn delete_record(
    conn: &Connection,
    entity: EntityKind,
    id: RecordId,
    expected: FenceToken,
) -> StoreResult<()> {
    let sql = format!(
        "DELETE FROM {} WHERE id = ?1 AND {FENCE_COLUMN} = ?2",
        entity.table()
    );
    if conn.execute(&sql, params![id.0, expected.0])? == 0 {
        return Err(stale(conn, entity, id, expected));
    }
    Ok(())
}

fn stale(conn: &Connection, entity: EntityKind, id: RecordId, expected: FenceToken) -> StoreError {
    match check_fence(conn, entity, id, expected) {
        Err(err) => err,
        // Matching fence but no row touched: the row vanished in between.
        Ok(_) => StoreError::NotFound { entity, id },
    }
}

/// Load the stored representation of one field.
///
/// Only called as the resolver's raw value provider, after access was
/// granted.
pub fn stored_value(conn: &Connection, field: FieldRef, id: RecordId) -> StoreResult<StoredValue> {
    match field.storage() {
        FieldStorage::Plain { column } => {
            read_column(conn, field.entity(), column, id).map(StoredValue::Plain)
        }
        FieldStorage::Sealed(sealed) => read_sealed(conn, field.entity(), sealed, id),
    }
}

fn read_column(
    conn: &Connection,
    entity: EntityKind,
    column: &str,
    id: RecordId,
) -> StoreResult<FieldValue> {
    let sql = format!("SELECT {column} FROM {} WHERE id = ?1", entity.table());
    conn.query_row(&sql, params![id.0], |row| {
        Ok(FieldValue::from_sql_ref(row.get_ref(0)?))
    })
    .optional()?
    .ok_or(StoreError::NotFound { entity, id })
}

fn read_sealed(
    conn: &Connection,
    entity: EntityKind,
    sealed: SealedColumn,
    id: RecordId,
) -> StoreResult<StoredValue> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        sealed.envelope_column,
        entity.table()
    );
    let envelope: Option<Vec<u8>> = conn
        .query_row(&sql, params![id.0], |row| row.get(0))
        .optional()?
        .ok_or(StoreError::NotFound { entity, id })?;
    if let Some(bytes) = envelope {
        let context = envelope_context(entity, sealed, id);
        return Ok(StoredValue::Sealed(SealedValue::new(sealed.tier, context, bytes)));
    }

    let state = encrypted_columns::column_state(conn, entity, sealed)?;
    if state.legacy_authoritative() {
        return read_column(conn, entity, sealed.legacy_column, id).map(StoredValue::Plain);
    }
    Ok(StoredValue::Plain(FieldValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Tier;
    use crate::catalog::{CompanyField, PersonField};
    use crate::storage::test_support;
    use tempfile::TempDir;

    const NAME: FieldRef = FieldRef::Company(CompanyField::Name);
    const REVENUE: FieldRef = FieldRef::Company(CompanyField::Revenue);

    #[test]
    fn insert_and_read_plain_and_sealed_fields() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        let cipher = test_support::cipher();

        let columns = ColumnSet::from_values(
            EntityKind::Company,
            &[
                (NAME, FieldValue::text("Acme")),
                (REVENUE, FieldValue::text("4.2m")),
            ],
        )
        .unwrap();
        let (id, fence) = insert_record(&conn, &cipher, EntityKind::Company, columns).unwrap();

        assert_eq!(read_fence(&conn, EntityKind::Company, id).unwrap(), fence);
        assert_eq!(
            stored_value(&conn, NAME, id).unwrap(),
            StoredValue::Plain(FieldValue::text("Acme"))
        );
        match stored_value(&conn, REVENUE, id).unwrap() {
            StoredValue::Sealed(sealed) => assert_eq!(sealed.tier(), Tier::Tier1),
            other => panic!("expected sealed value, got {other:?}"),
        }

        let raw: Vec<u8> = conn
            .query_row("SELECT revenue_enc FROM companies WHERE id = ?1", [id.0], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(!raw.windows(4).any(|w| w == b"4.2m"));
        let context = EnvelopeContext::new("companies", "revenue_enc", id.0);
        let plaintext = cipher.decrypt(Tier::Tier1, context, &raw).unwrap();
        assert_eq!(
            serde_json::from_slice::<FieldValue>(&plaintext).unwrap(),
            FieldValue::text("4.2m")
        );
        let legacy: Option<String> = conn
            .query_row("SELECT revenue FROM companies WHERE id = ?1", [id.0], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(legacy, None);
    }

    #[test]
    fn stale_fence_rejects_update_without_partial_write() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        let cipher = test_support::cipher();

        let columns =
            ColumnSet::from_values(EntityKind::Company, &[(NAME, FieldValue::text("Acme"))]).unwrap();
        let (id, first) = insert_record(&conn, &cipher, EntityKind::Company, columns).unwrap();

        let rename = |name: &str| {
            ColumnSet::from_values(EntityKind::Company, &[(NAME, FieldValue::text(name))]).unwrap()
        };
        let second =
            update_record(&conn, &cipher, EntityKind::Company, id, first, rename("Acme Ltd")).unwrap();
        assert!(second > first);

        let err =
            update_record(&conn, &cipher, EntityKind::Company, id, first, rename("Lost")).unwrap_err();
        match err {
            StoreError::Conflict(conflict) => {
                assert_eq!(conflict.expected, first);
                assert_eq!(conflict.actual, second);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(
            stored_value(&conn, NAME, id).unwrap(),
            StoredValue::Plain(FieldValue::text("Acme Ltd"))
        );
        assert_eq!(read_fence(&conn, EntityKind::Company, id).unwrap(), second);
    }

    #[test]
    fn delete_requires_current_fence() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        let cipher = test_support::cipher();
        let (id, fence) =
            insert_record(&conn, &cipher, EntityKind::Project, ColumnSet::default()).unwrap();

        let stale_token = FenceToken(fence.0 - 1);
        assert!(matches!(
            delete_record(&conn, EntityKind::Project, id, stale_token),
            Err(StoreError::Conflict(_))
        ));
        delete_record(&conn, EntityKind::Project, id, fence).unwrap();
        assert!(matches!(
            read_fence(&conn, EntityKind::Project, id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn field_from_another_entity_is_rejected() {
        let err = ColumnSet::from_values(
            EntityKind::Company,
            &[(FieldRef::Person(PersonField::Email), FieldValue::text("a@b.c"))],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::WrongEntity { .. }));
    }

    #[test]
    fn missing_record_is_not_found() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        assert!(matches!(
            stored_value(&conn, NAME, RecordId(404)),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            stored_value(&conn, REVENUE, RecordId(404)),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn updated_envelope_is_sealed_for_its_own_row() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        let cipher = test_support::cipher();
        let revenue = |value: i64| {
            ColumnSet::from_values(EntityKind::Company, &[(REVENUE, FieldValue::Integer(value))])
                .unwrap()
        };
        let (a, _) = insert_record(&conn, &cipher, EntityKind::Company, revenue(1)).unwrap();
        let (b, fence) = insert_record(&conn, &cipher, EntityKind::Company, ColumnSet::default()).unwrap();
        update_record(&conn, &cipher, EntityKind::Company, b, fence, revenue(2)).unwrap();

        let raw = |id: RecordId| -> Vec<u8> {
            conn.query_row("SELECT revenue_enc FROM companies WHERE id = ?1", [id.0], |row| {
                row.get(0)
            })
            .unwrap()
        };
        let at = |id: RecordId| EnvelopeContext::new("companies", "revenue_enc", id.0);
        assert!(cipher.decrypt(Tier::Tier1, at(b), &raw(b)).is_ok());
        assert!(cipher.decrypt(Tier::Tier1, at(b), &raw(a)).is_err());
        assert!(cipher.decrypt(Tier::Tier1, at(a), &raw(b)).is_err());
    }

    #[test]
    fn debug_lists_columns_without_values() {
        let columns = ColumnSet::from_values(
            EntityKind::Company,
            &[
                (NAME, FieldValue::text("Acme")),
                (REVENUE, FieldValue::text("4.2m")),
            ],
        )
        .unwrap();
        let debug = format!("{columns:?}");
        assert!(debug.contains("revenue_enc"));
        assert!(!debug.contains("4.2m"));
        assert!(!debug.contains("Acme"));
    }

    #[test]
    fn exhausted_fence_refuses_update() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());
        let cipher = test_support::cipher();
        let name = |name: &str| {
            ColumnSet::from_values(EntityKind::Company, &[(NAME, FieldValue::text(name))]).unwrap()
        };
        let (id, _) = insert_record(&conn, &cipher, EntityKind::Company, name("Acme")).unwrap();
        conn.execute(
            "UPDATE companies SET modified_at = ?1 WHERE id = ?2",
            params![i64::MAX, id.0],
        )
        .unwrap();

        let err = update_record(
            &conn,
            &cipher,
            EntityKind::Company,
            id,
            FenceToken(i64::MAX),
            name("Lost"),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::FenceExhausted { .. }));
        assert_eq!(
            stored_value(&conn, NAME, id).unwrap(),
            StoredValue::Plain(FieldValue::text("Acme"))
        );
    }
}
