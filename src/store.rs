// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The data store façade used by application code.
//!
//! A [`DataStore`] owns one connection to the shared database. Every
//! operation runs in its own transaction: reads see one consistent snapshot,
//! writes take the write lock up front (`BEGIN IMMEDIATE`) and refuse to
//! proceed if a migration started while they waited for it. They then check
//! the fence token and apply value and confidentiality changes together. Nothing read
//! from the database outlives the operation that read it.
//!
//! ## Opening
//!
//! [`DataStore::open`] loads both tier keys, brings the schema to
//! [`REQUIRED_SCHEMA_VERSION`] and backfills encrypted columns that have not
//! been backfilled yet. A failed migration leaves the database restored to
//! its pre-batch backup and the store unopened.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;
use serde_json::json;

use crate::auth::{Principal, Tier};
use crate::catalog::{EntityKind, FieldRef, RELATIONSHIP_FLAG_COLUMN};
use crate::config::CoreConfig;
use crate::confidentiality::{self, ConfidentialFlag};
use crate::crypto::{FieldCipher, KeySource};
use crate::error::{CoreError, CoreResult};
use crate::legacy;
use crate::models::{FenceToken, FieldValue, RecordChanges, RecordId, RecordView};
use crate::permission::{can_view, Classification, PermissionResolver, RelationshipRef, Visibility};
use crate::schema::{
    builtin, ledger, IntegrityReport, MigrationError, MigrationUnit, Migrator, REQUIRED_SCHEMA_VERSION,
};
use crate::storage::records::{self, ColumnSet};
use crate::storage::{
    backfill_encrypted_columns, begin_write, connect, encrypted_columns, ensure_not_migrating, with_retry,
    AuditEvent, AuditEventType, AuditLog, RetryPolicy, StoragePaths, StoreError,
};

#[derive(Debug)]
pub struct DataStore {
    paths: StoragePaths,
    conn: Mutex<Connection>,
    cipher: Arc<FieldCipher>,
    retry: RetryPolicy,
    audit: AuditLog,
}

impl DataStore {
    /// Open the store with the built-in migrations.
    pub fn open(config: &CoreConfig, keys: &dyn KeySource) -> CoreResult<Self> {
        Self::open_with(config, keys, &builtin::migrations(), REQUIRED_SCHEMA_VERSION)
    }

    /// Open the store, migrating to `required` with the given units.
    pub fn open_with(
        config: &CoreConfig,
        keys: &dyn KeySource,
        units: &[MigrationUnit],
        required: u32,
    ) -> CoreResult<Self> {
        let cipher = FieldCipher::load(keys)?;
        let audit = AuditLog::new(config.paths.clone());
        let mut conn = with_retry(&config.retry, "connect", || {
            connect(&config.paths, &config.connection)
        })?;

        let migrator = Migrator::new(&config.paths, units).applied_by(config.applied_by.clone());
        let report = match with_retry(&config.retry, "ensure_schema", || {
            migrator.ensure_schema(&mut conn, required)
        }) {
            Ok(report) => report,
            Err(err) => {
                audit_migration_failure(&audit, &config.applied_by, required, &err);
                return Err(err.into());
            }
        };
        if !report.is_noop() {
            audit.record(
                AuditEvent::new(AuditEventType::SchemaMigrated)
                    .with_user(&config.applied_by)
                    .with_resource("schema", report.to.to_string())
                    .with_details(json!({
                        "from": report.from,
                        "to": report.to,
                        "units": report.outcomes.len(),
                        "backup": report.backup.as_ref().map(|b| b.path.display().to_string()),
                    })),
            );
        }

        let backfilled = with_retry(&config.retry, "backfill", || {
            backfill_encrypted_columns(&mut conn, &config.paths, &cipher)
        })?;
        for summary in &backfilled {
            audit.record(
                AuditEvent::new(AuditEventType::BackfillCompleted)
                    .with_user(&config.applied_by)
                    .with_resource(summary.field.entity().table(), summary.field.name())
                    .with_details(json!({ "rows": summary.rows })),
            );
        }

        tracing::info!(
            database = %config.paths.database().display(),
            schema_version = report.to,
            tier1_key = cipher.fingerprint(Tier::Tier1),
            tier2_key = cipher.fingerprint(Tier::Tier2),
            "Data store opened"
        );

        Ok(Self {
            paths: config.paths.clone(),
            conn: Mutex::new(conn),
            cipher: Arc::new(cipher),
            retry: config.retry.clone(),
            audit,
        })
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Run `op` on the connection, retrying lock contention with backoff.
    fn with_connection<T, F>(&self, operation: &str, mut op: F) -> CoreResult<T>
    where
        F: FnMut(&mut Connection) -> CoreResult<T>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        with_retry(&self.retry, operation, || {
            ensure_not_migrating(&self.paths)?;
            op(&mut *conn)
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read every field of a record as seen by `principal`.
    pub fn read_record(
        &self,
        principal: &Principal,
        entity: EntityKind,
        id: RecordId,
    ) -> CoreResult<RecordView> {
        self.with_connection("read_record", |conn| {
            let tx = conn.transaction()?;
            let fence = records::read_fence(&tx, entity, id)?;
            let visible = self.relationship_visible(&tx, principal, entity, id)?;

            let mut fields = BTreeMap::new();
            for field in entity.fields() {
                let value = if visible {
                    self.view_stored_field(&tx, principal, *field, id)?
                } else {
                    Visibility::Redacted
                };
                fields.insert(*field, value);
            }
            tx.commit()?;
            Ok(RecordView {
                entity,
                id,
                fence,
                fields,
            })
        })
    }

    /// Read one field as seen by `principal`.
    pub fn read_field(
        &self,
        principal: &Principal,
        field: FieldRef,
        id: RecordId,
    ) -> CoreResult<Visibility<FieldValue>> {
        self.with_connection("read_field", |conn| {
            let tx = conn.transaction()?;
            records::read_fence(&tx, field.entity(), id)?;
            let value = if self.relationship_visible(&tx, principal, field.entity(), id)? {
                self.view_stored_field(&tx, principal, field, id)?
            } else {
                Visibility::Redacted
            };
            tx.commit()?;
            Ok(value)
        })
    }

    /// Current fence token of a record.
    pub fn fence(&self, entity: EntityKind, id: RecordId) -> CoreResult<FenceToken> {
        self.with_connection("read_fence", |conn| Ok(records::read_fence(conn, entity, id)?))
    }

    fn relationship_visible(
        &self,
        conn: &Connection,
        principal: &Principal,
        entity: EntityKind,
        id: RecordId,
    ) -> CoreResult<bool> {
        if entity != EntityKind::Relationship {
            return Ok(true);
        }
        let relationship = RelationshipRef {
            id,
            is_confidential: confidentiality::is_relationship_confidential(conn, id)?,
        };
        Ok(PermissionResolver::new(&self.cipher)
            .view_relationship(principal, &relationship, ())
            .is_visible())
    }

    fn view_stored_field(
        &self,
        conn: &Connection,
        principal: &Principal,
        field: FieldRef,
        id: RecordId,
    ) -> CoreResult<Visibility<FieldValue>> {
        let resolver = PermissionResolver::new(&self.cipher);
        let provider = || records::stored_value(conn, field, id);
        let result = if field.is_tier2() {
            resolver.view_tier2_field(principal, provider)
        } else {
            let class = confidentiality::field_class(conn, field, id)?;
            resolver.view_field(principal, field, id, class, provider)
        };

        result.map_err(|err| {
            if let StoreError::Decryption(decryption) = &err {
                tracing::error!(
                    field = %field,
                    record_id = %id,
                    error = %decryption,
                    "Stored value failed to decrypt"
                );
                self.audit.record(
                    AuditEvent::new(AuditEventType::DecryptionFailed)
                        .with_user(&principal.user_id)
                        .with_resource(field.entity().table(), id.to_string())
                        .with_details(json!({ "field": field.name() }))
                        .failed(decryption.to_string()),
                );
            }
            err.into()
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create a record with its initial values and flags.
    pub fn create_record(
        &self,
        principal: &Principal,
        entity: EntityKind,
        changes: RecordChanges,
    ) -> CoreResult<(RecordId, FenceToken)> {
        validate_entity(entity, &changes)?;
        let (id, fence) = self.with_connection("create_record", |conn| {
            let tx = begin_write(conn, &self.paths)?;
            self.authorize(&tx, principal, entity, None, &changes)?;

            let mut columns = ColumnSet::from_values(entity, &changes.values)?;
            if let Some(confidential) = changes.relationship_confidential {
                columns.set_relationship_flag(entity, confidential)?;
            }
            let (id, fence) = records::insert_record(&tx, &self.cipher, entity, columns)?;
            for (field, confidential) in &changes.flags {
                confidentiality::set_confidential(&tx, *field, id, *confidential, &principal.user_id)?;
            }
            tx.commit()?;
            Ok((id, fence))
        })?;

        tracing::info!(entity = %entity, record_id = %id, user_id = %principal.user_id, "Record created");
        self.audit_write(AuditEventType::RecordCreated, principal, entity, id, &changes);
        Ok((id, fence))
    }

    /// Apply `changes` to a record read at `fence`.
    ///
    /// Returns the record's new fence token. A token that no longer matches
    /// fails with a conflict and nothing is written.
    pub fn write_record(
        &self,
        principal: &Principal,
        entity: EntityKind,
        id: RecordId,
        changes: RecordChanges,
        fence: FenceToken,
    ) -> CoreResult<FenceToken> {
        validate_entity(entity, &changes)?;
        let result = self.with_connection("write_record", |conn| {
            let tx = begin_write(conn, &self.paths)?;
            let current = records::check_fence(&tx, entity, id, fence)?;
            self.authorize(&tx, principal, entity, Some(id), &changes)?;

            let mut columns = ColumnSet::from_values(entity, &changes.values)?;
            if let Some(confidential) = changes.relationship_confidential {
                columns.set_relationship_flag(entity, confidential)?;
            }
            for (field, confidential) in &changes.flags {
                confidentiality::set_confidential(&tx, *field, id, *confidential, &principal.user_id)?;
            }
            let next = records::update_record(&tx, &self.cipher, entity, id, current, columns)?;
            tx.commit()?;
            Ok(next)
        });

        match result {
            Ok(next) => {
                tracing::debug!(entity = %entity, record_id = %id, fence = next.0, "Record updated");
                self.audit_write(AuditEventType::RecordUpdated, principal, entity, id, &changes);
                Ok(next)
            }
            Err(err) => {
                if let Some(conflict) = err.as_conflict() {
                    self.audit_conflict(principal, conflict.entity, conflict.id, &err);
                }
                Err(err)
            }
        }
    }

    /// Delete a record read at `fence`, together with its flags.
    pub fn delete_record(
        &self,
        principal: &Principal,
        entity: EntityKind,
        id: RecordId,
        fence: FenceToken,
    ) -> CoreResult<()> {
        let result = self.with_connection("delete_record", |conn| {
            let tx = begin_write(conn, &self.paths)?;
            records::check_fence(&tx, entity, id, fence)?;
            if !self.relationship_visible(&tx, principal, entity, id)? {
                return Err(record_not_permitted(entity, id));
            }
            records::delete_record(&tx, entity, id, fence)?;
            confidentiality::clear_record(&tx, entity, id)?;
            tx.commit()?;
            Ok(())
        });

        match result {
            Ok(()) => {
                tracing::info!(entity = %entity, record_id = %id, user_id = %principal.user_id, "Record deleted");
                self.audit.record(
                    AuditEvent::new(AuditEventType::RecordDeleted)
                        .with_user(&principal.user_id)
                        .with_resource(entity.table(), id.to_string()),
                );
                Ok(())
            }
            Err(err) => {
                if err.as_conflict().is_some() {
                    self.audit_conflict(principal, entity, id, &err);
                }
                Err(err)
            }
        }
    }

    // =========================================================================
    // Confidentiality
    // =========================================================================

    /// Flag or unflag one field of a record. Requires Tier1.
    ///
    /// Changing a flag advances the record's fence, so writers holding a
    /// token from before the change must re-read.
    pub fn set_field_confidential(
        &self,
        principal: &Principal,
        field: FieldRef,
        id: RecordId,
        confidential: bool,
    ) -> CoreResult<FenceToken> {
        if !principal.has_tier(Tier::Tier1) {
            return Err(CoreError::not_permitted(field));
        }
        let entity = field.entity();
        let next = self.with_connection("set_field_confidential", |conn| {
            let tx = begin_write(conn, &self.paths)?;
            let current = records::read_fence(&tx, entity, id)?;
            confidentiality::set_confidential(&tx, field, id, confidential, &principal.user_id)?;
            let next = records::update_record(&tx, &self.cipher, entity, id, current, ColumnSet::default())?;
            tx.commit()?;
            Ok(next)
        })?;

        self.audit.record(
            AuditEvent::new(AuditEventType::ConfidentialityChanged)
                .with_user(&principal.user_id)
                .with_resource(entity.table(), id.to_string())
                .with_details(json!({ "field": field.name(), "confidential": confidential })),
        );
        Ok(next)
    }

    /// Flag or unflag a relationship read at `fence`. Requires Tier1.
    pub fn set_relationship_confidential(
        &self,
        principal: &Principal,
        id: RecordId,
        confidential: bool,
        fence: FenceToken,
    ) -> CoreResult<FenceToken> {
        self.write_record(
            principal,
            EntityKind::Relationship,
            id,
            RecordChanges::new().confidential_relationship(confidential),
            fence,
        )
    }

    pub fn is_confidential(&self, field: FieldRef, id: RecordId) -> CoreResult<bool> {
        self.with_connection("is_confidential", |conn| {
            Ok(confidentiality::is_confidential(conn, field, id)?)
        })
    }

    pub fn is_relationship_confidential(&self, id: RecordId) -> CoreResult<bool> {
        self.with_connection("is_relationship_confidential", |conn| {
            Ok(confidentiality::is_relationship_confidential(conn, id)?)
        })
    }

    /// Stored flags of a record. Flags carry no field values.
    pub fn confidential_flags(
        &self,
        entity: EntityKind,
        id: RecordId,
    ) -> CoreResult<BTreeMap<FieldRef, ConfidentialFlag>> {
        self.with_connection("confidential_flags", |conn| {
            Ok(confidentiality::flags_for_record(conn, entity, id)?)
        })
    }

    // =========================================================================
    // Schema
    // =========================================================================

    pub fn schema_version(&self) -> CoreResult<u32> {
        self.with_connection("schema_version", |conn| Ok(ledger::current_version(conn)?))
    }

    /// Resolve a canonical or legacy `table.field` at the current schema version.
    pub fn resolve_field(&self, table: &str, field: &str) -> CoreResult<FieldRef> {
        let version = self.schema_version()?;
        Ok(legacy::resolve_field(table, field, version)?)
    }

    pub fn integrity_check(&self) -> CoreResult<IntegrityReport> {
        let report = self.with_connection("integrity_check", |conn| Ok(ledger::integrity_check(conn)?))?;
        if !report.is_ok() {
            tracing::warn!(
                version = report.version,
                messages = ?report.sqlite_messages,
                gap = ?report.ledger_gap,
                "Integrity check found problems"
            );
        }
        Ok(report)
    }

    /// Drop the plaintext column of an encrypted field after backfill.
    ///
    /// Restricted to superusers. Returns `false` if already dropped.
    pub fn drop_legacy_column(&self, principal: &Principal, field: FieldRef) -> CoreResult<bool> {
        if !principal.is_superuser() {
            return Err(CoreError::not_permitted(field));
        }
        let dropped = self.with_connection("drop_legacy_column", |conn| {
            Ok(encrypted_columns::drop_legacy_column(conn, &self.paths, field)?)
        })?;
        if dropped {
            self.audit.record(
                AuditEvent::new(AuditEventType::LegacyColumnDropped)
                    .with_user(&principal.user_id)
                    .with_resource(field.entity().table(), field.name()),
            );
        }
        Ok(dropped)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Check that `principal` may make `changes`, against the flags as they
    /// are inside the current transaction.
    fn authorize(
        &self,
        conn: &Connection,
        principal: &Principal,
        entity: EntityKind,
        id: Option<RecordId>,
        changes: &RecordChanges,
    ) -> CoreResult<()> {
        if !principal.has_tier(Tier::Tier1) {
            if let Some((field, _)) = changes.flags.first() {
                return Err(CoreError::not_permitted(*field));
            }
            if changes.relationship_confidential.is_some() {
                return Err(CoreError::NotPermitted {
                    field: format!("{}.{RELATIONSHIP_FLAG_COLUMN}", entity.table()),
                });
            }
        }
        if let Some(id) = id {
            if !self.relationship_visible(conn, principal, entity, id)? {
                return Err(record_not_permitted(entity, id));
            }
        }
        for (field, _) in &changes.values {
            let classification = if field.is_tier2() {
                Classification::Tier2
            } else {
                match id {
                    Some(id) => confidentiality::field_class(conn, *field, id)?,
                    None => confidentiality::baseline_class(*field),
                }
                .into()
            };
            if !can_view(&principal.capabilities, classification) {
                return Err(CoreError::not_permitted(*field));
            }
        }
        Ok(())
    }

    fn audit_write(
        &self,
        event_type: AuditEventType,
        principal: &Principal,
        entity: EntityKind,
        id: RecordId,
        changes: &RecordChanges,
    ) {
        let fields: Vec<&str> = changes.values.iter().map(|(f, _)| f.name()).collect();
        self.audit.record(
            AuditEvent::new(event_type)
                .with_user(&principal.user_id)
                .with_resource(entity.table(), id.to_string())
                .with_details(json!({ "fields": fields })),
        );
        if changes.changes_confidentiality() {
            let flags: BTreeMap<&str, bool> =
                changes.flags.iter().map(|(f, v)| (f.name(), *v)).collect();
            self.audit.record(
                AuditEvent::new(AuditEventType::ConfidentialityChanged)
                    .with_user(&principal.user_id)
                    .with_resource(entity.table(), id.to_string())
                    .with_details(json!({
                        "flags": flags,
                        "relationship": changes.relationship_confidential,
                    })),
            );
        }
    }

    fn audit_conflict(&self, principal: &Principal, entity: EntityKind, id: RecordId, err: &CoreError) {
        tracing::info!(entity = %entity, record_id = %id, user_id = %principal.user_id, "Write rejected by fence");
        self.audit.record(
            AuditEvent::new(AuditEventType::WriteConflict)
                .with_user(&principal.user_id)
                .with_resource(entity.table(), id.to_string())
                .failed(err.to_string()),
        );
    }
}

fn validate_entity(entity: EntityKind, changes: &RecordChanges) -> Result<(), StoreError> {
    if let Some(field) = changes.fields().find(|f| f.entity() != entity) {
        return Err(StoreError::WrongEntity { field, entity });
    }
    if changes.relationship_confidential.is_some() && entity != EntityKind::Relationship {
        return Err(StoreError::NoRelationshipFlag { entity });
    }
    Ok(())
}

fn record_not_permitted(entity: EntityKind, id: RecordId) -> CoreError {
    CoreError::NotPermitted {
        field: format!("{} record {id}", entity.table()),
    }
}

fn audit_migration_failure(audit: &AuditLog, applied_by: &str, required: u32, err: &MigrationError) {
    tracing::error!(required, error = %err, "Schema migration failed");
    let (version, backup) = match err {
        MigrationError::Failed {
            version, backup, ..
        } => (Some(*version), Some(backup)),
        MigrationError::RestoreFailed { version, .. } => (Some(*version), None),
        _ => (None, None),
    };
    audit.record(
        AuditEvent::new(AuditEventType::MigrationFailed)
            .with_user(applied_by)
            .with_resource("schema", required.to_string())
            .with_details(json!({ "failed_version": version }))
            .failed(err.to_string()),
    );
    if let Some(backup) = backup {
        audit.record(
            AuditEvent::new(AuditEventType::BackupRestored)
                .with_user(applied_by)
                .with_resource("schema", required.to_string())
                .with_details(json!({ "backup": backup.display().to_string() })),
        );
    }
}
