// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Migrations shipped with this crate.
//!
//! Published units must never be edited; add a new version instead.

use super::migration::MigrationUnit;

/// Schema version this build of the crate requires.
pub const REQUIRED_SCHEMA_VERSION: u32 = 3;

const V1_CORE_TABLES: &str = "
CREATE TABLE companies (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT,
    sector      TEXT,
    revenue     NUMERIC,
    notes       TEXT,
    modified_at INTEGER NOT NULL
);
CREATE TABLE people (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name   TEXT,
    email       TEXT,
    phone       TEXT,
    salary      NUMERIC,
    modified_at INTEGER NOT NULL
);
CREATE TABLE projects (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT,
    status      TEXT,
    budget      NUMERIC,
    modified_at INTEGER NOT NULL
);
CREATE TABLE relationships (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id          INTEGER,
    to_id            INTEGER,
    kind             TEXT,
    assessment_notes TEXT,
    is_confidential  INTEGER NOT NULL DEFAULT 0,
    modified_at      INTEGER NOT NULL
);
CREATE TABLE contact_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id  INTEGER,
    summary     TEXT,
    outcome     TEXT,
    modified_at INTEGER NOT NULL
);
";

const V1_FLAG_TABLE: &str = "
CREATE TABLE confidential_flags (
    table_name      TEXT NOT NULL,
    record_id       INTEGER NOT NULL,
    field_name      TEXT NOT NULL,
    is_confidential INTEGER NOT NULL DEFAULT 0,
    set_by          TEXT NOT NULL,
    set_at          TEXT NOT NULL,
    PRIMARY KEY (table_name, record_id, field_name)
);
";

const V2_ENVELOPE_COLUMNS: &str = "
ALTER TABLE companies ADD COLUMN revenue_enc BLOB;
ALTER TABLE people ADD COLUMN salary_enc BLOB;
ALTER TABLE projects ADD COLUMN budget_enc BLOB;
ALTER TABLE relationships ADD COLUMN assessment_notes_enc BLOB;
";

const V2_COLUMN_STATE: &str = "
CREATE TABLE encrypted_column_state (
    table_name        TEXT NOT NULL,
    column_name       TEXT NOT NULL,
    backfilled_at     TEXT,
    legacy_dropped_at TEXT,
    PRIMARY KEY (table_name, column_name)
);
";

/// All built-in units, in version order.
pub fn migrations() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::new(1, "core entity tables and confidentiality flags")
            .execute(V1_CORE_TABLES)
            .execute(V1_FLAG_TABLE)
            .record_version(),
        MigrationUnit::new(2, "encrypted envelope columns")
            .execute(V2_ENVELOPE_COLUMNS)
            .execute(V2_COLUMN_STATE)
            .record_version(),
        MigrationUnit::new(3, "confidentiality flag lookup index")
            .execute(
                "CREATE INDEX idx_confidential_flags_record ON confidential_flags (table_name, record_id)",
            )
            .record_version(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityKind, FieldStorage, FENCE_COLUMN};
    use crate::storage::test_support;
    use tempfile::TempDir;

    #[test]
    fn builtin_units_are_valid_and_contiguous() {
        let units = migrations();
        assert_eq!(units.len() as u32, REQUIRED_SCHEMA_VERSION);
        for (index, unit) in units.iter().enumerate() {
            assert_eq!(unit.version, index as u32 + 1);
            assert_eq!(unit.validate(), Ok(vec![]), "unit {}", unit.version);
        }
    }

    #[test]
    fn schema_has_every_catalog_column() {
        let temp = TempDir::new().unwrap();
        let (_paths, conn) = test_support::migrated(temp.path());

        for entity in EntityKind::ALL {
            let mut stmt = conn
                .prepare(&format!("SELECT name FROM pragma_table_info('{}')", entity.table()))
                .unwrap();
            let columns: Vec<String> = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            assert!(columns.iter().any(|c| c == FENCE_COLUMN), "{entity}");

            for field in entity.fields() {
                let expected: Vec<&str> = match field.storage() {
                    FieldStorage::Plain { column } => vec![column],
                    FieldStorage::Sealed(sealed) => vec![sealed.envelope_column, sealed.legacy_column],
                };
                for column in expected {
                    assert!(
                        columns.iter().any(|c| c == column),
                        "{field} expects column {column}"
                    );
                }
            }
        }
    }
}
