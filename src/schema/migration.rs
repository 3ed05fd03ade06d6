// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Migration units and their validation.
//!
//! A unit is an ordered list of statements that must end by recording its
//! own version in the ledger, exactly once. Units are immutable once
//! published: editing an applied unit does not re-run it anywhere.

use serde::Serialize;

use super::ledger::LEDGER_TABLE;

/// SQL fragments that discard data. Matched case-insensitively on
/// whitespace-normalized statements; a match is a warning, not an error.
const DESTRUCTIVE_PATTERNS: [&str; 4] = ["DROP TABLE", "DROP COLUMN", "DROP INDEX", "DELETE FROM"];

/// One schema-change operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Statement {
    /// Arbitrary SQL, executed as a batch.
    Execute(String),
    /// Append the version record to the ledger.
    RecordVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationUnit {
    pub version: u32,
    pub description: String,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("version 0 is reserved for an empty ledger")]
    ReservedVersion,

    #[error("unit has no statements")]
    Empty,

    #[error("statement {index} is empty")]
    EmptyStatement { index: usize },

    #[error("statement {index} modifies the schema ledger directly")]
    TouchesLedger { index: usize },

    #[error("unit does not record its version")]
    MissingRecordVersion,

    #[error("unit records a version {count} times")]
    MultipleRecordVersions { count: usize },

    #[error("version record must be the last statement")]
    RecordVersionNotLast,

    #[error("unit {unit} records version {recorded}")]
    VersionMismatch { unit: u32, recorded: u32 },
}

impl MigrationUnit {
    pub fn new(version: u32, description: impl Into<String>) -> Self {
        Self {
            version,
            description: description.into(),
            statements: Vec::new(),
        }
    }

    pub fn execute(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(Statement::Execute(sql.into()));
        self
    }

    /// Append the closing version record for this unit.
    pub fn record_version(mut self) -> Self {
        self.statements.push(Statement::RecordVersion(self.version));
        self
    }

    /// Check the unit's shape. Returns warnings for destructive statements.
    pub fn validate(&self) -> Result<Vec<String>, ValidationError> {
        if self.version == 0 {
            return Err(ValidationError::ReservedVersion);
        }
        if self.statements.is_empty() {
            return Err(ValidationError::Empty);
        }

        let mut warnings = Vec::new();
        let mut recorded = Vec::new();
        for (index, statement) in self.statements.iter().enumerate() {
            match statement {
                Statement::Execute(sql) => {
                    let normalized = normalize(sql);
                    if normalized.is_empty() {
                        return Err(ValidationError::EmptyStatement { index });
                    }
                    if normalized.contains(&LEDGER_TABLE.to_ascii_uppercase()) {
                        return Err(ValidationError::TouchesLedger { index });
                    }
                    for pattern in destructive_patterns(&normalized) {
                        warnings.push(format!("statement {index} contains {pattern}"));
                    }
                }
                Statement::RecordVersion(version) => recorded.push((index, *version)),
            }
        }

        match recorded.as_slice() {
            [] => Err(ValidationError::MissingRecordVersion),
            [(index, version)] => {
                if *index != self.statements.len() - 1 {
                    Err(ValidationError::RecordVersionNotLast)
                } else if *version != self.version {
                    Err(ValidationError::VersionMismatch {
                        unit: self.version,
                        recorded: *version,
                    })
                } else {
                    Ok(warnings)
                }
            }
            many => Err(ValidationError::MultipleRecordVersions { count: many.len() }),
        }
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

fn destructive_patterns(normalized: &str) -> impl Iterator<Item = &'static str> + '_ {
    DESTRUCTIVE_PATTERNS
        .into_iter()
        .filter(move |pattern| normalized.contains(pattern))
}
