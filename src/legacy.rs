// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Translation of legacy table/field identifiers.
//!
//! Older callers still address fields by the names used before tables were
//! unified (`organisations.turnover`, `links.ned_notes`, ...). They are
//! mapped onto catalog fields here, once, at the boundary. Each alias is
//! retired at a schema version; from then on it is rejected and callers
//! must use the canonical name.

use crate::catalog::{
    CompanyField, ContactLogField, FieldRef, PersonField, ProjectField, RelationshipField,
};

/// One legacy `table.field` synonym.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyAlias {
    pub table: &'static str,
    pub field: &'static str,
    pub target: FieldRef,
    /// First schema version at which the alias is no longer accepted.
    pub retire_at_version: u32,
}

const fn alias(table: &'static str, field: &'static str, target: FieldRef, retire_at_version: u32) -> LegacyAlias {
    LegacyAlias {
        table,
        field,
        target,
        retire_at_version,
    }
}

pub static LEGACY_ALIASES: [LegacyAlias; 17] = [
    alias("organisations", "name", FieldRef::Company(CompanyField::Name), 4),
    alias("organisations", "industry", FieldRef::Company(CompanyField::Sector), 4),
    alias("organisations", "turnover", FieldRef::Company(CompanyField::Revenue), 4),
    alias("organisations", "notes", FieldRef::Company(CompanyField::Notes), 4),
    alias("contacts", "name", FieldRef::Person(PersonField::FullName), 4),
    alias("contacts", "email", FieldRef::Person(PersonField::Email), 4),
    alias("contacts", "phone", FieldRef::Person(PersonField::Phone), 4),
    alias("contacts", "salary", FieldRef::Person(PersonField::Salary), 4),
    alias("projects", "name", FieldRef::Project(ProjectField::Title), 4),
    alias("projects", "cost", FieldRef::Project(ProjectField::Budget), 4),
    alias("links", "source_id", FieldRef::Relationship(RelationshipField::FromId), 4),
    alias("links", "target_id", FieldRef::Relationship(RelationshipField::ToId), 4),
    alias("links", "type", FieldRef::Relationship(RelationshipField::Kind), 4),
    alias("links", "ned_notes", FieldRef::Relationship(RelationshipField::AssessmentNotes), 4),
    alias("interactions", "organisation_id", FieldRef::ContactLog(ContactLogField::CompanyId), 3),
    alias("interactions", "notes", FieldRef::ContactLog(ContactLogField::Summary), 3),
    alias("interactions", "result", FieldRef::ContactLog(ContactLogField::Outcome), 3),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AliasError {
    #[error("unknown field {table}.{field}")]
    Unknown { table: String, field: String },

    #[error("legacy field {table}.{field} was retired at schema version {retired_at}; use {replacement}")]
    Retired {
        table: String,
        field: String,
        retired_at: u32,
        replacement: FieldRef,
    },
}

/// Resolve a canonical or legacy identifier at the given schema version.
pub fn resolve_field(table: &str, field: &str, schema_version: u32) -> Result<FieldRef, AliasError> {
    if let Some(canonical) = FieldRef::from_names(table, field) {
        return Ok(canonical);
    }

    let Some(alias) = LEGACY_ALIASES
        .iter()
        .find(|alias| alias.table == table && alias.field == field)
    else {
        return Err(AliasError::Unknown {
            table: table.to_string(),
            field: field.to_string(),
        });
    };

    if schema_version >= alias.retire_at_version {
        return Err(AliasError::Retired {
            table: table.to_string(),
            field: field.to_string(),
            retired_at: alias.retire_at_version,
            replacement: alias.target,
        });
    }

    tracing::debug!(
        alias = %format!("{table}.{field}"),
        target = %alias.target,
        "Resolved legacy field alias"
    );
    Ok(alias.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn canonical_names_always_resolve() {
        for field in FieldRef::all() {
            assert_eq!(
                resolve_field(field.entity().table(), field.name(), u32::MAX),
                Ok(field)
            );
        }
    }

    #[test]
    fn legacy_names_resolve_until_retired() {
        let turnover = resolve_field("organisations", "turnover", 3);
        assert_eq!(turnover, Ok(FieldRef::Company(CompanyField::Revenue)));

        let retired = resolve_field("organisations", "turnover", 4).unwrap_err();
        assert_eq!(
            retired,
            AliasError::Retired {
                table: "organisations".into(),
                field: "turnover".into(),
                retired_at: 4,
                replacement: FieldRef::Company(CompanyField::Revenue),
            }
        );

        assert!(matches!(
            resolve_field("interactions", "notes", 3),
            Err(AliasError::Retired { .. })
        ));
    }

    #[test]
    fn canonical_name_wins_over_alias() {
        // `projects.name` is a legacy alias; `projects.title` is canonical.
        assert_eq!(
            resolve_field("projects", "title", 10),
            Ok(FieldRef::Project(ProjectField::Title))
        );
        assert_eq!(
            resolve_field("projects", "name", 2),
            Ok(FieldRef::Project(ProjectField::Title))
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            resolve_field("organisations", "turnovr", 1),
            Err(AliasError::Unknown { .. })
        ));
        assert!(matches!(
            resolve_field("companies", "revenu", 1),
            Err(AliasError::Unknown { .. })
        ));
    }

    #[test]
    fn aliases_are_unique_and_never_shadow_canonical_names() {
        let mut seen = HashSet::new();
        for alias in &LEGACY_ALIASES {
            assert!(seen.insert((alias.table, alias.field)), "duplicate {}.{}", alias.table, alias.field);
            assert_eq!(FieldRef::from_names(alias.table, alias.field), None);
        }
    }
}
