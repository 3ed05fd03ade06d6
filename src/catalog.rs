// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Closed catalog of persisted entities and their fields.
//!
//! Every confidentiality decision is keyed by a [`FieldRef`], a tagged
//! `(entity, field)` variant. Table and column names only exist as
//! `&'static str` constants attached to these variants, so a misspelled
//! field name cannot compile into a permission lookup. String identifiers
//! from outside callers go through [`FieldRef::from_names`] (or the
//! legacy adapter) exactly once, at the boundary.
//!
//! ## Sealed Fields
//!
//! | Field | Key | Envelope column | Legacy plaintext column |
//! |-------|-----|-----------------|-------------------------|
//! | `companies.revenue` | Tier1 | `revenue_enc` | `revenue` |
//! | `people.salary` | Tier1 | `salary_enc` | `salary` |
//! | `projects.budget` | Tier1 | `budget_enc` | `budget` |
//! | `relationships.assessment_notes` | Tier2 | `assessment_notes_enc` | `assessment_notes` |

use serde::{Deserialize, Serialize};

use crate::auth::Tier;

/// Name of the fence column carried by every entity table.
pub const FENCE_COLUMN: &str = "modified_at";

/// Name of the relationship-level confidentiality column.
pub const RELATIONSHIP_FLAG_COLUMN: &str = "is_confidential";

/// Persisted entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Person,
    Project,
    Relationship,
    ContactLog,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Company,
        EntityKind::Person,
        EntityKind::Project,
        EntityKind::Relationship,
        EntityKind::ContactLog,
    ];

    /// Physical table name.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Company => "companies",
            EntityKind::Person => "people",
            EntityKind::Project => "projects",
            EntityKind::Relationship => "relationships",
            EntityKind::ContactLog => "contact_logs",
        }
    }

    /// Look up an entity by its physical table name.
    pub fn from_table(table: &str) -> Option<EntityKind> {
        Self::ALL.into_iter().find(|kind| kind.table() == table)
    }

    /// All fields of this entity, in column order.
    pub fn fields(&self) -> &'static [FieldRef] {
        match self {
            EntityKind::Company => &COMPANY_FIELDS,
            EntityKind::Person => &PERSON_FIELDS,
            EntityKind::Project => &PROJECT_FIELDS,
            EntityKind::Relationship => &RELATIONSHIP_FIELDS,
            EntityKind::ContactLog => &CONTACT_LOG_FIELDS,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyField {
    Name,
    Sector,
    Revenue,
    Notes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonField {
    FullName,
    Email,
    Phone,
    Salary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectField {
    Title,
    Status,
    Budget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipField {
    FromId,
    ToId,
    Kind,
    AssessmentNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactLogField {
    CompanyId,
    Summary,
    Outcome,
}

/// A field of a persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "entity", content = "field", rename_all = "snake_case")]
pub enum FieldRef {
    Company(CompanyField),
    Person(PersonField),
    Project(ProjectField),
    Relationship(RelationshipField),
    ContactLog(ContactLogField),
}

static COMPANY_FIELDS: [FieldRef; 4] = [
    FieldRef::Company(CompanyField::Name),
    FieldRef::Company(CompanyField::Sector),
    FieldRef::Company(CompanyField::Revenue),
    FieldRef::Company(CompanyField::Notes),
];

static PERSON_FIELDS: [FieldRef; 4] = [
    FieldRef::Person(PersonField::FullName),
    FieldRef::Person(PersonField::Email),
    FieldRef::Person(PersonField::Phone),
    FieldRef::Person(PersonField::Salary),
];

static PROJECT_FIELDS: [FieldRef; 3] = [
    FieldRef::Project(ProjectField::Title),
    FieldRef::Project(ProjectField::Status),
    FieldRef::Project(ProjectField::Budget),
];

static RELATIONSHIP_FIELDS: [FieldRef; 4] = [
    FieldRef::Relationship(RelationshipField::FromId),
    FieldRef::Relationship(RelationshipField::ToId),
    FieldRef::Relationship(RelationshipField::Kind),
    FieldRef::Relationship(RelationshipField::AssessmentNotes),
];

static CONTACT_LOG_FIELDS: [FieldRef; 3] = [
    FieldRef::ContactLog(ContactLogField::CompanyId),
    FieldRef::ContactLog(ContactLogField::Summary),
    FieldRef::ContactLog(ContactLogField::Outcome),
];

/// A field stored as an encrypted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SealedColumn {
    /// Key family used for the envelope.
    pub tier: Tier,
    /// Column holding the envelope blob.
    pub envelope_column: &'static str,
    /// Column holding pre-encryption plaintext, authoritative until backfill.
    pub legacy_column: &'static str,
}

/// Physical storage of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldStorage {
    Plain { column: &'static str },
    Sealed(SealedColumn),
}

const fn sealed(tier: Tier, envelope_column: &'static str, legacy_column: &'static str) -> FieldStorage {
    FieldStorage::Sealed(SealedColumn {
        tier,
        envelope_column,
        legacy_column,
    })
}

impl FieldRef {
    /// Entity this field belongs to.
    pub fn entity(&self) -> EntityKind {
        match self {
            FieldRef::Company(_) => EntityKind::Company,
            FieldRef::Person(_) => EntityKind::Person,
            FieldRef::Project(_) => EntityKind::Project,
            FieldRef::Relationship(_) => EntityKind::Relationship,
            FieldRef::ContactLog(_) => EntityKind::ContactLog,
        }
    }

    /// Logical field name, as recorded in the flag table.
    pub fn name(&self) -> &'static str {
        match self {
            FieldRef::Company(f) => match f {
                CompanyField::Name => "name",
                CompanyField::Sector => "sector",
                CompanyField::Revenue => "revenue",
                CompanyField::Notes => "notes",
            },
            FieldRef::Person(f) => match f {
                PersonField::FullName => "full_name",
                PersonField::Email => "email",
                PersonField::Phone => "phone",
                PersonField::Salary => "salary",
            },
            FieldRef::Project(f) => match f {
                ProjectField::Title => "title",
                ProjectField::Status => "status",
                ProjectField::Budget => "budget",
            },
            FieldRef::Relationship(f) => match f {
                RelationshipField::FromId => "from_id",
                RelationshipField::ToId => "to_id",
                RelationshipField::Kind => "kind",
                RelationshipField::AssessmentNotes => "assessment_notes",
            },
            FieldRef::ContactLog(f) => match f {
                ContactLogField::CompanyId => "company_id",
                ContactLogField::Summary => "summary",
                ContactLogField::Outcome => "outcome",
            },
        }
    }

    /// Physical storage of this field.
    pub fn storage(&self) -> FieldStorage {
        match self {
            FieldRef::Company(CompanyField::Revenue) => sealed(Tier::Tier1, "revenue_enc", "revenue"),
            FieldRef::Person(PersonField::Salary) => sealed(Tier::Tier1, "salary_enc", "salary"),
            FieldRef::Project(ProjectField::Budget) => sealed(Tier::Tier1, "budget_enc", "budget"),
            FieldRef::Relationship(RelationshipField::AssessmentNotes) => {
                sealed(Tier::Tier2, "assessment_notes_enc", "assessment_notes")
            }
            other => FieldStorage::Plain {
                column: other.name(),
            },
        }
    }

    /// Sealed column descriptor, if this field is encrypted at rest.
    pub fn sealed_column(&self) -> Option<SealedColumn> {
        match self.storage() {
            FieldStorage::Sealed(column) => Some(column),
            FieldStorage::Plain { .. } => None,
        }
    }

    /// Tier2 fields are Tier2 by definition, independent of any flag.
    pub fn is_tier2(&self) -> bool {
        matches!(self.sealed_column(), Some(SealedColumn { tier: Tier::Tier2, .. }))
    }

    /// Resolve canonical table and field names.
    pub fn from_names(table: &str, field: &str) -> Option<FieldRef> {
        let entity = EntityKind::from_table(table)?;
        entity.fields().iter().copied().find(|f| f.name() == field)
    }

    /// Every field of every entity.
    pub fn all() -> impl Iterator<Item = FieldRef> {
        EntityKind::ALL
            .into_iter()
            .flat_map(|entity| entity.fields().iter().copied())
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity().table(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_field_belongs_to_its_entity() {
        for entity in EntityKind::ALL {
            for field in entity.fields() {
                assert_eq!(field.entity(), entity);
            }
        }
    }

    #[test]
    fn field_names_are_unique_per_entity() {
        for entity in EntityKind::ALL {
            let names: HashSet<_> = entity.fields().iter().map(|f| f.name()).collect();
            assert_eq!(names.len(), entity.fields().len(), "duplicate in {entity}");
        }
    }

    #[test]
    fn from_names_round_trips_canonical_names() {
        for field in FieldRef::all() {
            let resolved = FieldRef::from_names(field.entity().table(), field.name());
            assert_eq!(resolved, Some(field));
        }
        assert_eq!(FieldRef::from_names("companies", "revenu"), None);
        assert_eq!(FieldRef::from_names("organisations", "name"), None);
    }

    #[test]
    fn sealed_fields_use_expected_tiers() {
        let sealed: Vec<_> = FieldRef::all().filter_map(|f| f.sealed_column().map(|c| (f, c))).collect();
        assert_eq!(sealed.len(), 4);
        assert!(FieldRef::Relationship(RelationshipField::AssessmentNotes).is_tier2());
        assert!(!FieldRef::Company(CompanyField::Revenue).is_tier2());
        assert_eq!(
            FieldRef::Company(CompanyField::Revenue).sealed_column().map(|c| c.tier),
            Some(Tier::Tier1)
        );
    }

    #[test]
    fn display_uses_table_and_field() {
        assert_eq!(
            FieldRef::Person(PersonField::Salary).to_string(),
            "people.salary"
        );
    }
}
