// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Visibility decisions for fields and relationships.
//!
//! ## Decision Table
//!
//! | Principal | Public | Tier1 | Tier2 |
//! |-----------|--------|-------|-------|
//! | superuser | visible | visible | visible |
//! | tier1 only | visible | visible | redacted |
//! | tier2 only | visible | redacted | visible |
//! | neither | visible | redacted | redacted |
//!
//! The raw value provider is only invoked after the table granted access,
//! and sealed values can only be opened with the [`Grant`] the table
//! produced. A denied read never loads, let alone decrypts, the value.

use serde::{Deserialize, Serialize};

use crate::auth::{Capabilities, Principal, Tier};
use crate::catalog::FieldRef;
use crate::crypto::{DecryptionError, FieldCipher};
use crate::models::{FieldValue, RecordId};

use super::sealed::StoredValue;
use super::visibility::Visibility;

/// Classification accepted by [`PermissionResolver::view_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldClass {
    Public,
    Tier1,
}

/// Full classification used by the decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Public,
    Tier1,
    Tier2,
}

impl From<FieldClass> for Classification {
    fn from(class: FieldClass) -> Self {
        match class {
            FieldClass::Public => Classification::Public,
            FieldClass::Tier1 => Classification::Tier1,
        }
    }
}

/// Evaluate the decision table.
pub fn can_view(capabilities: &Capabilities, classification: Classification) -> bool {
    match classification {
        Classification::Public => true,
        Classification::Tier1 => capabilities.has_tier(Tier::Tier1),
        Classification::Tier2 => capabilities.has_tier(Tier::Tier2),
    }
}

/// Proof that the decision table granted access for a classification.
///
/// Has no public constructor.
#[derive(Debug)]
pub struct Grant {
    tier1: bool,
    tier2: bool,
}

impl Grant {
    fn evaluate(capabilities: &Capabilities, classification: Classification) -> Option<Grant> {
        if !can_view(capabilities, classification) {
            return None;
        }
        Some(match classification {
            Classification::Public => Grant {
                tier1: false,
                tier2: false,
            },
            Classification::Tier1 => Grant {
                tier1: true,
                tier2: false,
            },
            Classification::Tier2 => Grant {
                tier1: false,
                tier2: true,
            },
        })
    }

    /// Whether this grant was issued for the given tier.
    pub fn covers(&self, tier: Tier) -> bool {
        match tier {
            Tier::Tier1 => self.tier1,
            Tier::Tier2 => self.tier2,
        }
    }
}

/// The relationship-level flag as carried on the relationship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRef {
    pub id: RecordId,
    pub is_confidential: bool,
}

/// Gatekeeper between callers and stored values.
#[derive(Debug, Clone, Copy)]
pub struct PermissionResolver<'a> {
    cipher: &'a FieldCipher,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(cipher: &'a FieldCipher) -> Self {
        Self { cipher }
    }

    /// View a public or Tier1-classified field.
    pub fn view_field<E, F>(
        &self,
        principal: &Principal,
        field: FieldRef,
        record_id: RecordId,
        class: FieldClass,
        raw_value_provider: F,
    ) -> Result<Visibility<FieldValue>, E>
    where
        F: FnOnce() -> Result<StoredValue, E>,
        E: From<DecryptionError>,
    {
        let visibility = self.resolve(principal, class.into(), raw_value_provider)?;
        if visibility.is_redacted() {
            tracing::debug!(
                user_id = %principal.user_id,
                field = %field,
                record_id = %record_id,
                "Field redacted"
            );
        }
        Ok(visibility)
    }

    /// View a Tier2 (internal assessment) field.
    pub fn view_tier2_field<E, F>(
        &self,
        principal: &Principal,
        raw_value_provider: F,
    ) -> Result<Visibility<FieldValue>, E>
    where
        F: FnOnce() -> Result<StoredValue, E>,
        E: From<DecryptionError>,
    {
        self.resolve(principal, Classification::Tier2, raw_value_provider)
    }

    /// View a value carried by a relationship; confidential relationships need Tier1.
    pub fn view_relationship<T>(
        &self,
        principal: &Principal,
        relationship: &RelationshipRef,
        raw_value: T,
    ) -> Visibility<T> {
        let classification = if relationship.is_confidential {
            Classification::Tier1
        } else {
            Classification::Public
        };
        if can_view(&principal.capabilities, classification) {
            Visibility::Visible(raw_value)
        } else {
            tracing::debug!(
                user_id = %principal.user_id,
                relationship_id = %relationship.id,
                "Relationship redacted"
            );
            Visibility::Redacted
        }
    }

    fn resolve<E, F>(
        &self,
        principal: &Principal,
        classification: Classification,
        raw_value_provider: F,
    ) -> Result<Visibility<FieldValue>, E>
    where
        F: FnOnce() -> Result<StoredValue, E>,
        E: From<DecryptionError>,
    {
        let Some(grant) = Grant::evaluate(&principal.capabilities, classification) else {
            return Ok(Visibility::Redacted);
        };
        match raw_value_provider()? {
            StoredValue::Plain(value) => Ok(Visibility::Visible(value)),
            StoredValue::Sealed(sealed) => {
                let tier = sealed.tier();
                match sealed.open(&grant, self.cipher)? {
                    Some(value) => Ok(Visibility::Visible(value)),
                    None => {
                        tracing::warn!(
                            tier = %tier,
                            ?classification,
                            "Sealed value classified below its key tier; redacting"
                        );
                        Ok(Visibility::Redacted)
                    }
                }
            }
        }
    }
}
