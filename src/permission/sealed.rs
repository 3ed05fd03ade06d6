// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Raw stored values handed to the resolver.
//!
//! A [`SealedValue`] keeps its envelope private. The only way to read it is
//! [`SealedValue::open`], which needs a [`Grant`] covering the envelope's
//! tier, and grants are only minted by the resolver's decision table.

use crate::auth::Tier;
use crate::crypto::{DecryptionError, EncryptionError, EnvelopeContext, FieldCipher};
use crate::models::FieldValue;

use super::resolver::Grant;

/// A field value as read from storage, before any permission decision.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    /// Plain column (or legacy plaintext not yet backfilled).
    Plain(FieldValue),
    /// Encrypted envelope column.
    Sealed(SealedValue),
}

/// An envelope read from a sealed column.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedValue {
    tier: Tier,
    context: EnvelopeContext,
    envelope: Vec<u8>,
}

impl SealedValue {
    /// Wrap an envelope read from the location described by `context`.
    pub(crate) fn new(tier: Tier, context: EnvelopeContext, envelope: Vec<u8>) -> Self {
        Self {
            tier,
            context,
            envelope,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Decrypt under a grant. Returns `Ok(None)` when the grant does not
    /// cover this envelope's tier; the caller must then redact.
    pub(super) fn open(
        self,
        grant: &Grant,
        cipher: &FieldCipher,
    ) -> Result<Option<FieldValue>, DecryptionError> {
        if !grant.covers(self.tier) {
            return Ok(None);
        }
        let plaintext = cipher.decrypt(self.tier, self.context, &self.envelope)?;
        let value = serde_json::from_slice(&plaintext)
            .map_err(|e| DecryptionError::MalformedPayload(e.to_string()))?;
        Ok(Some(value))
    }
}

impl std::fmt::Debug for SealedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedValue")
            .field("tier", &self.tier)
            .field("context", &self.context)
            .field("len", &self.envelope.len())
            .finish()
    }
}

/// Serialize and seal a value for an envelope column. `Null` stays SQL NULL.
pub(crate) fn seal_value(
    cipher: &FieldCipher,
    tier: Tier,
    context: EnvelopeContext,
    value: &FieldValue,
) -> Result<Option<Vec<u8>>, EncryptionError> {
    if value.is_null() {
        return Ok(None);
    }
    let plaintext = serde_json::to_vec(value).map_err(|_| EncryptionError::Seal)?;
    cipher.encrypt(tier, context, &plaintext).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_envelope_bytes() {
        let context = EnvelopeContext::new("companies", "revenue_enc", 1);
        let sealed = SealedValue::new(Tier::Tier1, context, vec![0xde, 0xad, 0xbe, 0xef]);
        let debug = format!("{sealed:?}");
        assert!(debug.contains("len: 4"));
        assert!(!debug.contains("222"));
    }
}
