// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated envelope for sealed columns.
//!
//! ## Format
//!
//! ```text
//! +---------+----------+-----------+-------------------------------+
//! | version | tier tag | nonce(12) | AES-256-GCM ciphertext + tag  |
//! +---------+----------+-----------+-------------------------------+
//! ```
//!
//! The associated data is the two header bytes followed by the envelope's
//! [`EnvelopeContext`]: table, column and record id. A rewritten tier tag
//! fails authentication instead of steering decryption to the other key, and
//! so does an envelope copied into another record or column.
//!
//! This is a pure primitive: it performs no authorization. Callers that hand
//! out plaintext must have checked the principal's tier first.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use super::keys::{KeyError, KeySource, TierKey};
use crate::auth::Tier;

/// Current envelope version byte.
pub const ENVELOPE_VERSION: u8 = 0x01;

const HEADER_LEN: usize = 2;
const TAG_LEN: usize = 16;

/// Smallest well-formed envelope (empty plaintext).
pub const MIN_ENVELOPE_LEN: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    #[error("envelope truncated ({len} bytes)")]
    Truncated { len: usize },

    #[error("unsupported envelope version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("unknown tier tag {0:#04x}")]
    UnknownTier(u8),

    #[error("envelope sealed for {found}, requested {expected}")]
    TierMismatch { expected: Tier, found: Tier },

    #[error("envelope failed authentication under the {tier} key")]
    Authentication { tier: Tier },

    #[error("decrypted payload is malformed: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncryptionError {
    #[error("random nonce generation failed")]
    Nonce,

    #[error("sealing failed")]
    Seal,
}

/// Where an envelope is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvelopeContext {
    pub table: &'static str,
    pub column: &'static str,
    pub record_id: i64,
}

impl EnvelopeContext {
    pub fn new(table: &'static str, column: &'static str, record_id: i64) -> Self {
        Self {
            table,
            column,
            record_id,
        }
    }

    fn associated_data(&self, header: [u8; HEADER_LEN]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(HEADER_LEN + 16 + self.table.len() + self.column.len());
        aad.extend_from_slice(&header);
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for part in [self.table, self.column] {
            aad.extend_from_slice(&(part.len() as u32).to_be_bytes());
            aad.extend_from_slice(part.as_bytes());
        }
        aad.extend_from_slice(&self.record_id.to_be_bytes());
        aad
    }
}

fn tier_tag(tier: Tier) -> u8 {
    match tier {
        Tier::Tier1 => 0x01,
        Tier::Tier2 => 0x02,
    }
}

fn tier_from_tag(tag: u8) -> Result<Tier, DecryptionError> {
    match tag {
        0x01 => Ok(Tier::Tier1),
        0x02 => Ok(Tier::Tier2),
        other => Err(DecryptionError::UnknownTier(other)),
    }
}

/// Holds both tier keys for the lifetime of the process.
pub struct FieldCipher {
    tier1: LessSafeKey,
    tier2: LessSafeKey,
    fingerprints: [String; 2],
    rng: SystemRandom,
}

impl FieldCipher {
    /// Load both keys through the provisioning hooks.
    pub fn load(source: &dyn KeySource) -> Result<Self, KeyError> {
        let tier1 = source.load_tier1_key()?;
        let tier2 = source.load_tier2_key()?;
        Self::from_keys(&tier1, &tier2)
    }

    pub fn from_keys(tier1: &TierKey, tier2: &TierKey) -> Result<Self, KeyError> {
        if tier1.expose() == tier2.expose() {
            return Err(KeyError::TiersShareKey);
        }
        let cipher = Self {
            tier1: aead_key(tier1)?,
            tier2: aead_key(tier2)?,
            fingerprints: [tier1.fingerprint(), tier2.fingerprint()],
            rng: SystemRandom::new(),
        };
        for tier in Tier::ALL {
            tracing::info!(tier = %tier, fingerprint = %cipher.fingerprint(tier), "Loaded tier key");
        }
        Ok(cipher)
    }

    pub fn fingerprint(&self, tier: Tier) -> &str {
        match tier {
            Tier::Tier1 => &self.fingerprints[0],
            Tier::Tier2 => &self.fingerprints[1],
        }
    }

    fn key(&self, tier: Tier) -> &LessSafeKey {
        match tier {
            Tier::Tier1 => &self.tier1,
            Tier::Tier2 => &self.tier2,
        }
    }

    /// Seal `plaintext` under the given tier's key for one stored location.
    pub fn encrypt(
        &self,
        tier: Tier,
        context: EnvelopeContext,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let header = [ENVELOPE_VERSION, tier_tag(tier)];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::Nonce)?;

        let mut in_out = plaintext.to_vec();
        self.key(tier)
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(context.associated_data(header)),
                &mut in_out,
            )
            .map_err(|_| EncryptionError::Seal)?;

        let mut envelope = Vec::with_capacity(HEADER_LEN + NONCE_LEN + in_out.len());
        envelope.extend_from_slice(&header);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&in_out);
        Ok(envelope)
    }

    /// Open an envelope sealed under the given tier's key.
    ///
    /// Fails closed: any corruption, truncation, tier mismatch or foreign
    /// location is an error, never an empty plaintext.
    pub fn decrypt(
        &self,
        tier: Tier,
        context: EnvelopeContext,
        envelope: &[u8],
    ) -> Result<Vec<u8>, DecryptionError> {
        if envelope.len() < MIN_ENVELOPE_LEN {
            return Err(DecryptionError::Truncated {
                len: envelope.len(),
            });
        }
        if envelope[0] != ENVELOPE_VERSION {
            return Err(DecryptionError::UnsupportedVersion(envelope[0]));
        }
        let found = tier_from_tag(envelope[1])?;
        if found != tier {
            return Err(DecryptionError::TierMismatch {
                expected: tier,
                found,
            });
        }

        let header = [envelope[0], envelope[1]];
        let nonce = Nonce::try_assume_unique_for_key(&envelope[HEADER_LEN..HEADER_LEN + NONCE_LEN])
            .map_err(|_| DecryptionError::Truncated {
                len: envelope.len(),
            })?;
        let mut buffer = envelope[HEADER_LEN + NONCE_LEN..].to_vec();
        let plaintext_len = self
            .key(tier)
            .open_in_place(nonce, Aad::from(context.associated_data(header)), &mut buffer)
            .map_err(|_| DecryptionError::Authentication { tier })?
            .len();
        buffer.truncate(plaintext_len);
        Ok(buffer)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("tier1", &self.fingerprints[0])
            .field("tier2", &self.fingerprints[1])
            .finish()
    }
}

fn aead_key(key: &TierKey) -> Result<LessSafeKey, KeyError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key.expose())
        .map_err(|_| KeyError::Rejected(format!("{} key", key.tier())))?;
    Ok(LessSafeKey::new(unbound))
}
