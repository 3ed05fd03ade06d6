// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tier key material and key provisioning hooks.
//!
//! Keys are loaded once at startup from a [`KeySource`] and never change for
//! the life of the process. Rotation is a restart.

use std::path::{Path, PathBuf};

use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::auth::Tier;
use crate::config::{TIER1_KEY_ENV, TIER1_KEY_FILE_ENV, TIER2_KEY_ENV, TIER2_KEY_FILE_ENV};

/// Symmetric key length (AES-256).
pub const KEY_LEN: usize = 32;

const FINGERPRINT_LABEL: &[u8] = b"relational-crm-store/key-fingerprint/v1";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("no key material configured for {tier} ({hint})")]
    Missing { tier: Tier, hint: String },

    #[error("{tier} key must be 32 bytes, got {len}")]
    InvalidLength { tier: Tier, len: usize },

    #[error("{tier} key is not valid base64")]
    InvalidEncoding { tier: Tier },

    #[error("failed to read {tier} key from {path}: {source}")]
    Io {
        tier: Tier,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tier1 and tier2 keys are identical; the tiers must use independent keys")]
    TiersShareKey,

    #[error("key rejected by cipher: {0}")]
    Rejected(String),
}

/// Raw key material for one tier.
///
/// `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct TierKey {
    tier: Tier,
    bytes: [u8; KEY_LEN],
}

impl TierKey {
    pub fn from_bytes(tier: Tier, bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength { tier, len: bytes.len() })?;
        Ok(Self { tier, bytes })
    }

    /// Decode a standard (padded) base64 key.
    pub fn from_base64(tier: Tier, encoded: &str) -> Result<Self, KeyError> {
        let decoded =
            Base64::decode_vec(encoded.trim()).map_err(|_| KeyError::InvalidEncoding { tier })?;
        Self::from_bytes(tier, &decoded)
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Short identifier safe to log: HMAC-SHA256 of a fixed label under the key.
    pub fn fingerprint(&self) -> String {
        let mut mac = match HmacSha256::new_from_slice(&self.bytes) {
            Ok(mac) => mac,
            // HMAC accepts keys of any length.
            Err(_) => return String::from("unavailable"),
        };
        mac.update(FINGERPRINT_LABEL);
        let digest = mac.finalize().into_bytes();
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for TierKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierKey")
            .field("tier", &self.tier)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Provisioning hooks for the two tier keys.
///
/// Where keys come from (environment, secret store, file) is up to the
/// implementation.
pub trait KeySource {
    fn load_tier1_key(&self) -> Result<TierKey, KeyError>;
    fn load_tier2_key(&self) -> Result<TierKey, KeyError>;

    fn load(&self, tier: Tier) -> Result<TierKey, KeyError> {
        match tier {
            Tier::Tier1 => self.load_tier1_key(),
            Tier::Tier2 => self.load_tier2_key(),
        }
    }
}

/// Keys given directly (tests, embedding applications).
#[derive(Debug, Clone)]
pub struct StaticKeySource {
    tier1: TierKey,
    tier2: TierKey,
}

impl StaticKeySource {
    pub fn new(tier1: &[u8], tier2: &[u8]) -> Result<Self, KeyError> {
        Ok(Self {
            tier1: TierKey::from_bytes(Tier::Tier1, tier1)?,
            tier2: TierKey::from_bytes(Tier::Tier2, tier2)?,
        })
    }
}

impl KeySource for StaticKeySource {
    fn load_tier1_key(&self) -> Result<TierKey, KeyError> {
        Ok(self.tier1.clone())
    }

    fn load_tier2_key(&self) -> Result<TierKey, KeyError> {
        Ok(self.tier2.clone())
    }
}

/// Base64 keys from environment variables, or files named by them.
///
/// For each tier the inline variable (`TIER1_KEY`) wins over the file
/// variable (`TIER1_KEY_FILE`).
#[derive(Debug, Clone, Default)]
pub struct EnvKeySource;

impl EnvKeySource {
    fn load_tier(tier: Tier, inline_var: &str, file_var: &str) -> Result<TierKey, KeyError> {
        if let Ok(value) = std::env::var(inline_var) {
            return TierKey::from_base64(tier, &value);
        }
        if let Ok(path) = std::env::var(file_var) {
            return read_key_file(tier, Path::new(&path));
        }
        Err(KeyError::Missing {
            tier,
            hint: format!("set {inline_var} or {file_var}"),
        })
    }
}

impl KeySource for EnvKeySource {
    fn load_tier1_key(&self) -> Result<TierKey, KeyError> {
        Self::load_tier(Tier::Tier1, TIER1_KEY_ENV, TIER1_KEY_FILE_ENV)
    }

    fn load_tier2_key(&self) -> Result<TierKey, KeyError> {
        Self::load_tier(Tier::Tier2, TIER2_KEY_ENV, TIER2_KEY_FILE_ENV)
    }
}

/// Keys stored in two files.
#[derive(Debug, Clone)]
pub struct FileKeySource {
    pub tier1_path: PathBuf,
    pub tier2_path: PathBuf,
}

impl KeySource for FileKeySource {
    fn load_tier1_key(&self) -> Result<TierKey, KeyError> {
        read_key_file(Tier::Tier1, &self.tier1_path)
    }

    fn load_tier2_key(&self) -> Result<TierKey, KeyError> {
        read_key_file(Tier::Tier2, &self.tier2_path)
    }
}

/// Read a key file holding either raw 32 bytes or base64 text.
fn read_key_file(tier: Tier, path: &Path) -> Result<TierKey, KeyError> {
    let data = std::fs::read(path).map_err(|source| KeyError::Io {
        tier,
        path: path.to_path_buf(),
        source,
    })?;
    if data.len() == KEY_LEN {
        return TierKey::from_bytes(tier, &data);
    }
    let text = String::from_utf8(data).map_err(|_| KeyError::InvalidEncoding { tier })?;
    TierKey::from_base64(tier, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let err = TierKey::from_bytes(Tier::Tier1, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, KeyError::InvalidLength { len: 16, .. }));
    }

    #[test]
    fn from_base64_decodes_key() {
        let encoded = Base64::encode_string(&[7u8; KEY_LEN]);
        let key = TierKey::from_base64(Tier::Tier2, &encoded).unwrap();
        assert_eq!(key.expose(), &[7u8; KEY_LEN]);
        assert_eq!(key.tier(), Tier::Tier2);
    }

    #[test]
    fn from_base64_rejects_garbage() {
        let err = TierKey::from_base64(Tier::Tier1, "not base64 !!").unwrap_err();
        assert!(matches!(err, KeyError::InvalidEncoding { .. }));
    }

    #[test]
    fn fingerprint_is_stable_and_key_specific() {
        let a = TierKey::from_bytes(Tier::Tier1, &[1u8; KEY_LEN]).unwrap();
        let b = TierKey::from_bytes(Tier::Tier1, &[2u8; KEY_LEN]).unwrap();
        assert_eq!(a.fingerprint(), a.fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn debug_does_not_print_key_bytes() {
        let key = TierKey::from_bytes(Tier::Tier1, &[0xAB; KEY_LEN]).unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains("bytes"));
        assert!(!debug.contains("[171"));
        assert!(debug.contains("fingerprint"));
    }

    #[test]
    fn file_source_reads_raw_and_base64() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("tier1.key");
        let b64 = dir.path().join("tier2.key");
        std::fs::write(&raw, [3u8; KEY_LEN]).unwrap();
        std::fs::write(&b64, format!("{}\n", Base64::encode_string(&[4u8; KEY_LEN]))).unwrap();

        let source = FileKeySource {
            tier1_path: raw,
            tier2_path: b64,
        };
        assert_eq!(source.load_tier1_key().unwrap().expose(), &[3u8; KEY_LEN]);
        assert_eq!(source.load(Tier::Tier2).unwrap().expose(), &[4u8; KEY_LEN]);
    }

    #[test]
    fn file_source_reports_missing_file() {
        let source = FileKeySource {
            tier1_path: PathBuf::from("/nonexistent/tier1.key"),
            tier2_path: PathBuf::from("/nonexistent/tier2.key"),
        };
        assert!(matches!(source.load_tier1_key(), Err(KeyError::Io { .. })));
    }
}
