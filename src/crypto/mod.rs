// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Encryption at Rest
//!
//! Two independent symmetric keys, one per confidentiality tier, loaded at
//! process start from an external [`KeySource`]. Keys are never embedded in
//! source or schema.
//!
//! [`FieldCipher`] is a pure cryptographic primitive: it does not know who
//! is asking. The permission resolver is the only component that turns a
//! sealed column into plaintext, and only after its decision table granted
//! visibility.

pub mod envelope;
pub mod keys;

pub use envelope::{DecryptionError, EncryptionError, EnvelopeContext, FieldCipher, ENVELOPE_VERSION};
pub use keys::{EnvKeySource, FileKeySource, KeyError, KeySource, StaticKeySource, TierKey, KEY_LEN};
