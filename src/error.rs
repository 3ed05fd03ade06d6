// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::catalog::FieldRef;
use crate::config::ConfigError;
use crate::crypto::{DecryptionError, KeyError};
use crate::legacy::AliasError;
use crate::schema::MigrationError;
use crate::storage::{ConflictError, Contention, LockError, StoreError};

/// Errors surfaced by [`DataStore`](crate::store::DataStore).
///
/// Insufficient permission on reads is not an error: it is returned as
/// [`Visibility::Redacted`](crate::permission::Visibility::Redacted).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Alias(#[from] AliasError),

    #[error("not permitted to change {field}")]
    NotPermitted { field: String },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_permitted(field: FieldRef) -> Self {
        CoreError::NotPermitted {
            field: field.to_string(),
        }
    }

    /// The write lost an optimistic concurrency race; re-read and retry.
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            CoreError::Store(StoreError::Conflict(conflict)) => Some(conflict),
            _ => None,
        }
    }

    /// Lock contention outlasted the retry budget; the user may try again.
    pub fn as_lock(&self) -> Option<&LockError> {
        match self {
            CoreError::Store(StoreError::Lock(lock)) | CoreError::Migration(MigrationError::Lock(lock)) => {
                Some(lock)
            }
            _ => None,
        }
    }

    /// Stored ciphertext failed to decrypt (key mismatch or corruption).
    pub fn as_decryption(&self) -> Option<&DecryptionError> {
        match self {
            CoreError::Store(StoreError::Decryption(err)) => Some(err),
            _ => None,
        }
    }
}

impl Contention for CoreError {
    fn is_contention(&self) -> bool {
        match self {
            CoreError::Store(err) => err.is_contention(),
            CoreError::Migration(err) => err.is_contention(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(StoreError::Sqlite(err))
    }
}

impl From<ConflictError> for CoreError {
    fn from(err: ConflictError) -> Self {
        CoreError::Store(StoreError::Conflict(err))
    }
}

impl From<LockError> for CoreError {
    fn from(err: LockError) -> Self {
        CoreError::Store(StoreError::Lock(err))
    }
}

impl From<DecryptionError> for CoreError {
    fn from(err: DecryptionError) -> Self {
        CoreError::Store(StoreError::Decryption(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CompanyField, EntityKind};
    use crate::models::{FenceToken, RecordId};

    #[test]
    fn conflicts_are_distinguishable() {
        let err: CoreError = ConflictError {
            entity: EntityKind::Company,
            id: RecordId(7),
            expected: FenceToken(1),
            actual: FenceToken(2),
        }
        .into();
        assert!(err.as_conflict().is_some());
        assert!(err.as_lock().is_none());
        assert!(err.to_string().contains("companies record 7"));
    }

    #[test]
    fn decryption_errors_are_distinct_from_not_found() {
        let err: CoreError = DecryptionError::Truncated { len: 2 }.into();
        assert!(err.as_decryption().is_some());

        let missing: CoreError = StoreError::NotFound {
            entity: EntityKind::Company,
            id: RecordId(1),
        }
        .into();
        assert!(missing.as_decryption().is_none());
    }

    #[test]
    fn not_permitted_names_the_field() {
        let err = CoreError::not_permitted(FieldRef::Company(CompanyField::Revenue));
        assert_eq!(err.to_string(), "not permitted to change companies.revenue");
    }
}
