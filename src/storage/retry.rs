// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded retry on write contention.
//!
//! Another process holding the store's write lock is an expected, transient
//! condition. It is retried with capped exponential backoff a fixed number of
//! times and then surfaced as [`LockError`]. A lock held forever by a dead or
//! partitioned writer therefore reaches the caller instead of spinning.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use rusqlite::ErrorCode;

/// Default number of attempts (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Write contention outlasted the retry budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store is locked by another writer: {operation} gave up after {attempts} attempts ({last_error})")]
pub struct LockError {
    pub operation: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Errors that can signal transient lock contention.
pub trait Contention {
    fn is_contention(&self) -> bool;
}

impl Contention for rusqlite::Error {
    fn is_contention(&self) -> bool {
        matches!(
            self.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
        )
    }
}

/// Backoff schedule for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the base and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op`, retrying while it fails with lock contention.
///
/// Non-contention errors (conflicts, corruption, validation) are returned
/// immediately; they are never retried here.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Contention + From<LockError> + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_contention() => {
                if attempt >= max_attempts {
                    tracing::warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "Lock contention exhausted retries"
                    );
                    return Err(LockError {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    }
                    .into());
                }
                let delay = policy.backoff(attempt);
                tracing::debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Store locked, backing off"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreError;
    use rusqlite::ffi;

    fn busy() -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(10), Duration::from_millis(1000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result: Result<u32, StoreError> = with_retry(&fast_policy(), "test", || {
            calls += 1;
            if calls < 3 {
                Err(busy())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), StoreError> = with_retry(&fast_policy(), "write", || {
            calls += 1;
            Err(busy())
        });
        assert_eq!(calls, 5);
        match result {
            Err(StoreError::Lock(err)) => {
                assert_eq!(err.attempts, 5);
                assert_eq!(err.operation, "write");
            }
            other => panic!("expected LockError, got {other:?}"),
        }
    }

    #[test]
    fn non_contention_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), StoreError> = with_retry(&fast_policy(), "read", || {
            calls += 1;
            Err(StoreError::JournalMode("delete".into()))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(StoreError::JournalMode(_))));
    }

    #[test]
    fn locked_code_counts_as_contention() {
        let locked = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_LOCKED), None);
        assert!(locked.is_contention());
        let constraint =
            rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_CONSTRAINT), None);
        assert!(!constraint.is_contention());
    }
}
