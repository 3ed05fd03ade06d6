// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the crate. Configuration is loaded from the environment once
//! at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory of the shared store | `./data` |
//! | `DATABASE_FILE` | Database file name under `DATA_DIR` | `crm.sqlite3` |
//! | `LOCK_MAX_ATTEMPTS` | Attempts before a contended write fails | `5` |
//! | `LOCK_BACKOFF_BASE_MS` | First retry delay | `50` |
//! | `LOCK_BACKOFF_CEILING_MS` | Maximum retry delay | `1000` |
//! | `BUSY_TIMEOUT_MS` | SQLite lock wait per attempt | `250` |
//! | `MIGRATION_APPLIED_BY` | Recorded in the schema ledger | `system` |
//! | `TIER1_KEY` / `TIER2_KEY` | Base64 32-byte tier keys | Required (or `*_FILE`) |
//! | `TIER1_KEY_FILE` / `TIER2_KEY_FILE` | Paths to key files | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use crate::schema::runner::DEFAULT_APPLIED_BY;
use crate::storage::paths::{DATA_ROOT, DEFAULT_DATABASE_FILE};
use crate::storage::{ConnectionOptions, RetryPolicy, StoragePaths};

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the database file name.
pub const DATABASE_FILE_ENV: &str = "DATABASE_FILE";

pub const LOCK_MAX_ATTEMPTS_ENV: &str = "LOCK_MAX_ATTEMPTS";
pub const LOCK_BACKOFF_BASE_MS_ENV: &str = "LOCK_BACKOFF_BASE_MS";
pub const LOCK_BACKOFF_CEILING_MS_ENV: &str = "LOCK_BACKOFF_CEILING_MS";
pub const BUSY_TIMEOUT_MS_ENV: &str = "BUSY_TIMEOUT_MS";

/// Environment variable name for the `applied_by` value of ledger rows.
pub const MIGRATION_APPLIED_BY_ENV: &str = "MIGRATION_APPLIED_BY";

/// Base64-encoded Tier1 (confidential business data) key.
///
/// Never logged; only its fingerprint is.
pub const TIER1_KEY_ENV: &str = "TIER1_KEY";
pub const TIER1_KEY_FILE_ENV: &str = "TIER1_KEY_FILE";

/// Base64-encoded Tier2 (internal assessment) key.
pub const TIER2_KEY_ENV: &str = "TIER2_KEY";
pub const TIER2_KEY_FILE_ENV: &str = "TIER2_KEY_FILE";

/// Environment variable name for the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Settings for opening a [`DataStore`](crate::store::DataStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub paths: StoragePaths,
    pub retry: RetryPolicy,
    pub connection: ConnectionOptions,
    pub applied_by: String,
    pub log_format: LogFormat,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::with_data_dir(DATA_ROOT)
    }
}

impl CoreConfig {
    /// Defaults rooted at `data_dir` (useful for testing).
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: StoragePaths::new(data_dir.into()),
            retry: RetryPolicy::default(),
            connection: ConnectionOptions::default(),
            applied_by: DEFAULT_APPLIED_BY.to_string(),
            log_format: LogFormat::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup(DATA_DIR_ENV).unwrap_or_else(|| DATA_ROOT.to_string());
        let database_file =
            lookup(DATABASE_FILE_ENV).unwrap_or_else(|| DEFAULT_DATABASE_FILE.to_string());
        let defaults = RetryPolicy::default();

        let max_attempts = parse_number(&lookup, LOCK_MAX_ATTEMPTS_ENV, u64::from(defaults.max_attempts))?;
        let max_attempts = u32::try_from(max_attempts)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ConfigError::Invalid {
                name: LOCK_MAX_ATTEMPTS_ENV,
                value: max_attempts.to_string(),
                expected: "a positive integer",
            })?;
        let base_ms = parse_number(&lookup, LOCK_BACKOFF_BASE_MS_ENV, defaults.base_delay.as_millis() as u64)?;
        let ceiling_ms =
            parse_number(&lookup, LOCK_BACKOFF_CEILING_MS_ENV, defaults.max_delay.as_millis() as u64)?;
        let busy_ms = parse_number(
            &lookup,
            BUSY_TIMEOUT_MS_ENV,
            ConnectionOptions::default().busy_timeout.as_millis() as u64,
        )?;

        let log_format = match lookup(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    value: other.to_string(),
                    expected: "`json` or `pretty`",
                })
            }
        };

        Ok(Self {
            paths: StoragePaths::new(data_dir).with_database_file(database_file),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(ceiling_ms.max(base_ms)),
            },
            connection: ConnectionOptions {
                busy_timeout: Duration::from_millis(busy_ms),
            },
            applied_by: lookup(MIGRATION_APPLIED_BY_ENV)
                .unwrap_or_else(|| DEFAULT_APPLIED_BY.to_string()),
            log_format,
        })
    }
}

fn parse_number<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
            expected: "a non-negative integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.connection.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.applied_by, "system");
    }

    #[test]
    fn values_are_read_from_environment() {
        let config = CoreConfig::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/srv/crm"),
            (DATABASE_FILE_ENV, "shared.db"),
            (LOCK_MAX_ATTEMPTS_ENV, "3"),
            (LOCK_BACKOFF_BASE_MS_ENV, "10"),
            (LOCK_BACKOFF_CEILING_MS_ENV, "40"),
            (BUSY_TIMEOUT_MS_ENV, "100"),
            (MIGRATION_APPLIED_BY_ENV, "deploy-bot"),
            (LOG_FORMAT_ENV, "json"),
        ]))
        .unwrap();

        assert_eq!(config.paths.database(), PathBuf::from("/srv/crm/shared.db"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.retry.max_delay, Duration::from_millis(40));
        assert_eq!(config.connection.busy_timeout, Duration::from_millis(100));
        assert_eq!(config.applied_by, "deploy-bot");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_are_errors() {
        let err = CoreConfig::from_lookup(lookup(&[(LOCK_MAX_ATTEMPTS_ENV, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: LOCK_MAX_ATTEMPTS_ENV, .. }));

        let err = CoreConfig::from_lookup(lookup(&[(LOCK_MAX_ATTEMPTS_ENV, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: LOCK_MAX_ATTEMPTS_ENV, .. }));

        let err = CoreConfig::from_lookup(lookup(&[(LOG_FORMAT_ENV, "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: LOG_FORMAT_ENV, .. }));
    }
}
