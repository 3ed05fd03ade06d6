// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Maintenance entry point: open the shared store, apply pending migrations
//! and backfills, and report schema integrity.

use std::process::ExitCode;

use relational_crm_store::config::{CoreConfig, LogFormat};
use relational_crm_store::crypto::EnvKeySource;
use relational_crm_store::DataStore;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn main() -> ExitCode {
    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    let store = match DataStore::open(&config, &EnvKeySource) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "Failed to open data store");
            return ExitCode::FAILURE;
        }
    };

    match store.integrity_check() {
        Ok(report) if report.is_ok() => {
            tracing::info!(version = report.version, "Schema integrity check passed");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            tracing::error!(
                version = report.version,
                messages = ?report.sqlite_messages,
                gap = ?report.ledger_gap,
                "Schema integrity check failed"
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!(error = %err, "Integrity check could not run");
            ExitCode::FAILURE
        }
    }
}
