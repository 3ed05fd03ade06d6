// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational CRM Store - confidential data core
//!
//! This crate provides the shared, file-backed store behind the multi-user
//! business data manager: versioned schema migrations, multi-process write
//! safety, field- and relationship-level confidentiality, and two-tier
//! encryption of sensitive fields at rest.
//!
//! ## Modules
//!
//! - `auth` - Principals and their tier capabilities
//! - `catalog` - Entities, fields and their physical storage
//! - `confidentiality` - Field and relationship confidentiality flags
//! - `crypto` - Tier keys and AES-256-GCM field envelopes
//! - `permission` - Visibility decisions and redaction
//! - `schema` - Ledger, migration units, backups and the migration engine
//! - `storage` - Connection, retry, fenced record access and audit trail
//! - `store` - The [`DataStore`](store::DataStore) façade

pub mod auth;
pub mod catalog;
pub mod confidentiality;
pub mod config;
pub mod crypto;
pub mod error;
pub mod legacy;
pub mod models;
pub mod permission;
pub mod schema;
pub mod storage;
pub mod store;

pub use error::{CoreError, CoreResult};
pub use store::DataStore;
