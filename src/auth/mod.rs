// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Principal Module
//!
//! Authentication itself is owned by the application layer. By the time a
//! call reaches the data core the caller has been authenticated and reduced
//! to a [`Principal`]: a user id plus three boolean capabilities.
//!
//! ## Capabilities
//!
//! - `is_elevated_tier1` → may view Tier1 (confidential business) fields
//! - `is_elevated_tier2` → may view Tier2 (internal assessment) fields
//! - `is_superuser` → implies both

pub mod capabilities;
pub mod principal;

pub use capabilities::{Capabilities, Tier};
pub use principal::Principal;
