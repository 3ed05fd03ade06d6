// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Permission resolution for confidential fields.
//!
//! Every read of a field passes through [`PermissionResolver`]. Insufficient
//! permission is an expected outcome and is returned as
//! [`Visibility::Redacted`], not as an error.

pub mod resolver;
pub mod sealed;
pub mod visibility;

pub use resolver::{can_view, Classification, FieldClass, Grant, PermissionResolver, RelationshipRef};
pub use sealed::{SealedValue, StoredValue};
pub use visibility::Visibility;
