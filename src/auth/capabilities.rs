// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Capability flags for confidentiality tiers.

use serde::{Deserialize, Serialize};

/// Protection tier.
///
/// ## Tiers
///
/// - `Tier1` - Confidential business data (financial figures, flagged fields)
/// - `Tier2` - Internal assessment notes on relationships
///
/// The two tiers are independent axes: holding one says nothing about the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Confidential access
    Tier1,
    /// Internal assessment access
    Tier2,
}

impl Tier {
    /// Both tiers, in tag order.
    pub const ALL: [Tier; 2] = [Tier::Tier1, Tier::Tier2];
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Tier1 => write!(f, "tier1"),
            Tier::Tier2 => write!(f, "tier2"),
        }
    }
}

/// Boolean capability set handed over by the authentication layer.
///
/// Not persisted here; passed in on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub is_elevated_tier1: bool,
    pub is_elevated_tier2: bool,
    pub is_superuser: bool,
}

impl Capabilities {
    /// No elevated access.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn superuser() -> Self {
        Self {
            is_superuser: true,
            ..Self::default()
        }
    }

    pub fn tier1() -> Self {
        Self {
            is_elevated_tier1: true,
            ..Self::default()
        }
    }

    pub fn tier2() -> Self {
        Self {
            is_elevated_tier2: true,
            ..Self::default()
        }
    }

    /// Check whether this capability set covers the given tier.
    ///
    /// Superuser implies both tiers.
    pub fn has_tier(&self, tier: Tier) -> bool {
        if self.is_superuser {
            return true;
        }
        match tier {
            Tier::Tier1 => self.is_elevated_tier1,
            Tier::Tier2 => self.is_elevated_tier2,
        }
    }
}
