// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated principal representation.

use serde::{Deserialize, Serialize};

use super::capabilities::{Capabilities, Tier};

/// An authenticated principal as seen by the data core.
///
/// Session handling belongs to the authentication collaborator; the core only
/// needs a stable identifier (for `set_by` and audit entries) and the
/// capability flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Canonical user identifier
    pub user_id: String,
    /// Capability flags resolved at login
    pub capabilities: Capabilities,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            user_id: user_id.into(),
            capabilities,
        }
    }

    /// Check whether the principal holds the given tier.
    pub fn has_tier(&self, tier: Tier) -> bool {
        self.capabilities.has_tier(tier)
    }

    pub fn is_superuser(&self) -> bool {
        self.capabilities.is_superuser
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_delegates_to_capabilities() {
        let p = Principal::new("user_1", Capabilities::tier2());
        assert!(!p.has_tier(Tier::Tier1));
        assert!(p.has_tier(Tier::Tier2));
        assert!(!p.is_superuser());
    }
}
