// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use serde::{Deserialize, Serialize};

/// Result of a permission-checked read.
///
/// `Redacted` means "this field exists but you may not see it". It is
/// deliberately distinct from an empty value (`Visible(FieldValue::Null)`)
/// and from an absent field, since the presentation layer treats the
/// three differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Visibility<T> {
    Visible(T),
    Redacted,
}

impl<T> Visibility<T> {
    pub fn is_redacted(&self) -> bool {
        matches!(self, Visibility::Redacted)
    }

    pub fn is_visible(&self) -> bool {
        !self.is_redacted()
    }

    pub fn visible(&self) -> Option<&T> {
        match self {
            Visibility::Visible(value) => Some(value),
            Visibility::Redacted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_is_not_an_empty_value() {
        let empty: Visibility<Option<String>> = Visibility::Visible(None);
        let redacted: Visibility<Option<String>> = Visibility::Redacted;
        assert_ne!(empty, redacted);
        assert!(empty.is_visible());
        assert!(redacted.is_redacted());
        assert_eq!(redacted.visible(), None);
        assert_eq!(empty.visible(), Some(&None));
    }

    #[test]
    fn serializes_with_status_tag() {
        let redacted: Visibility<i64> = Visibility::Redacted;
        assert_eq!(serde_json::to_string(&redacted).unwrap(), r#"{"status":"redacted"}"#);
        let visible = Visibility::Visible(5);
        assert_eq!(
            serde_json::to_string(&visible).unwrap(),
            r#"{"status":"visible","value":5}"#
        );
    }
}
