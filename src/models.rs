// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::catalog::{EntityKind, FieldRef};
use crate::permission::Visibility;

/// Primary key of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Last-known modification timestamp of a record (unix microseconds).
///
/// Captured at read time and presented back at write time; a write whose
/// token differs from the stored timestamp is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FenceToken(pub i64);

impl FenceToken {
    /// Token for a record created now.
    pub fn now() -> FenceToken {
        FenceToken(Utc::now().timestamp_micros())
    }

    /// Token for a commit happening now, strictly after `previous`.
    ///
    /// `None` when `previous` is already `i64::MAX`: nothing can follow it.
    pub fn next_after(previous: FenceToken) -> Option<FenceToken> {
        let now = Self::now();
        if previous < now {
            return Some(now);
        }
        previous.0.checked_add(1).map(FenceToken)
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_micros(self.0).single()
    }
}

impl fmt::Display for FenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_datetime() {
            Some(ts) => write!(f, "{}", ts.to_rfc3339()),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A field value as exchanged with callers.
///
/// `Null` is a legitimately empty field; it is never used to stand in for
/// a value the caller is not allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Convert a raw SQLite value from a plain column.
    ///
    /// Bytes are kept as they are. TEXT that is not valid UTF-8 becomes a
    /// `Blob` rather than a lossy string.
    pub fn from_sql_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(i) => FieldValue::Integer(i),
            ValueRef::Real(r) => FieldValue::Real(r),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => FieldValue::Text(text.to_owned()),
                Err(_) => FieldValue::Blob(t.to_vec()),
            },
            ValueRef::Blob(b) => FieldValue::Blob(b.to_vec()),
        }
    }
}

impl rusqlite::ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            FieldValue::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            FieldValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Value and confidentiality changes applied atomically by one write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordChanges {
    pub values: Vec<(FieldRef, FieldValue)>,
    pub flags: Vec<(FieldRef, bool)>,
    /// Relationship-level flag; only meaningful for relationship records.
    pub relationship_confidential: Option<bool>,
}

impl RecordChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: FieldRef, value: FieldValue) -> Self {
        self.values.push((field, value));
        self
    }

    pub fn flag(mut self, field: FieldRef, confidential: bool) -> Self {
        self.flags.push((field, confidential));
        self
    }

    pub fn confidential_relationship(mut self, confidential: bool) -> Self {
        self.relationship_confidential = Some(confidential);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.flags.is_empty() && self.relationship_confidential.is_none()
    }

    /// Whether applying these changes requires the Tier1 capability.
    pub fn changes_confidentiality(&self) -> bool {
        !self.flags.is_empty() || self.relationship_confidential.is_some()
    }

    /// Every field touched by this change set.
    pub fn fields(&self) -> impl Iterator<Item = FieldRef> + '_ {
        self.values
            .iter()
            .map(|(f, _)| *f)
            .chain(self.flags.iter().map(|(f, _)| *f))
    }
}

/// A record as returned to a specific principal.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordView {
    pub entity: EntityKind,
    pub id: RecordId,
    pub fence: FenceToken,
    pub fields: BTreeMap<FieldRef, Visibility<FieldValue>>,
}

impl RecordView {
    pub fn field(&self, field: FieldRef) -> Option<&Visibility<FieldValue>> {
        self.fields.get(&field)
    }
}
