// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for confidentiality-relevant operations.
//!
//! Schema changes, record writes, confidentiality changes and decryption
//! failures are appended to a daily JSONL file. Auditing is best-effort:
//! a failure to write the trail is logged and never fails the operation
//! being audited.

use std::fs::{self, OpenOptions};
use std::io::Write;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::connection::{StoreError, StoreResult};
use super::paths::StoragePaths;

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Schema events
    SchemaMigrated,
    MigrationFailed,
    BackupRestored,

    // Record events
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    WriteConflict,

    // Confidentiality events
    ConfidentialityChanged,
    DecryptionFailed,

    // Encrypted column transition
    BackfillCompleted,
    LegacyColumnDropped,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Principal that triggered the event (if any).
    pub user_id: Option<String>,
    /// Resource affected (record id, schema version, column).
    pub resource_id: Option<String>,
    /// Resource type (table name, `schema`, ...).
    pub resource_type: Option<String>,
    /// Additional details as JSON. Never carries field values.
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if the operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only audit trail under the data root.
#[derive(Debug, Clone)]
pub struct AuditLog {
    paths: StoragePaths,
}

impl AuditLog {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    /// Append an event to its day's log file.
    ///
    /// Each event is a single `write` on a file opened in append mode, so
    /// lines from concurrent processes do not interleave.
    pub fn log(&self, event: &AuditEvent) -> StoreResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        fs::create_dir_all(self.paths.audit_date_dir(&date))?;

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.audit_events_file(&date))?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Best-effort [`log`](Self::log): failures become a warning.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            tracing::warn!(
                event_type = ?event.event_type,
                error = %e,
                "Failed to write audit event"
            );
        }
    }

    /// Read audit events for a specific date.
    pub fn read_events(&self, date: &str) -> StoreResult<Vec<AuditEvent>> {
        let content = fs::read_to_string(self.paths.audit_events_file(date))?;

        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }

    /// Read events for an inclusive date range. Days without a log are skipped.
    pub fn read_events_range(&self, start_date: &str, end_date: &str) -> StoreResult<Vec<AuditEvent>> {
        let start = parse_date(start_date)?;
        let end = parse_date(end_date)?;

        let mut all_events = Vec::new();
        let mut current = start;
        while current <= end {
            let date_str = current.format("%Y-%m-%d").to_string();
            if let Ok(events) = self.read_events(&date_str) {
                all_events.extend(events);
            }
            current = match current.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(all_events)
    }

    /// Search events by user ID.
    pub fn search_by_user(&self, user_id: &str, date: &str) -> StoreResult<Vec<AuditEvent>> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }

    /// Search events by resource.
    pub fn search_by_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        date: &str,
    ) -> StoreResult<Vec<AuditEvent>> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| {
                e.resource_type.as_deref() == Some(resource_type)
                    && e.resource_id.as_deref() == Some(resource_id)
            })
            .collect())
    }
}

fn parse_date(date: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid date {date}: {e}"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AuditLog) {
        let temp = TempDir::new().unwrap();
        let log = AuditLog::new(StoragePaths::new(temp.path()));
        (temp, log)
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::MigrationFailed)
            .with_resource("schema", "5")
            .failed("no such table: missing");

        assert!(!event.success);
        assert_eq!(event.error, Some("no such table: missing".to_string()));
        assert_eq!(event.resource_id, Some("5".to_string()));
    }

    #[test]
    fn log_and_read_events() {
        let (_temp, log) = setup();

        log.log(
            &AuditEvent::new(AuditEventType::RecordCreated)
                .with_user("user_1")
                .with_resource("companies", "1"),
        )
        .unwrap();
        log.log(
            &AuditEvent::new(AuditEventType::ConfidentialityChanged)
                .with_user("user_2")
                .with_resource("companies", "1")
                .with_details(serde_json::json!({ "field": "revenue", "confidential": true })),
        )
        .unwrap();

        let events = log.read_events(&today()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::RecordCreated);
        assert_eq!(events[1].event_type, AuditEventType::ConfidentialityChanged);
    }

    #[test]
    fn search_by_user_and_resource() {
        let (_temp, log) = setup();
        log.record(
            AuditEvent::new(AuditEventType::RecordUpdated)
                .with_user("user_target")
                .with_resource("people", "7"),
        );
        log.record(
            AuditEvent::new(AuditEventType::WriteConflict)
                .with_user("user_other")
                .with_resource("people", "7"),
        );
        log.record(
            AuditEvent::new(AuditEventType::RecordUpdated)
                .with_user("user_other")
                .with_resource("projects", "7"),
        );

        let by_user = log.search_by_user("user_target", &today()).unwrap();
        assert_eq!(by_user.len(), 1);

        let by_resource = log.search_by_resource("people", "7", &today()).unwrap();
        assert_eq!(by_resource.len(), 2);
    }

    #[test]
    fn range_skips_missing_days() {
        let (_temp, log) = setup();
        log.record(AuditEvent::new(AuditEventType::SchemaMigrated).with_resource("schema", "3"));

        let events = log.read_events_range("2000-01-01", &today()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(log.read_events_range("not-a-date", &today()).is_err());
    }

    #[test]
    fn unwritable_trail_does_not_panic() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("audit");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let log = AuditLog::new(StoragePaths::new(temp.path()));

        log.record(AuditEvent::new(AuditEventType::RecordDeleted));
        assert!(log.read_events(&today()).is_err());
    }
}
