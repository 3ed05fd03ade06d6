// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only schema version ledger.
//!
//! One row per applied migration unit. Triggers abort any UPDATE or DELETE
//! on the table, so history can only grow. An absent or empty ledger means
//! version 0.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::storage::connection::{timestamp_from_row, timestamp_to_sql};

pub const LEDGER_TABLE: &str = "schema_version";

const BOOTSTRAP_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL,
    applied_by  TEXT NOT NULL,
    description TEXT NOT NULL
);
CREATE TRIGGER IF NOT EXISTS schema_version_no_update
BEFORE UPDATE ON schema_version
BEGIN
    SELECT RAISE(ABORT, 'schema_version is append-only');
END;
CREATE TRIGGER IF NOT EXISTS schema_version_no_delete
BEFORE DELETE ON schema_version
BEGIN
    SELECT RAISE(ABORT, 'schema_version is append-only');
END;
";

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub version: u32,
    pub applied_at: DateTime<Utc>,
    pub applied_by: String,
    pub description: String,
}

/// A hole in the ledger's version sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerGap {
    pub after: u32,
    pub next: u32,
}

/// Create the ledger table and its guard triggers if missing.
pub fn bootstrap(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(BOOTSTRAP_SQL)
}

fn ledger_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![LEDGER_TABLE],
        |row| row.get(0),
    )
}

/// Highest applied version, or 0 for a database without a ledger.
pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    if !ledger_exists(conn)? {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Every ledger row in ascending version order.
pub fn versions(conn: &Connection) -> rusqlite::Result<Vec<VersionRecord>> {
    if !ledger_exists(conn)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT version, applied_at, applied_by, description FROM schema_version ORDER BY version",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(VersionRecord {
            version: row.get(0)?,
            applied_at: timestamp_from_row(row, 1)?.unwrap_or_default(),
            applied_by: row.get(2)?,
            description: row.get(3)?,
        })
    })?;
    rows.collect()
}

pub(crate) fn append(
    conn: &Connection,
    version: u32,
    applied_by: &str,
    description: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version, applied_at, applied_by, description)
         VALUES (?1, ?2, ?3, ?4)",
        params![version, timestamp_to_sql(Utc::now()), applied_by, description],
    )?;
    Ok(())
}

/// First gap in an ascending version list. The baseline may be above 1.
pub fn find_gap(versions: &[u32]) -> Option<LedgerGap> {
    versions.windows(2).find_map(|pair| {
        (pair[1] != pair[0] + 1).then_some(LedgerGap {
            after: pair[0],
            next: pair[1],
        })
    })
}

/// Structural health of the database file and its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub version: u32,
    /// Output of `PRAGMA integrity_check`; `["ok"]` when healthy.
    pub sqlite_messages: Vec<String>,
    pub ledger_gap: Option<LedgerGap>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.sqlite_messages == ["ok"] && self.ledger_gap.is_none()
    }
}

pub fn integrity_check(conn: &Connection) -> rusqlite::Result<IntegrityReport> {
    let sqlite_messages = {
        let mut stmt = conn.prepare("PRAGMA integrity_check")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    let applied: Vec<u32> = versions(conn)?.into_iter().map(|r| r.version).collect();
    Ok(IntegrityReport {
        version: applied.last().copied().unwrap_or(0),
        sqlite_messages,
        ledger_gap: find_gap(&applied),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn missing_or_empty_ledger_is_version_zero() {
        let conn = memory();
        assert_eq!(current_version(&conn).unwrap(), 0);
        bootstrap(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
        assert!(versions(&conn).unwrap().is_empty());
    }

    #[test]
    fn ledger_is_append_only() {
        let conn = memory();
        bootstrap(&conn).unwrap();
        append(&conn, 1, "system", "baseline").unwrap();
        append(&conn, 2, "system", "second").unwrap();
        assert_eq!(current_version(&conn).unwrap(), 2);

        assert!(conn
            .execute("UPDATE schema_version SET version = 7 WHERE version = 2", [])
            .is_err());
        assert!(conn.execute("DELETE FROM schema_version", []).is_err());
        assert!(append(&conn, 2, "system", "again").is_err());

        let records = versions(&conn).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].description, "second");
        assert_eq!(records[0].applied_by, "system");
    }

    #[test]
    fn gaps_are_detected() {
        assert_eq!(find_gap(&[]), None);
        assert_eq!(find_gap(&[3, 4, 5]), None);
        assert_eq!(find_gap(&[1, 2, 4]), Some(LedgerGap { after: 2, next: 4 }));
    }

    #[test]
    fn integrity_check_reports_ledger_state() {
        let conn = memory();
        bootstrap(&conn).unwrap();
        append(&conn, 1, "system", "one").unwrap();
        append(&conn, 3, "system", "three").unwrap();

        let report = integrity_check(&conn).unwrap();
        assert_eq!(report.version, 3);
        assert_eq!(report.sqlite_messages, vec!["ok".to_string()]);
        assert_eq!(report.ledger_gap, Some(LedgerGap { after: 1, next: 3 }));
        assert!(!report.is_ok());
    }
}
