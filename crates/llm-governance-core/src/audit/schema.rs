//! Audit schema and its additive migrations.
//!
//! Version 1 is the pre-enforcement audit table. Version 2 adds the
//! enforcement columns, the query indexes and the daily aggregation view.
//! Migrations run inside one transaction, are recorded in `schema_version`
//! and are no-ops when re-run. Existing rows are never rewritten; new
//! columns read as `NULL` for them.

use crate::error::GovernanceError;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashSet;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    client_ip   TEXT,
    endpoint    TEXT,
    policy_name TEXT,
    details     TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL,
    description TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at, description)
VALUES (1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), 'base audit schema');
"#;

const V2_COLUMNS: &[(&str, &str)] = &[
    ("enforcement_action", "TEXT"),
    ("override_user", "TEXT"),
    ("allowlist_reason", "TEXT"),
    ("device_id", "TEXT"),
];

const V2_OBJECTS: &str = r#"
CREATE INDEX IF NOT EXISTS idx_audit_events_ts_policy_action
    ON audit_events(timestamp, policy_name, enforcement_action);

CREATE INDEX IF NOT EXISTS idx_audit_events_action_ts
    ON audit_events(enforcement_action, timestamp);

CREATE INDEX IF NOT EXISTS idx_audit_events_type_ts
    ON audit_events(event_type, timestamp);

CREATE VIEW IF NOT EXISTS daily_enforcement_stats AS
SELECT
    substr(timestamp, 1, 10)                                                AS day,
    COUNT(*)                                                                AS total_requests,
    SUM(CASE WHEN enforcement_action = 'allow' THEN 1 ELSE 0 END)           AS allowed,
    SUM(CASE WHEN enforcement_action = 'alert' THEN 1 ELSE 0 END)           AS alerted,
    SUM(CASE WHEN enforcement_action = 'block' THEN 1 ELSE 0 END)           AS blocked,
    SUM(CASE WHEN event_type = 'allowlist_bypass' THEN 1 ELSE 0 END)        AS allowlist_bypasses,
    SUM(CASE WHEN event_type = 'time_exception_active' THEN 1 ELSE 0 END)   AS time_exception_bypasses,
    SUM(CASE WHEN event_type = 'emergency_override' THEN 1 ELSE 0 END)      AS emergency_overrides,
    COUNT(DISTINCT client_ip)                                               AS unique_clients
FROM audit_events
WHERE event_type IN (
    'request_allowed', 'request_alerted', 'request_blocked',
    'allowlist_bypass', 'time_exception_active', 'emergency_override'
)
GROUP BY substr(timestamp, 1, 10);
"#;

/// Create the version 1 schema only. Used to build pre-enforcement databases.
pub fn create_base_schema(conn: &Connection) -> Result<(), GovernanceError> {
    conn.execute_batch(BASE_SCHEMA)?;
    Ok(())
}

/// Highest applied schema version, 0 for an empty database.
pub fn schema_version(conn: &Connection) -> Result<i64, GovernanceError> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    if exists.is_none() {
        return Ok(0);
    }

    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`].
///
/// Returns the versions applied by this call (empty when already current).
pub fn migrate(conn: &mut Connection) -> Result<Vec<i64>, GovernanceError> {
    let tx = conn.transaction()?;
    let mut applied = Vec::new();

    let before = schema_version(&tx)?;
    tx.execute_batch(BASE_SCHEMA)?;
    if before < 1 {
        applied.push(1);
    }

    if before < 2 {
        migrate_v2(&tx)?;
        applied.push(2);
    }

    tx.commit()?;

    if !applied.is_empty() {
        tracing::info!(versions = ?applied, "audit schema migrated");
    }
    Ok(applied)
}

fn migrate_v2(tx: &Transaction<'_>) -> Result<(), GovernanceError> {
    let existing = table_columns(tx, "audit_events")?;

    for (column, decl) in V2_COLUMNS {
        if !existing.contains(*column) {
            tx.execute(
                &format!("ALTER TABLE audit_events ADD COLUMN {} {}", column, decl),
                [],
            )?;
        }
    }

    tx.execute_batch(V2_OBJECTS)?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at, description)
         VALUES (?1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), ?2)",
        params![2, "enforcement columns, indexes and daily stats view"],
    )?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, GovernanceError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(columns)
}
