//! SQLite-backed, insert-only audit store.

use super::schema::migrate;
use super::{AuditEvent, AuditEventType};
use crate::error::GovernanceError;
use crate::policy::PolicyAction;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const EVENT_COLUMNS: &str = "id, timestamp, event_type, client_ip, endpoint, device_id, \
     enforcement_action, override_user, allowlist_reason, policy_name, details";

/// Audit database handle.
///
/// On disk the database runs in WAL mode with separate writer and reader
/// connections, so aggregate queries never wait on inserts. In-memory stores
/// share a single connection. Only inserts and reads are exposed.
#[derive(Debug)]
pub struct AuditStore {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl AuditStore {
    /// Open (or create) a database file and migrate it to the current schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GovernanceError> {
        let path = path.as_ref();
        let mut writer = Connection::open(path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = writer.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        writer.pragma_update(None, "synchronous", "NORMAL")?;
        migrate(&mut writer)?;

        let reader = Connection::open(path)?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        tracing::info!(path = %path.display(), journal_mode = %mode, "audit store opened");

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, GovernanceError> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
        })
    }

    /// Insert one event, returning its id.
    pub fn insert(&self, event: &AuditEvent) -> Result<i64, GovernanceError> {
        let conn = self.writer()?;
        insert_event(&conn, event)?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a batch atomically: either every event is stored or none is.
    pub fn insert_batch(&self, events: &[AuditEvent]) -> Result<(), GovernanceError> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of stored events.
    pub fn count(&self) -> Result<u64, GovernanceError> {
        self.with_reader(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
    }

    /// Run a read-only query on the reader connection.
    pub(crate) fn with_reader<T, F>(&self, f: F) -> Result<T, GovernanceError>
    where
        F: FnOnce(&Connection) -> Result<T, GovernanceError>,
    {
        match &self.reader {
            Some(reader) => {
                let conn = reader
                    .lock()
                    .map_err(|_| GovernanceError::AuditUnavailable("reader lock poisoned".to_string()))?;
                f(&*conn)
            }
            None => {
                let conn = self.writer()?;
                f(&*conn)
            }
        }
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, GovernanceError> {
        self.writer
            .lock()
            .map_err(|_| GovernanceError::AuditUnavailable("writer lock poisoned".to_string()))
    }
}

fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<(), GovernanceError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO audit_events (timestamp, event_type, client_ip, endpoint, device_id,
             enforcement_action, override_user, allowlist_reason, policy_name, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    stmt.execute(params![
        format_timestamp(event.timestamp),
        event.event_type.as_str(),
        event.client_ip,
        event.endpoint,
        event.device_id,
        event.enforcement_action.map(|a| a.as_str()),
        event.override_user,
        event.allowlist_reason,
        event.policy_name,
        serde_json::to_string(&event.details)?,
    ])?;
    Ok(())
}

/// Stored form: UTC, microsecond precision, `Z` suffix. Sorts lexically.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Rows from older writers may carry second precision, a space separator
/// or no offset at all; those are read as UTC.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return at.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return naive.and_utc();
        }
    }
    tracing::warn!(timestamp = %value, "unreadable audit timestamp, using epoch");
    DateTime::<Utc>::UNIX_EPOCH
}

/// Map a row selected with [`EVENT_COLUMNS`].
pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let timestamp: String = row.get(1)?;
    let raw_type: String = row.get(2)?;
    let action: Option<String> = row.get(6)?;
    let details: String = row.get(10)?;

    let mut details = serde_json::from_str(&details).unwrap_or(serde_json::Value::Null);
    let event_type = match AuditEventType::parse(&raw_type) {
        Some(event_type) => event_type,
        None => {
            if !details.is_object() {
                details = serde_json::json!({});
            }
            if let Some(map) = details.as_object_mut() {
                map.insert("legacy_event_type".to_string(), raw_type.into());
            }
            AuditEventType::Legacy
        }
    };

    Ok(AuditEvent {
        id: Some(row.get(0)?),
        timestamp: parse_timestamp(&timestamp),
        event_type,
        client_ip: row.get(3)?,
        endpoint: row.get(4)?,
        device_id: row.get(5)?,
        enforcement_action: action.as_deref().and_then(PolicyAction::parse),
        override_user: row.get(7)?,
        allowlist_reason: row.get(8)?,
        policy_name: row.get(9)?,
        details,
    })
}
