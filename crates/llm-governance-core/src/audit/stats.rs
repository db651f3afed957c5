//! Read-only aggregation over the audit trail.

use super::store::{event_from_row, format_timestamp, AuditStore, EVENT_COLUMNS};
use super::{AuditEvent, AuditEventType, EventFilter, TimeRange};
use crate::config::EnforcementMode;
use crate::error::GovernanceError;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};

const REQUEST_TYPES: &str = "'request_allowed', 'request_alerted', 'request_blocked', \
     'allowlist_bypass', 'time_exception_active', 'emergency_override'";

const CONFIG_TYPES: &str = "'mode_change', 'config_change', 'allowlist_change', \
     'emergency_override_activated', 'emergency_override_deactivated'";

/// Totals over a time range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_requests: u64,
    pub allowed: u64,
    pub alerted: u64,
    pub blocked: u64,
    pub allowlist_bypasses: u64,
    pub time_exception_bypasses: u64,
    pub emergency_overrides: u64,
    pub config_changes: u64,
    pub unique_clients: u64,
    /// Blocked share of all requests, 0.0 when there are none.
    pub block_rate: f64,
}

/// Per-policy enforcement counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStats {
    pub policy_name: String,
    pub total: u64,
    pub blocked: u64,
    pub alerted: u64,
    pub allowed: u64,
    pub affected_clients: u64,
}

/// Timeline bucket width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Hour,
    Day,
}

impl Granularity {
    fn bucket_expr(&self) -> &'static str {
        match self {
            Granularity::Hour => "substr(timestamp, 1, 13) || ':00:00Z'",
            Granularity::Day => "substr(timestamp, 1, 10)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// `YYYY-MM-DDTHH:00:00Z` for hourly buckets, `YYYY-MM-DD` for daily ones.
    pub bucket: String,
    pub total: u64,
    pub allowed: u64,
    pub alerted: u64,
    pub blocked: u64,
}

/// Row of the `daily_enforcement_stats` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub day: String,
    pub total_requests: u64,
    pub allowed: u64,
    pub alerted: u64,
    pub blocked: u64,
    pub allowlist_bypasses: u64,
    pub time_exception_bypasses: u64,
    pub emergency_overrides: u64,
    pub unique_clients: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub from: Option<EnforcementMode>,
    pub to: Option<EnforcementMode>,
    pub actor: Option<String>,
}

/// SQL `WHERE` clause plus its positional parameters.
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    fn push(&mut self, clause: &str, value: Value) {
        self.params.push(value);
        self.clauses
            .push(clause.replace('?', &format!("?{}", self.params.len())));
    }

    fn raw(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn range(mut self, range: &TimeRange) -> Self {
        if let Some(start) = range.start {
            self.push("timestamp >= ?", Value::Text(format_timestamp(start)));
        }
        if let Some(end) = range.end {
            self.push("timestamp < ?", Value::Text(format_timestamp(end)));
        }
        self
    }

    fn filter(self, filter: &EventFilter) -> Self {
        let mut this = self.range(&filter.range);
        if let Some(event_type) = filter.event_type {
            this.push("event_type = ?", Value::Text(event_type.as_str().to_string()));
        }
        if let Some(ip) = &filter.client_ip {
            this.push("client_ip = ?", Value::Text(ip.clone()));
        }
        if let Some(policy) = &filter.policy_name {
            this.push("policy_name = ?", Value::Text(policy.clone()));
        }
        if let Some(action) = filter.action {
            this.push("enforcement_action = ?", Value::Text(action.as_str().to_string()));
        }
        this
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}

impl AuditStore {
    /// Totals over `range`.
    pub fn summary(&self, range: &TimeRange) -> Result<AuditSummary, GovernanceError> {
        let conditions = Conditions::default().range(range);
        let sql = format!(
            "SELECT
                COALESCE(SUM(CASE WHEN event_type IN ({requests}) THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN event_type IN ({requests}) AND enforcement_action = 'allow' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN event_type IN ({requests}) AND enforcement_action = 'alert' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN event_type IN ({requests}) AND enforcement_action = 'block' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN event_type = 'allowlist_bypass' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN event_type = 'time_exception_active' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN event_type = 'emergency_override' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN event_type IN ({config}) THEN 1 ELSE 0 END), 0),
                COUNT(DISTINCT CASE WHEN event_type IN ({requests}) THEN client_ip END)
             FROM audit_events {where_clause}",
            requests = REQUEST_TYPES,
            config = CONFIG_TYPES,
            where_clause = conditions.sql(),
        );

        self.with_reader(|conn| {
            let summary = conn.query_row(&sql, params_from_iter(conditions.params.iter()), |row| {
                let total = count(row.get(0)?);
                let blocked = count(row.get(3)?);
                Ok(AuditSummary {
                    total_requests: total,
                    allowed: count(row.get(1)?),
                    alerted: count(row.get(2)?),
                    blocked,
                    allowlist_bypasses: count(row.get(4)?),
                    time_exception_bypasses: count(row.get(5)?),
                    emergency_overrides: count(row.get(6)?),
                    config_changes: count(row.get(7)?),
                    unique_clients: count(row.get(8)?),
                    block_rate: if total == 0 {
                        0.0
                    } else {
                        blocked as f64 / total as f64
                    },
                })
            })?;
            Ok(summary)
        })
    }

    /// Most recent events matching `filter`, newest first.
    pub fn recent(&self, filter: &EventFilter, limit: usize) -> Result<Vec<AuditEvent>, GovernanceError> {
        let mut conditions = Conditions::default().filter(filter);
        conditions.params.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT {} FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ?{}",
            EVENT_COLUMNS,
            conditions.sql(),
            conditions.params.len(),
        );

        self.with_reader(|conn| query_events(conn, &sql, &conditions.params))
    }

    /// Policies ranked by blocks, then alerts, then total matches.
    pub fn top_policies(&self, range: &TimeRange, limit: usize) -> Result<Vec<PolicyStats>, GovernanceError> {
        let mut conditions = Conditions::default().range(range);
        conditions.raw("policy_name IS NOT NULL".to_string());
        conditions.raw(format!("event_type IN ({})", REQUEST_TYPES));
        conditions.params.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT policy_name,
                    COUNT(*),
                    SUM(CASE WHEN enforcement_action = 'block' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN enforcement_action = 'alert' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN enforcement_action = 'allow' THEN 1 ELSE 0 END),
                    COUNT(DISTINCT client_ip)
             FROM audit_events {}
             GROUP BY policy_name
             ORDER BY 3 DESC, 4 DESC, 2 DESC, policy_name ASC
             LIMIT ?{}",
            conditions.sql(),
            conditions.params.len(),
        );

        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(conditions.params.iter()), |row| {
                    Ok(PolicyStats {
                        policy_name: row.get(0)?,
                        total: count(row.get(1)?),
                        blocked: count(row.get(2)?),
                        alerted: count(row.get(3)?),
                        allowed: count(row.get(4)?),
                        affected_clients: count(row.get(5)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Request counts bucketed by hour or day, oldest first.
    pub fn timeline(
        &self,
        filter: &EventFilter,
        granularity: Granularity,
    ) -> Result<Vec<TimelineBucket>, GovernanceError> {
        let mut conditions = Conditions::default().filter(filter);
        conditions.raw(format!("event_type IN ({})", REQUEST_TYPES));
        let sql = format!(
            "SELECT {bucket} AS bucket,
                    COUNT(*),
                    SUM(CASE WHEN enforcement_action = 'allow' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN enforcement_action = 'alert' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN enforcement_action = 'block' THEN 1 ELSE 0 END)
             FROM audit_events {where_clause}
             GROUP BY bucket
             ORDER BY bucket ASC",
            bucket = granularity.bucket_expr(),
            where_clause = conditions.sql(),
        );

        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(conditions.params.iter()), |row| {
                    Ok(TimelineBucket {
                        bucket: row.get(0)?,
                        total: count(row.get(1)?),
                        allowed: count(row.get(2)?),
                        alerted: count(row.get(3)?),
                        blocked: count(row.get(4)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Daily rows from the aggregation view, oldest first.
    pub fn daily_stats(&self, range: &TimeRange) -> Result<Vec<DailyStats>, GovernanceError> {
        let mut conditions = Conditions::default();
        if let Some(start) = range.start {
            conditions.push("day >= ?", Value::Text(start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = range.end {
            conditions.push("day <= ?", Value::Text(end.format("%Y-%m-%d").to_string()));
        }
        let sql = format!(
            "SELECT day, total_requests, allowed, alerted, blocked, allowlist_bypasses,
                    time_exception_bypasses, emergency_overrides, unique_clients
             FROM daily_enforcement_stats {} ORDER BY day ASC",
            conditions.sql(),
        );

        self.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(conditions.params.iter()), |row| {
                    Ok(DailyStats {
                        day: row.get(0)?,
                        total_requests: count(row.get(1)?),
                        allowed: count(row.get(2)?),
                        alerted: count(row.get(3)?),
                        blocked: count(row.get(4)?),
                        allowlist_bypasses: count(row.get(5)?),
                        time_exception_bypasses: count(row.get(6)?),
                        emergency_overrides: count(row.get(7)?),
                        unique_clients: count(row.get(8)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Every applied mode transition, oldest first.
    pub fn mode_history(&self) -> Result<Vec<ModeChangeRecord>, GovernanceError> {
        let filter = EventFilter {
            event_type: Some(AuditEventType::ModeChange),
            ..Default::default()
        };
        let conditions = Conditions::default().filter(&filter);
        let sql = format!(
            "SELECT {} FROM audit_events {} ORDER BY timestamp ASC, id ASC",
            EVENT_COLUMNS,
            conditions.sql(),
        );

        let events = self.with_reader(|conn| query_events(conn, &sql, &conditions.params))?;
        Ok(events
            .into_iter()
            .map(|event| ModeChangeRecord {
                timestamp: event.timestamp,
                from: serde_json::from_value(event.details["from"].clone()).ok(),
                to: serde_json::from_value(event.details["to"].clone()).ok(),
                actor: event.override_user,
            })
            .collect())
    }
}

fn query_events(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<AuditEvent>, GovernanceError> {
    let mut stmt = conn.prepare(sql)?;
    let events = stmt
        .query_map(params_from_iter(params.iter()), event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyAction;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 21, 0, 0).unwrap()
    }

    fn request(
        minutes: i64,
        event_type: AuditEventType,
        ip: &str,
        policy: Option<&str>,
        action: PolicyAction,
    ) -> AuditEvent {
        AuditEvent {
            id: None,
            timestamp: base() + Duration::minutes(minutes),
            event_type,
            client_ip: Some(ip.to_string()),
            endpoint: Some("api.openai.com".to_string()),
            device_id: None,
            enforcement_action: Some(action),
            override_user: None,
            allowlist_reason: None,
            policy_name: policy.map(str::to_string),
            details: json!({}),
        }
    }

    fn seeded() -> AuditStore {
        use AuditEventType::*;
        use PolicyAction::*;

        let store = AuditStore::open_in_memory().unwrap();
        store
            .insert_batch(&[
                request(0, RequestAllowed, "192.168.1.20", None, Allow),
                request(10, RequestAlerted, "192.168.1.20", Some("homework"), Alert),
                request(20, RequestBlocked, "192.168.1.21", Some("bedtime"), Block),
                request(70, RequestBlocked, "192.168.1.22", Some("bedtime"), Block),
                request(80, AllowlistBypass, "192.168.1.10", Some("bedtime"), Allow),
                request(90, RequestAlerted, "192.168.1.21", Some("homework"), Alert),
                AuditEvent::mode_change(
                    EnforcementMode::Observe,
                    EnforcementMode::Enforce,
                    "admin",
                    base() - Duration::minutes(5),
                ),
                AuditEvent::mode_change(
                    EnforcementMode::Enforce,
                    EnforcementMode::Observe,
                    "admin",
                    base() + Duration::minutes(100),
                ),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_summary_counts() {
        let summary = seeded().summary(&TimeRange::all()).unwrap();
        assert_eq!(summary.total_requests, 6);
        assert_eq!(summary.allowed, 2);
        assert_eq!(summary.alerted, 2);
        assert_eq!(summary.blocked, 2);
        assert_eq!(summary.allowlist_bypasses, 1);
        assert_eq!(summary.config_changes, 2);
        assert_eq!(summary.unique_clients, 4);
        assert!((summary.block_rate - 2.0 / 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_respects_range() {
        let range = TimeRange::between(base(), base() + Duration::minutes(30));
        let summary = seeded().summary(&range).unwrap();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.config_changes, 0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = AuditStore::open_in_memory().unwrap().summary(&TimeRange::all()).unwrap();
        assert_eq!(summary, AuditSummary::default());
    }

    #[test]
    fn test_recent_newest_first_with_filter() {
        let store = seeded();
        let blocked = store
            .recent(
                &EventFilter {
                    action: Some(PolicyAction::Block),
                    ..Default::default()
                },
                10,
            )
            .unwrap();
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked[0].client_ip.as_deref(), Some("192.168.1.22"));
        assert!(blocked[0].timestamp > blocked[1].timestamp);

        let limited = store.recent(&EventFilter::default(), 3).unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].event_type, AuditEventType::ModeChange);
    }

    #[test]
    fn test_top_policies_ranked_by_blocks() {
        let top = seeded().top_policies(&TimeRange::all(), 10).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].policy_name, "bedtime");
        assert_eq!(top[0].blocked, 2);
        assert_eq!(top[0].total, 3);
        assert_eq!(top[0].affected_clients, 3);
        assert_eq!(top[1].policy_name, "homework");
        assert_eq!(top[1].alerted, 2);

        assert_eq!(seeded().top_policies(&TimeRange::all(), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_timeline_buckets() {
        let store = seeded();
        let hourly = store.timeline(&EventFilter::default(), Granularity::Hour).unwrap();
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].bucket, "2024-03-04T21:00:00Z");
        assert_eq!(hourly[0].total, 3);
        assert_eq!(hourly[1].bucket, "2024-03-04T22:00:00Z");
        assert_eq!(hourly[1].blocked, 1);

        let daily = store.timeline(&EventFilter::default(), Granularity::Day).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].bucket, "2024-03-04");
        assert_eq!(daily[0].total, 6);
    }

    #[test]
    fn test_daily_stats_view() {
        let daily = seeded().daily_stats(&TimeRange::all()).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].blocked, 2);
        assert_eq!(daily[0].allowlist_bypasses, 1);
        assert_eq!(daily[0].unique_clients, 4);
    }

    #[test]
    fn test_mode_history_in_order() {
        let history = seeded().mode_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from, Some(EnforcementMode::Observe));
        assert_eq!(history[0].to, Some(EnforcementMode::Enforce));
        assert_eq!(history[1].to, Some(EnforcementMode::Observe));
        assert_eq!(history[1].actor.as_deref(), Some("admin"));
    }
}
