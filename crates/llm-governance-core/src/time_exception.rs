//! Scheduled windows during which specific devices bypass enforcement.

use crate::allowlist::normalize_ip;
use crate::error::GovernanceError;
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// A day/hour window plus the devices it applies to.
///
/// Times are `HH:MM` (24-hour), both ends inclusive. A window whose start is
/// after its end wraps midnight, e.g. `22:00`-`02:00`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeException {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Lowercase day names, `monday` through `sunday`.
    pub days: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub device_ips: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TimeException {
    /// Whether this exception covers `client_ip` at instant `at` (local time).
    ///
    /// A malformed window never matches.
    pub fn is_active_for(&self, client_ip: &str, at: DateTime<FixedOffset>) -> bool {
        if !self.enabled {
            return false;
        }

        let ip = normalize_ip(client_ip);
        if !self.device_ips.iter().any(|d| normalize_ip(d) == ip) {
            return false;
        }

        let (start, end) = match (parse_hhmm(&self.start_time), parse_hhmm(&self.end_time)) {
            (Ok(start), Ok(end)) => (start, end),
            _ => return false,
        };

        if !self.days.iter().filter_map(|d| parse_weekday(d)).any(|d| d == at.weekday()) {
            return false;
        }

        // Compare at minute resolution; seconds inside the end minute still count.
        let now = NaiveTime::from_hms_opt(at.hour(), at.minute(), 0).unwrap_or(NaiveTime::MIN);
        in_window(now, start, end)
    }

    /// Problems that make this exception unusable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for value in [&self.start_time, &self.end_time] {
            if let Err(err) = parse_hhmm(value) {
                problems.push(format!("time exception '{}': {}", self.name, err));
            }
        }

        for day in &self.days {
            if parse_weekday(day).is_none() {
                problems.push(format!("time exception '{}': unknown day '{}'", self.name, day));
            }
        }

        if self.days.is_empty() {
            problems.push(format!("time exception '{}': no days configured", self.name));
        }

        problems
    }
}

/// First enabled exception active for `client_ip` at `at`.
pub fn active_exception<'a>(
    exceptions: &'a [TimeException],
    client_ip: &str,
    at: DateTime<FixedOffset>,
) -> Option<&'a TimeException> {
    exceptions.iter().find(|e| e.is_active_for(client_ip, at))
}

/// Parse a 24-hour `HH:MM` clock value.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, GovernanceError> {
    let invalid = || GovernanceError::InvalidTimeFormat(value.to_string());

    let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Parse a lowercase or capitalised English day name.
pub fn parse_weekday(day: &str) -> Option<Weekday> {
    match day.trim().to_ascii_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}
