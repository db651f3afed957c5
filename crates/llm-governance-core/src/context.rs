//! Per-request context and rolling per-device counters.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Immutable snapshot of one intercepted request.
///
/// Built by the interception layer with [`RequestContext::new`] and the
/// `with_*` methods. The timestamp carries the local UTC offset of the
/// network so hour-of-day and day-of-week reflect household wall time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    client_ip: String,
    device_id: Option<String>,
    endpoint: String,
    method: String,
    path: String,
    prompt_summary: Option<String>,
    timestamp: DateTime<FixedOffset>,
    hour: u32,
    weekday: Weekday,
    requests_today: u64,
}

impl RequestContext {
    /// Create a context for a request from `client_ip` to `endpoint` at `timestamp`.
    pub fn new(
        client_ip: impl Into<String>,
        endpoint: impl Into<String>,
        timestamp: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            client_ip: client_ip.into(),
            device_id: None,
            endpoint: endpoint.into().to_ascii_lowercase(),
            method: "POST".to_string(),
            path: "/".to_string(),
            prompt_summary: None,
            timestamp,
            hour: timestamp.hour(),
            weekday: timestamp.weekday(),
            requests_today: 0,
        }
    }

    /// Attach a device identifier (typically the MAC address).
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Set the HTTP method and path.
    pub fn with_request_line(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = method.into();
        self.path = path.into();
        self
    }

    /// Attach a summary of the prompt or request body.
    pub fn with_prompt_summary(mut self, summary: impl Into<String>) -> Self {
        self.prompt_summary = Some(summary.into());
        self
    }

    /// Set the rolling requests-today count observed at admission.
    pub fn with_requests_today(mut self, count: u64) -> Self {
        self.requests_today = count;
        self
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn prompt_summary(&self) -> Option<&str> {
        self.prompt_summary.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    /// Local hour of day, 0-23.
    pub fn hour(&self) -> u32 {
        self.hour
    }

    /// Local day of week.
    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    pub fn requests_today(&self) -> u64 {
        self.requests_today
    }

    /// Key used for per-device counting: the device id when known, else the client IP.
    pub fn device_key(&self) -> &str {
        self.device_id.as_deref().unwrap_or(&self.client_ip)
    }
}

#[derive(Debug, Default)]
struct DeviceCounter {
    day: AtomicI32,
    count: AtomicU64,
}

/// Rolling "requests today" counters, one per device.
///
/// Increments are atomic; a counter resets the first time it is touched on a
/// new local day. Reads may be slightly stale relative to concurrent
/// increments.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    counters: RwLock<HashMap<String, Arc<DeviceCounter>>>,
}

impl DeviceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `device` at `at`, returning the updated count for that day.
    pub fn record(&self, device: &str, at: DateTime<FixedOffset>) -> u64 {
        let counter = self.counter(device);
        let today = at.date_naive().num_days_from_ce();

        let seen = counter.day.load(Ordering::Acquire);
        if seen != today
            && counter
                .day
                .compare_exchange(seen, today, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            counter.count.store(0, Ordering::Release);
        }

        counter.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current count for `device` on the day of `at` (zero if none recorded).
    pub fn get(&self, device: &str, at: DateTime<FixedOffset>) -> u64 {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        match counters.get(device) {
            Some(counter)
                if counter.day.load(Ordering::Acquire) == at.date_naive().num_days_from_ce() =>
            {
                counter.count.load(Ordering::Acquire)
            }
            _ => 0,
        }
    }

    fn counter(&self, device: &str) -> Arc<DeviceCounter> {
        if let Some(counter) = self
            .counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device)
        {
            return Arc::clone(counter);
        }

        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(counters.entry(device.to_string()).or_default())
    }
}
