//! Device allowlist: devices exempted from blocking.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

fn default_true() -> bool {
    true
}

/// A device that bypasses enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistDevice {
    pub ip: String,
    pub name: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Permanent entries are active even when disabled or past expiry.
    #[serde(default)]
    pub permanent: bool,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AllowlistDevice {
    pub fn new(ip: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ip: normalize_ip(&ip.into()),
            name: name.into(),
            mac: None,
            enabled: true,
            permanent: false,
            group: None,
            expires_at: None,
            added_at: Utc::now(),
            notes: None,
        }
    }

    pub fn with_mac(mut self, mac: &str) -> Self {
        self.mac = normalize_mac(mac);
        self
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether this entry applies at instant `at`.
    pub fn is_active_at(&self, at: DateTime<FixedOffset>) -> bool {
        if self.permanent {
            return true;
        }
        if !self.enabled {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => at.with_timezone(&Utc) < expires_at,
            None => true,
        }
    }
}

/// Named set of device addresses managed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub device_ips: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// How a request was matched to the allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum AllowlistMatch {
    Ip { device: String },
    Mac { device: String },
    Group { group: String },
}

impl AllowlistMatch {
    /// Human-readable reason recorded in the audit trail.
    pub fn reason(&self) -> String {
        match self {
            AllowlistMatch::Ip { device } => format!("device '{}' allowlisted by IP", device),
            AllowlistMatch::Mac { device } => format!("device '{}' allowlisted by MAC", device),
            AllowlistMatch::Group { group } => format!("member of allowlist group '{}'", group),
        }
    }
}

/// Allowlisted devices and groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Allowlist {
    pub devices: Vec<AllowlistDevice>,
    pub groups: Vec<AllowlistGroup>,
}

impl Allowlist {
    /// Find the entry covering a client at instant `at`.
    ///
    /// Lookup order: device by IP, device by MAC (when `mac` is given),
    /// then enabled group membership by IP.
    pub fn find(&self, client_ip: &str, mac: Option<&str>, at: DateTime<FixedOffset>) -> Option<AllowlistMatch> {
        let ip = normalize_ip(client_ip);

        if let Some(device) = self
            .devices
            .iter()
            .find(|d| normalize_ip(&d.ip) == ip && d.is_active_at(at))
        {
            return Some(AllowlistMatch::Ip {
                device: device.name.clone(),
            });
        }

        if let Some(mac) = mac.and_then(normalize_mac) {
            if let Some(device) = self.devices.iter().find(|d| {
                d.mac.as_deref().and_then(normalize_mac).as_deref() == Some(mac.as_str())
                    && d.is_active_at(at)
            }) {
                return Some(AllowlistMatch::Mac {
                    device: device.name.clone(),
                });
            }
        }

        self.groups
            .iter()
            .filter(|g| g.enabled)
            .find(|g| g.device_ips.iter().any(|member| normalize_ip(member) == ip))
            .map(|g| AllowlistMatch::Group {
                group: g.name.clone(),
            })
    }

    /// Enabled groups that contain `client_ip`.
    pub fn groups_for(&self, client_ip: &str) -> Vec<&str> {
        let ip = normalize_ip(client_ip);
        self.groups
            .iter()
            .filter(|g| g.enabled && g.device_ips.iter().any(|member| normalize_ip(member) == ip))
            .map(|g| g.name.as_str())
            .collect()
    }
}

/// Canonical text form of an IP address; unparsable input is returned trimmed.
pub fn normalize_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(addr) => addr.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Canonical `aa:bb:cc:dd:ee:ff` form of a MAC address.
///
/// Accepts `:`, `-` and `.` separators in any case. Returns `None` unless the
/// input holds exactly twelve hex digits.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let digits: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let pairs: Vec<&str> = (0..12).step_by(2).map(|i| &digits[i..i + 2]).collect();
    Some(pairs.join(":"))
}
