//! Domain types for plategate.
//!
//! All types are serializable via serde; persisted collections use YAML,
//! the access-event log and the control protocol use JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Camera identity: the IP address the worker connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraIp(pub String);

impl fmt::Display for CameraIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CameraIp {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CameraIp {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of one camera's worker process.
///
/// `reconnecting` is only ever an emitted notification, never a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    #[default]
    Stopped,
    Connecting,
    Running,
    Error,
}

impl ProcessState {
    /// `connecting` and `running` block a second start for the same camera.
    pub fn is_active(self) -> bool {
        matches!(self, ProcessState::Connecting | ProcessState::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Connecting => write!(f, "connecting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Error => write!(f, "error"),
        }
    }
}

/// Category of a non-warning line on a worker's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorKind {
    ConnectionTimeout,
    NetworkUnreachable,
    CredentialsUnauthorized,
    OtherError,
}

impl WorkerErrorKind {
    /// Bad credentials will not heal on their own; everything else gets one retry.
    pub fn is_retryable(self) -> bool {
        !matches!(self, WorkerErrorKind::CredentialsUnauthorized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerErrorKind::ConnectionTimeout => "connection_timeout",
            WorkerErrorKind::NetworkUnreachable => "network_unreachable",
            WorkerErrorKind::CredentialsUnauthorized => "credentials_unauthorized",
            WorkerErrorKind::OtherError => "other_error",
        }
    }
}

impl fmt::Display for WorkerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Plate registry
// ---------------------------------------------------------------------------

/// One vehicle registered to an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub plate: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub color: String,
}

/// A registrant and their vehicles.
///
/// Aliases accept the field names used by the upstream registry feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateRecord {
    #[serde(alias = "userName")]
    pub owner_name: String,
    #[serde(default, alias = "grupo")]
    pub group: String,
    #[serde(default, alias = "unid")]
    pub unit: String,
    #[serde(default)]
    pub devices: Vec<Device>,
}

// ---------------------------------------------------------------------------
// Camera and gate configuration
// ---------------------------------------------------------------------------

/// Static settings for one camera, including the gate channel it drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(alias = "equipAdd")]
    pub ip: CameraIp,
    #[serde(default, alias = "equipName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `chan1` .. `chan4`.
    #[serde(alias = "channelOccupied")]
    pub channel_occupied: String,
}

impl CameraSettings {
    /// Channel number (1..=4) for `chanN`, `None` for anything else.
    pub fn channel_number(&self) -> Option<u8> {
        match self.channel_occupied.trim() {
            "chan1" => Some(1),
            "chan2" => Some(2),
            "chan3" => Some(3),
            "chan4" => Some(4),
            _ => None,
        }
    }
}

/// Gate parameters for one physical output channel.
///
/// Aliases accept the upstream gate export, which stores the ids as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(deserialize_with = "number_or_string")]
    pub channel: u8,
    #[serde(alias = "mg3000Address")]
    pub controller_address: String,
    #[serde(alias = "receptorAddress", deserialize_with = "number_or_string")]
    pub receptor_id: u8,
    #[serde(alias = "portAddress", deserialize_with = "number_or_string")]
    pub door_id: u8,
}

/// `3` or `"3"`.
fn number_or_string<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u8),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected a number 0-255, got {text:?}"))),
    }
}

// ---------------------------------------------------------------------------
// Access events
// ---------------------------------------------------------------------------

/// Denormalized snapshot of the matched registrant and vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    /// The registered plate that matched, not the raw detection.
    pub plate: String,
    pub name: String,
    pub group: String,
    pub unit: String,
    pub make: String,
    pub model: String,
    pub color: String,
}

impl CustomerInfo {
    pub fn from_match(record: &PlateRecord, device: &Device) -> Self {
        Self {
            plate: device.plate.clone(),
            name: record.owner_name.clone(),
            group: record.group.clone(),
            unit: record.unit.clone(),
            make: device.make.clone(),
            model: device.model.clone(),
            color: device.color.clone(),
        }
    }
}

/// One confirmed, non-suppressed match. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    /// `None` when the camera's channel could not be resolved.
    pub channel_number: Option<u8>,
    pub camera_ip: CameraIp,
    /// Plate string as read by the worker.
    pub detected_plate: String,
    pub customer_info: CustomerInfo,
    pub timestamp: DateTime<Utc>,
}

/// Filter for access-event range queries. Text fields are case-insensitive substrings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &AccessEvent) -> bool {
        let info = &event.customer_info;
        contains_ci(&info.name, self.name.as_deref())
            && contains_ci(&info.group, self.group.as_deref())
            && contains_ci(&info.unit, self.unit.as_deref())
            && contains_ci(&info.plate, self.plate.as_deref())
            && self.from.map_or(true, |from| event.timestamp >= from)
            && self.to.map_or(true, |to| event.timestamp <= to)
    }
}

fn contains_ci(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// Latest performance report of one worker. No history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub avg_fps: f64,
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub gpu_usage: f64,
    pub gpu_memory_usage: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
