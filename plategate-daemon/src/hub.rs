//! Observer fan-out.
//!
//! Every lifecycle transition, detection and performance sample is published
//! to a `tokio::sync::broadcast` channel. Delivery is at-most-once: observers
//! that subscribe late miss earlier events, observers that fall behind lose
//! the overflow, and publishing with nobody listening is not an error.

use plategate_core::{AccessEvent, CameraIp, PerformanceSample, WorkerErrorKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Per-subscriber backlog before the oldest events are dropped.
pub const EVENT_CAPACITY: usize = 256;

/// One named notification as observers receive it.
///
/// Serialized as `{"event": "<name>", "ip": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Starting {
        ip: CameraIp,
    },
    Started {
        ip: CameraIp,
    },
    Reconnecting {
        ip: CameraIp,
    },
    Stopped {
        ip: CameraIp,
    },
    Error {
        ip: CameraIp,
        error_type: WorkerErrorKind,
    },
    Detection {
        ip: CameraIp,
        access_event: AccessEvent,
    },
    PlateNotFound {
        ip: CameraIp,
        plate: String,
    },
    Performance {
        ip: CameraIp,
        avg_fps: f64,
        cpu_usage: f64,
        ram_usage: f64,
        gpu_usage: f64,
        gpu_memory_usage: f64,
    },
}

impl SupervisorEvent {
    pub fn performance(ip: CameraIp, sample: PerformanceSample) -> Self {
        SupervisorEvent::Performance {
            ip,
            avg_fps: sample.avg_fps,
            cpu_usage: sample.cpu_usage,
            ram_usage: sample.ram_usage,
            gpu_usage: sample.gpu_usage,
            gpu_memory_usage: sample.gpu_memory_usage,
        }
    }

    pub fn ip(&self) -> &CameraIp {
        match self {
            SupervisorEvent::Starting { ip }
            | SupervisorEvent::Started { ip }
            | SupervisorEvent::Reconnecting { ip }
            | SupervisorEvent::Stopped { ip }
            | SupervisorEvent::Error { ip, .. }
            | SupervisorEvent::Detection { ip, .. }
            | SupervisorEvent::PlateNotFound { ip, .. }
            | SupervisorEvent::Performance { ip, .. } => ip,
        }
    }

    /// Wire name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::Starting { .. } => "starting",
            SupervisorEvent::Started { .. } => "started",
            SupervisorEvent::Reconnecting { .. } => "reconnecting",
            SupervisorEvent::Stopped { .. } => "stopped",
            SupervisorEvent::Error { .. } => "error",
            SupervisorEvent::Detection { .. } => "detection",
            SupervisorEvent::PlateNotFound { .. } => "plate_not_found",
            SupervisorEvent::Performance { .. } => "performance",
        }
    }
}

/// Cloneable publish handle shared by the supervisor and its helper tasks.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many observers were handed the event.
    pub fn publish(&self, event: SupervisorEvent) -> usize {
        tracing::debug!(event = event.name(), ip = %event.ip(), "publishing event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
