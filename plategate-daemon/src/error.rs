use std::net::SocketAddr;
use std::path::PathBuf;

use plategate_core::{CameraIp, WorkerErrorKind};
use thiserror::Error;

/// Error surface for daemon runtime and protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] plategate_core::StoreError),

    #[error("config error: {0}")]
    Config(#[from] plategate_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with `ok: false`.
    #[error("{message} ({code})")]
    Rejected { code: String, message: String },

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

/// Outcome taxonomy of the control boundary (start / stop / status).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("camera {0} is already connecting or running")]
    Conflict(CameraIp),

    #[error("no recognition process tracked for camera {0}")]
    NotFound(CameraIp),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("worker for camera {ip} reported {kind}")]
    WorkerFailed { ip: CameraIp, kind: WorkerErrorKind },

    #[error("worker for camera {0} exited before confirming startup")]
    WorkerExited(CameraIp),

    #[error("camera {0} was stopped before the worker confirmed startup")]
    StoppedBeforeStartup(CameraIp),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Stable code carried on the wire next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Conflict(_) => "conflict",
            ControlError::NotFound(_) => "not_found",
            ControlError::ConfigurationMissing(_) => "configuration_missing",
            ControlError::Invalid(_) => "invalid_request",
            ControlError::WorkerFailed { .. }
            | ControlError::WorkerExited(_)
            | ControlError::StoppedBeforeStartup(_) => "worker_failed",
            ControlError::Internal(_) => "internal",
        }
    }
}

/// Failure of one door-open session. Logged by the caller, never retried.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid gate address {address}: {source}")]
    Address {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("write to {addr} failed: {source}")]
    Write {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("read from {addr} failed: {source}")]
    Read {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no response from {addr} before timeout")]
    ResponseTimeout { addr: SocketAddr },

    #[error("{addr} closed the connection before responding")]
    ClosedBeforeResponse { addr: SocketAddr },
}
