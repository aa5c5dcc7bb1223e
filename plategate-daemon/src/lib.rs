//! Plategate daemon: camera worker supervision and gate control.
//!
//! - [`parser`] — incremental scanning of worker stdout/stderr
//! - [`gate`] — the 8-byte door-open TCP exchange
//! - [`hub`] — broadcast of lifecycle, detection and performance events
//! - [`worker`] — worker launch parameters and the process launcher
//! - [`supervisor`] — the per-camera state machine actor
//! - [`protocol`] — Unix-socket request/response types and blocking client
//! - runtime — socket server, signal handling and daemon startup

mod error;
pub mod gate;
pub mod hub;
pub mod parser;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod supervisor;
pub mod worker;

pub use error::{ControlError, DaemonError, GateError};
pub use hub::{EventHub, SupervisorEvent};
pub use protocol::{
    request_camera_start, request_camera_status, request_camera_stop, request_performance,
    request_status, request_stop, send_request, subscribe, DaemonRequest, DaemonResponse,
    EventStream,
};
pub use runtime::{run, run_with, start_blocking};
pub use supervisor::{CameraStatus, SupervisorHandle, SupervisorSettings};
pub use worker::{
    ProcessLauncher, WorkerHandle, WorkerLauncher, WorkerMessage, WorkerSink, WorkerSpec,
};
