//! Plategate core library — domain types, plate matching, persistence, configuration.
//!
//! - [`types`] — newtypes and domain structs shared by the daemon and the CLI
//! - [`matcher`] — one-misread-tolerant plate comparison
//! - [`store`] — the document store behind the four persisted collections
//! - [`config`] — `daemon.yaml` loading and path helpers
//! - [`error`] — [`StoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod matcher;
pub mod store;
pub mod types;

pub use config::DaemonConfig;
pub use error::{ConfigError, StoreError};
pub use store::{DocumentStore, FileStore};
pub use types::{
    AccessEvent, CameraIp, CameraSettings, ChannelConfig, CustomerInfo, Device, EventFilter,
    PerformanceSample, PlateRecord, ProcessState, WorkerErrorKind,
};
