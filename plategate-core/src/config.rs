//! Daemon configuration (`~/.plategate/daemon.yaml`).
//!
//! The file is optional; every field has a default, and a missing file means
//! "all defaults". Durations are stored as milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ROOT_DIR: &str = ".plategate";
pub const CONFIG_FILE: &str = "daemon.yaml";

/// Port the gate controller listens on.
pub const DEFAULT_GATE_PORT: u16 = 9000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10_000;
pub const DEFAULT_SUPPRESSION_WINDOW_MS: u64 = 5_000;

/// Launch defaults applied when a start request omits them.
pub const DEFAULT_DEVICE: &str = "cpu";
pub const DEFAULT_FRAME_RATE: u32 = 3;

/// `<home>/.plategate/`
pub fn plategate_root(home: &Path) -> PathBuf {
    home.join(ROOT_DIR)
}

/// `<home>/.plategate/daemon.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    plategate_root(home).join(CONFIG_FILE)
}

/// How launch parameters are passed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArgStyle {
    /// `<ip> <u> <p> <f> <d>`
    #[default]
    Positional,
    /// `--ip <ip> --user <u> --password <p> --frame_rate <f> --device <d>`
    Flags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: String,
    /// Leading arguments placed before the launch parameters (e.g. the script path).
    pub args: Vec<String>,
    pub arg_style: ArgStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["stream.py".to_string()],
            arg_style: ArgStyle::Positional,
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GATE_PORT,
            connect_timeout_ms: 5_000,
            response_timeout_ms: 5_000,
        }
    }
}

impl GateConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub worker: WorkerConfig,
    pub gate: GateConfig,
    pub retry_delay_ms: u64,
    pub suppression_window_ms: u64,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            gate: GateConfig::default(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            suppression_window_ms: DEFAULT_SUPPRESSION_WINDOW_MS,
            log_format: LogFormat::Text,
        }
    }
}

impl DaemonConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.worker.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "worker.program",
                reason: "must not be empty".to_string(),
            });
        }
        if self.gate.port == 0 {
            return Err(ConfigError::Invalid {
                field: "gate.port",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(self)
    }
}

/// Load `<home>/.plategate/daemon.yaml`, or defaults when the file is absent.
pub fn load_config_at(home: &Path) -> Result<DaemonConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(DaemonConfig::default());
    }
    let config: DaemonConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
    config.validate()
}

/// `load_config_at` convenience wrapper.
pub fn load_config() -> Result<DaemonConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_config_at(&home)
}
