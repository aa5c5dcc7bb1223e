//! `plategate camera` — per-camera worker control through the daemon socket.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use plategate_core::ProcessState;
use plategate_daemon::{
    request_camera_start, request_camera_status, request_camera_stop, request_performance,
    DaemonError,
};

use super::print_json;

#[derive(Subcommand, Debug)]
pub enum CameraCommand {
    /// Launch a recognition worker and wait for it to confirm startup.
    Start(CameraStartArgs),
    /// Terminate a camera's worker and forget it.
    Stop {
        /// Camera IP address.
        ip: String,
    },
    /// Show every tracked camera and its state.
    Status {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the last performance sample reported by each worker.
    Performance {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct CameraStartArgs {
    /// Camera IP address.
    pub ip: String,

    /// RTSP user name.
    #[arg(long)]
    pub user: String,

    /// RTSP password.
    #[arg(long)]
    pub password: String,

    /// Inference device passed to the worker (daemon default: cpu).
    #[arg(long)]
    pub device: Option<String>,

    /// Frames per second the worker samples (daemon default: 3).
    #[arg(long)]
    pub frame_rate: Option<u32>,
}

#[derive(Tabled)]
struct CameraRow {
    #[tabled(rename = "camera")]
    ip: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "retry")]
    retry: String,
}

#[derive(Tabled)]
struct PerformanceRow {
    #[tabled(rename = "camera")]
    ip: String,
    #[tabled(rename = "fps")]
    fps: String,
    #[tabled(rename = "cpu %")]
    cpu: String,
    #[tabled(rename = "ram %")]
    ram: String,
    #[tabled(rename = "gpu %")]
    gpu: String,
    #[tabled(rename = "gpu mem %")]
    gpu_memory: String,
}

pub fn run(command: CameraCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        CameraCommand::Start(args) => {
            request_camera_start(
                &home,
                &args.ip,
                &args.user,
                &args.password,
                args.device,
                args.frame_rate,
            )
            .map_err(|err| explain(&home, err))
            .with_context(|| format!("failed to start camera {}", args.ip))?;
            println!("{} camera {} is running", "✓".green().bold(), args.ip);
        }
        CameraCommand::Stop { ip } => {
            request_camera_stop(&home, &ip)
                .map_err(|err| explain(&home, err))
                .with_context(|| format!("failed to stop camera {ip}"))?;
            println!("camera {ip} stopped");
        }
        CameraCommand::Status { json } => {
            let cameras = request_camera_status(&home)
                .map_err(|err| explain(&home, err))
                .context("failed to query camera status")?;
            if json {
                return print_json(&cameras);
            }
            if cameras.is_empty() {
                println!("No cameras are being supervised.");
                return Ok(());
            }
            let rows: Vec<CameraRow> = cameras
                .into_iter()
                .map(|camera| CameraRow {
                    ip: camera.ip.to_string(),
                    state: state_label(camera.state),
                    retry: if camera.retry_pending {
                        "pending".yellow().to_string()
                    } else {
                        "-".to_string()
                    },
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        CameraCommand::Performance { json } => {
            let samples = request_performance(&home)
                .map_err(|err| explain(&home, err))
                .context("failed to query worker performance")?;
            if json {
                return print_json(&samples);
            }
            if samples.is_empty() {
                println!("No performance samples reported yet.");
                return Ok(());
            }
            let rows: Vec<PerformanceRow> = samples
                .into_iter()
                .map(|(ip, sample)| PerformanceRow {
                    ip: ip.to_string(),
                    fps: format!("{:.1}", sample.avg_fps),
                    cpu: format!("{:.1}", sample.cpu_usage),
                    ram: format!("{:.1}", sample.ram_usage),
                    gpu: format!("{:.1}", sample.gpu_usage),
                    gpu_memory: format!("{:.1}", sample.gpu_memory_usage),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }

    Ok(())
}

fn state_label(state: ProcessState) -> String {
    let label = state.to_string();
    match state {
        ProcessState::Running => label.green().bold().to_string(),
        ProcessState::Connecting => label.cyan().to_string(),
        ProcessState::Error => label.red().bold().to_string(),
        ProcessState::Stopped => label.bright_black().to_string(),
    }
}

/// Turn daemon rejections into messages that carry their stable code.
fn explain(home: &Path, err: DaemonError) -> anyhow::Error {
    match err {
        DaemonError::DaemonNotRunning { .. } => anyhow!(
            "daemon is not running; start it with `plategate daemon start` (home: {})",
            home.display()
        ),
        DaemonError::Rejected { code, message } => anyhow!("{message} [{code}]"),
        other => anyhow::Error::new(other),
    }
}
