//! `plategate watch` — live supervisor events.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;

use plategate_daemon::{subscribe, SupervisorEvent};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Print each event as one JSON line.
    #[arg(long)]
    pub json: bool,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let events = subscribe(&home).context("failed to subscribe to daemon events")?;

        for event in events {
            let event = event.context("daemon event stream failed")?;
            if self.json {
                println!(
                    "{}",
                    serde_json::to_string(&event).context("failed to render event JSON")?
                );
            } else {
                println!("{} {}", Local::now().format("%H:%M:%S"), describe(&event));
            }
        }

        println!("daemon closed the event stream");
        Ok(())
    }
}

fn describe(event: &SupervisorEvent) -> String {
    match event {
        SupervisorEvent::Starting { ip } => format!("{ip} {}", "starting".cyan()),
        SupervisorEvent::Started { ip } => format!("{ip} {}", "started".green().bold()),
        SupervisorEvent::Reconnecting { ip } => format!("{ip} {}", "reconnecting".yellow()),
        SupervisorEvent::Stopped { ip } => format!("{ip} {}", "stopped".bright_black()),
        SupervisorEvent::Error { ip, error_type } => {
            format!("{ip} {} {error_type}", "error".red().bold())
        }
        SupervisorEvent::Detection { ip, access_event } => {
            let info = &access_event.customer_info;
            format!(
                "{ip} {} {} -> {} ({} / {})",
                "detection".green(),
                access_event.detected_plate,
                info.plate,
                info.name,
                info.unit,
            )
        }
        SupervisorEvent::PlateNotFound { ip, plate } => {
            format!("{ip} {} {plate}", "plate not found".yellow())
        }
        SupervisorEvent::Performance {
            ip,
            avg_fps,
            cpu_usage,
            ram_usage,
            gpu_usage,
            gpu_memory_usage,
        } => format!(
            "{ip} performance fps={avg_fps:.1} cpu={cpu_usage:.1}% ram={ram_usage:.1}% gpu={gpu_usage:.1}% gpu_mem={gpu_memory_usage:.1}%"
        ),
    }
}
