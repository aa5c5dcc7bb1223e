//! `plategate cameras` — per-camera settings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use plategate_core::{CameraSettings, DocumentStore, FileStore};

use super::{print_json, read_json_array};

#[derive(Subcommand, Debug)]
pub enum CamerasCommand {
    /// Replace all camera settings with the entries in a JSON file.
    Save {
        /// JSON array of `{ip, name, channel_occupied}` entries.
        file: PathBuf,
    },
    /// List camera settings.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Tabled)]
struct CameraRow {
    #[tabled(rename = "camera")]
    ip: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "channel")]
    channel: String,
}

pub fn run(command: CamerasCommand) -> Result<()> {
    let store = FileStore::open().context("could not open the plategate data store")?;

    match command {
        CamerasCommand::Save { file } => {
            let cameras: Vec<CameraSettings> = read_json_array(&file)?;
            for camera in &cameras {
                if camera.channel_number().is_none() {
                    println!(
                        "{} {} occupies '{}'; detections from it will not open a gate",
                        "warning:".yellow().bold(),
                        camera.ip,
                        camera.channel_occupied
                    );
                }
            }
            let saved = store
                .replace_cameras(&cameras)
                .context("failed to save camera settings")?;
            println!("{} saved {saved} cameras", "✓".green().bold());
        }
        CamerasCommand::List { json } => {
            let cameras = store.cameras().context("failed to load camera settings")?;
            if json {
                return print_json(&cameras);
            }
            if cameras.is_empty() {
                println!("No cameras configured.");
                return Ok(());
            }
            let rows: Vec<CameraRow> = cameras
                .into_iter()
                .map(|camera| CameraRow {
                    ip: camera.ip.to_string(),
                    name: camera.name.unwrap_or_default(),
                    channel: camera.channel_occupied,
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }

    Ok(())
}
