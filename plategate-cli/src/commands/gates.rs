//! `plategate gates` — gate channel configuration.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use plategate_core::{ChannelConfig, DocumentStore, FileStore};

use super::{print_json, read_json_array};

#[derive(Subcommand, Debug)]
pub enum GatesCommand {
    /// Replace all gate channels with the entries in a JSON file.
    Save {
        /// JSON array of `{channel, controller_address, receptor_id, door_id}` entries.
        file: PathBuf,
    },
    /// List gate channels.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Tabled)]
struct GateRow {
    #[tabled(rename = "channel")]
    channel: u8,
    #[tabled(rename = "controller")]
    controller: String,
    #[tabled(rename = "receptor")]
    receptor: u8,
    #[tabled(rename = "door")]
    door: u8,
}

pub fn run(command: GatesCommand) -> Result<()> {
    let store = FileStore::open().context("could not open the plategate data store")?;

    match command {
        GatesCommand::Save { file } => {
            let channels: Vec<ChannelConfig> = read_json_array(&file)?;
            if let Some(bad) = channels.iter().find(|c| !(1..=4).contains(&c.channel)) {
                bail!("gate channel {} is out of range (expected 1-4)", bad.channel);
            }
            let saved = store
                .replace_gate_channels(&channels)
                .context("failed to save gate channels")?;
            println!("{} saved {saved} gate channels", "✓".green().bold());
        }
        GatesCommand::List { json } => {
            let channels = store
                .gate_channels()
                .context("failed to load gate channels")?;
            if json {
                return print_json(&channels);
            }
            if channels.is_empty() {
                println!("No gate channels configured.");
                return Ok(());
            }
            let rows: Vec<GateRow> = channels
                .into_iter()
                .map(|c| GateRow {
                    channel: c.channel,
                    controller: c.controller_address,
                    receptor: c.receptor_id,
                    door: c.door_id,
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }

    Ok(())
}
