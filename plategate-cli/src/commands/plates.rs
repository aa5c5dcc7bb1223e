//! `plategate plates` — the registered plate list.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use plategate_core::{DocumentStore, FileStore, PlateRecord};

use super::{print_json, read_json_array};

#[derive(Subcommand, Debug)]
pub enum PlatesCommand {
    /// Replace the whole plate list with the records in a JSON file.
    Sync {
        /// JSON array of `{owner_name, group, unit, devices: [...]}` records.
        file: PathBuf,
    },
    /// List registered vehicles.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Tabled)]
struct PlateRow {
    #[tabled(rename = "plate")]
    plate: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "group")]
    group: String,
    #[tabled(rename = "unit")]
    unit: String,
    #[tabled(rename = "vehicle")]
    vehicle: String,
}

pub fn run(command: PlatesCommand) -> Result<()> {
    let store = FileStore::open().context("could not open the plategate data store")?;

    match command {
        PlatesCommand::Sync { file } => {
            let records: Vec<PlateRecord> = read_json_array(&file)?;
            let owners = store
                .replace_plates(&records)
                .context("failed to replace the plate list")?;
            let devices: usize = records.iter().map(|r| r.devices.len()).sum();
            println!(
                "{} synced {owners} owners, {devices} vehicles",
                "✓".green().bold()
            );
        }
        PlatesCommand::List { json } => {
            let records = store.plates().context("failed to load the plate list")?;
            if json {
                return print_json(&records);
            }
            let rows: Vec<PlateRow> = records
                .iter()
                .flat_map(|record| {
                    record.devices.iter().map(move |device| PlateRow {
                        plate: device.plate.clone(),
                        owner: record.owner_name.clone(),
                        group: record.group.clone(),
                        unit: record.unit.clone(),
                        vehicle: [device.make.as_str(), device.model.as_str(), device.color.as_str()]
                            .iter()
                            .filter(|part| !part.is_empty())
                            .copied()
                            .collect::<Vec<_>>()
                            .join(" "),
                    })
                })
                .collect();
            if rows.is_empty() {
                println!("No plates registered. Run 'plategate plates sync <file.json>'.");
                return Ok(());
            }
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }

    Ok(())
}
