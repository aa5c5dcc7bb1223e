//! `plategate events` — recorded access events.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use plategate_core::{AccessEvent, DocumentStore, EventFilter, FileStore};

use super::print_json;

#[derive(Subcommand, Debug)]
pub enum EventsCommand {
    /// Most recent events for one gate channel, oldest first.
    Recent {
        /// Gate channel (1-4).
        channel: u8,

        /// Number of events to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Filter events by registrant fields and time range, newest first.
    Query(EventsQueryArgs),
}

#[derive(Args, Debug)]
pub struct EventsQueryArgs {
    /// Owner name contains (case-insensitive).
    #[arg(long)]
    pub name: Option<String>,

    /// Group contains (case-insensitive).
    #[arg(long)]
    pub group: Option<String>,

    /// Unit contains (case-insensitive).
    #[arg(long)]
    pub unit: Option<String>,

    /// Registered plate contains (case-insensitive).
    #[arg(long)]
    pub plate: Option<String>,

    /// Earliest timestamp, RFC 3339 (e.g. 2024-05-01T00:00:00Z).
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Latest timestamp, RFC 3339.
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl From<&EventsQueryArgs> for EventFilter {
    fn from(args: &EventsQueryArgs) -> Self {
        EventFilter {
            name: args.name.clone(),
            group: args.group.clone(),
            unit: args.unit.clone(),
            plate: args.plate.clone(),
            from: args.from,
            to: args.to,
        }
    }
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "channel")]
    channel: String,
    #[tabled(rename = "camera")]
    camera: String,
    #[tabled(rename = "read")]
    detected: String,
    #[tabled(rename = "plate")]
    plate: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "unit")]
    unit: String,
}

impl From<AccessEvent> for EventRow {
    fn from(event: AccessEvent) -> Self {
        Self {
            time: event
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            channel: event
                .channel_number
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            camera: event.camera_ip.to_string(),
            detected: event.detected_plate,
            plate: event.customer_info.plate,
            owner: event.customer_info.name,
            unit: event.customer_info.unit,
        }
    }
}

pub fn run(command: EventsCommand) -> Result<()> {
    let store = FileStore::open().context("could not open the plategate data store")?;

    let (events, json) = match command {
        EventsCommand::Recent {
            channel,
            limit,
            json,
        } => {
            if !(1..=4).contains(&channel) {
                bail!("gate channel {channel} is out of range (expected 1-4)");
            }
            let events = store
                .recent_events(channel, limit)
                .context("failed to load access events")?;
            (events, json)
        }
        EventsCommand::Query(args) => {
            let filter = EventFilter::from(&args);
            if let (Some(from), Some(to)) = (filter.from, filter.to) {
                if from > to {
                    bail!("--from must not be later than --to");
                }
            }
            let events = store
                .query_events(&filter)
                .context("failed to query access events")?;
            (events, args.json)
        }
    };

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No access events found.");
        return Ok(());
    }
    let rows: Vec<EventRow> = events.into_iter().map(EventRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
