//! `plategate gate` — manual door-open for commissioning a controller.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use plategate_core::config::load_config;
use plategate_daemon::gate::{door_open_frame, open_door, DoorOpen, GateTimeouts};

#[derive(Subcommand, Debug)]
pub enum GateCommand {
    /// Send one door-open frame and print the controller's reply.
    Open(GateOpenArgs),
}

#[derive(Args, Debug)]
pub struct GateOpenArgs {
    /// Controller host name or IP address.
    pub address: String,

    /// Receptor id on the controller.
    #[arg(long)]
    pub receptor: u8,

    /// Door id on the receptor.
    #[arg(long)]
    pub door: u8,

    /// Controller TCP port (defaults to `gate.port` from daemon.yaml).
    #[arg(long)]
    pub port: Option<u16>,
}

pub fn run(command: GateCommand) -> Result<()> {
    match command {
        GateCommand::Open(args) => open(args),
    }
}

fn open(args: GateOpenArgs) -> Result<()> {
    let config = load_config().context("failed to load daemon configuration")?;
    let request = DoorOpen {
        address: args.address,
        port: args.port.unwrap_or(config.gate.port),
        receptor_id: args.receptor,
        door_id: args.door,
    };

    println!(
        "sending {} to {}:{}",
        spaced_hex(&door_open_frame(request.receptor_id, request.door_id)),
        request.address,
        request.port
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let response = runtime
        .block_on(open_door(&request, GateTimeouts::from(&config.gate)))
        .context("door-open command failed")?;

    println!("{} controller replied: {}", "✓".green().bold(), spaced_hex(&response));
    Ok(())
}

/// Upper-case hex, one space between bytes (`00 5C 01 ...`).
fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}
