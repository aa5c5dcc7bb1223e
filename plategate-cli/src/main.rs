//! Plategate — license-plate gate control CLI.
//!
//! # Usage
//!
//! ```text
//! plategate daemon start|stop|status
//! plategate camera start <ip> --user <user> --password <pw> [--device cpu] [--frame-rate 3]
//! plategate camera stop <ip>
//! plategate camera status [--json]
//! plategate camera performance [--json]
//! plategate watch
//! plategate plates sync <file.json>
//! plategate plates list [--json]
//! plategate cameras save <file.json> | list [--json]
//! plategate gates save <file.json> | list [--json]
//! plategate events recent <channel> [--limit 10] [--json]
//! plategate events query [--name] [--group] [--unit] [--plate] [--from] [--to] [--json]
//! plategate gate open <address> --receptor <id> --door <id> [--port 9000]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    camera::CameraCommand, cameras::CamerasCommand, daemon::DaemonCommand, events::EventsCommand,
    gate::GateCommand, gates::GatesCommand, plates::PlatesCommand, watch::WatchArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "plategate",
    version,
    about = "Supervise plate-recognition workers and open gates for registered vehicles",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or query the supervisor daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Start, stop and inspect camera workers through the daemon.
    Camera {
        #[command(subcommand)]
        command: CameraCommand,
    },

    /// Print supervisor events as they arrive.
    Watch(WatchArgs),

    /// Manage the registered plate list.
    Plates {
        #[command(subcommand)]
        command: PlatesCommand,
    },

    /// Manage per-camera settings.
    Cameras {
        #[command(subcommand)]
        command: CamerasCommand,
    },

    /// Manage gate channel configuration.
    Gates {
        #[command(subcommand)]
        command: GatesCommand,
    },

    /// Query recorded access events.
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },

    /// Talk to a gate controller directly.
    Gate {
        #[command(subcommand)]
        command: GateCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Camera { command } => commands::camera::run(command),
        Commands::Watch(args) => args.run(),
        Commands::Plates { command } => commands::plates::run(command),
        Commands::Cameras { command } => commands::cameras::run(command),
        Commands::Gates { command } => commands::gates::run(command),
        Commands::Events { command } => commands::events::run(command),
        Commands::Gate { command } => commands::gate::run(command),
    }
}
