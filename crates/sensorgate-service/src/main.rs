//! sensorgate - BLE sensor gateway with a serial uplink.
//!
//! Run with: `cargo run -p sensorgate-service -- run`

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sensorgate_service::{Config, Diagnostic, commands};

/// sensorgate - BLE sensors to SQLite and a serial-attached MQTT uplink.
#[derive(Parser, Debug)]
#[command(name = "sensorgate")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port of the uplink controller (overrides config).
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway in the foreground (default behavior).
    Run,

    /// Check that the controller answers PONG.
    Ping,

    /// Send an AT command to the modem and print the reply.
    At {
        /// AT command, e.g. `AT+CSQ`.
        command: String,
    },

    /// Ask the controller for a location fix.
    Gps,

    /// Publish a payload through the uplink.
    ///
    /// Example: sensorgate pub fleet/1/test '{"ping":"ok"}'
    Pub {
        /// Topic to publish on.
        topic: String,
        /// Payload text, sent as-is.
        payload: String,
    },

    /// Request a timestamped radio health report.
    Health,

    /// Dump the modem diagnostic report.
    Diag,
}

impl Command {
    fn into_diagnostic(self) -> Option<Diagnostic> {
        match self {
            Command::Run => None,
            Command::Ping => Some(Diagnostic::Ping),
            Command::At { command } => Some(Diagnostic::At(command)),
            Command::Gps => Some(Diagnostic::Gps),
            Command::Pub { topic, payload } => Some(Diagnostic::Publish { topic, payload }),
            Command::Health => Some(Diagnostic::Health),
            Command::Diag => Some(Diagnostic::Diag),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Targets match by prefix, so this covers every sensorgate_* crate.
    let directive = if args.verbose { "sensorgate=debug" } else { "sensorgate=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_validated(path)?,
        None => Config::load_default()?,
    };
    if let Some(port) = args.port {
        config.gateway.serial_port = port;
    }

    match args.command.and_then(Command::into_diagnostic) {
        None => {
            info!("Configuration loaded ({} device(s))", config.ble.devices.len());
            sensorgate_service::run(config).await?;
        }
        Some(diagnostic) => {
            let report = commands::execute(&config, &diagnostic).await?;
            println!("{}", report);
            if !report.ok {
                bail!("{} failed", diagnostic.name());
            }
        }
    }

    Ok(())
}
