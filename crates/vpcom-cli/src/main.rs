//! vpcom-host: line-oriented host for the bridge controller
//!
//! Reads one call per stdin line, invokes the blocking controller, and
//! writes one JSON line per call to stdout. Logs go to stderr.
//!
//! Usage: vpcom-host [--host H] [--port P] [--format bcp|json]
//!                   [--dialect named|subcommand] [--timeout-ms N]
//!                   [--connect-timeout-ms N]

mod host;

use anyhow::{Context, Result};
use host::{HostCall, error_reply, reply};
use std::io::{BufRead, Write};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vpcom_controller::{BridgeConfig, Controller};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::from_args(std::env::args().skip(1))?;
    info!(
        "vpcom-host starting, peer {} ({} / {})",
        config.address(),
        config.wire_format,
        config.dialect
    );

    let controller = Controller::new(config)?;
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let response = match HostCall::parse(&line) {
            Ok(None) => continue,
            Ok(Some(call)) => reply(call.execute(&controller)),
            Err(message) => {
                warn!("Rejected host line {:?}: {}", line, message);
                error_reply("usage", &message)
            }
        };

        writeln!(stdout, "{}", response).context("Failed to write stdout")?;
        stdout.flush().context("Failed to flush stdout")?;

        if controller.is_stopped() {
            info!("Bridge stopped, exiting");
            break;
        }
    }

    controller.shutdown();
    Ok(())
}
