// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `ports`: list serial devices
//! - `scan`: discovery
//! - `identify`, `read`, `write`, `coils`: register and coil access
//! - `settings`: configuration registers
//! - `monitor`: health events

mod device;
mod monitor;
mod ports;
mod scan;
mod settings;

use serde::Serialize;
use tracing::debug;

use coilbus_rtu::RtuClient;

use crate::cli::{Cli, Commands, OutputFormat};
use crate::config::{CoilbusConfig, ConfigLoader};
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    let config = load_config(&cli)?;
    let shutdown = ShutdownCoordinator::new();
    shutdown.listen();

    match cli.command.clone() {
        Commands::Ports => ports::ports(&cli),
        Commands::Scan(args) => scan::scan(&cli, &config, args, &shutdown).await,
        Commands::Identify => device::identify(&cli, &config).await,
        Commands::Read(args) => device::read(&cli, &config, args).await,
        Commands::Write(args) => device::write(&cli, &config, args).await,
        Commands::Coils(command) => device::coils(&cli, &config, command).await,
        Commands::Settings(command) => settings::settings(&cli, &config, command).await,
        Commands::Monitor(args) => monitor::monitor(&cli, &config, args, &shutdown).await,
    }
}

/// Loads the configuration file and applies command-line overrides.
fn load_config(cli: &Cli) -> BinResult<CoilbusConfig> {
    let mut config = ConfigLoader::new().load_or_default(cli.config.as_deref())?;
    cli.apply_overrides(&mut config)?;
    debug!(?config, "Effective configuration");
    Ok(config)
}

/// Opens the configured link.
async fn connect(config: &CoilbusConfig) -> BinResult<RtuClient> {
    let client = RtuClient::serial(config.rtu_config()?)?.with_retry_config(config.retry.clone());
    client
        .connect()
        .await
        .map_err(|e| BinError::from(e).with_context(format!("connect to {}", client.port())))?;
    Ok(client)
}

/// Prints `value` as pretty JSON.
fn print_json<T: Serialize + ?Sized>(value: &T) -> BinResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints `text` unless JSON output was requested.
fn emit<T: Serialize + ?Sized>(cli: &Cli, value: &T, text: impl FnOnce()) -> BinResult<()> {
    match cli.format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Text => {
            text();
            Ok(())
        }
    }
}
