// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `scan` command.

use coilbus_rtu::{DiscoveryConfig, DiscoveryEngine, DiscoveryOutcome, ScanProgress};
use tracing::info;

use super::emit;
use crate::cli::{Cli, ScanArgs};
use crate::config::CoilbusConfig;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// Builds the search space from the configuration and arguments.
fn discovery_config(config: &CoilbusConfig, args: &ScanArgs) -> DiscoveryConfig {
    let mut discovery = config.discovery.clone();
    discovery.framing = config.serial.framing;
    if let Some(first) = args.first {
        discovery.first_address = first;
    }
    if let Some(last) = args.last {
        discovery.last_address = last;
    }
    if !args.baud_rates.is_empty() {
        discovery.baud_rates = args.baud_rates.clone();
    }
    if let Some(timeout) = args.probe_timeout {
        discovery.timing.probe_timeout = timeout;
    }
    discovery
}

fn print_progress(progress: &ScanProgress) {
    eprintln!(
        "[{:>3}%] address {:>3} done ({}/{} addresses, {} probes)",
        progress.percent(),
        progress.address,
        progress.addresses_done,
        progress.addresses_total,
        progress.probes
    );
}

/// Runs discovery on the configured port until found, exhausted or Ctrl-C.
pub async fn scan(
    cli: &Cli,
    config: &CoilbusConfig,
    args: ScanArgs,
    shutdown: &ShutdownCoordinator,
) -> BinResult<()> {
    let port = config.port()?.to_string();
    let discovery = discovery_config(config, &args);
    let show_progress = !args.no_progress && !cli.quiet;

    info!(
        port = %port,
        probes = discovery.probe_count(),
        "Scanning for device"
    );

    let engine = DiscoveryEngine::for_serial_ports(discovery)?;
    let mut handle = engine.spawn(port.clone());

    loop {
        tokio::select! {
            _ = shutdown.signalled() => {
                handle.cancel();
                // Drain so the task is not blocked on a full channel.
                while handle.next_progress().await.is_some() {}
                break;
            }
            progress = handle.next_progress() => match progress {
                Some(progress) if show_progress => print_progress(&progress),
                Some(_) => {}
                None => break,
            },
        }
    }

    match handle.join().await? {
        DiscoveryOutcome::Found(result) => {
            let identity = result.identity();
            let output = serde_json::json!({
                "port": port,
                "address": result.address,
                "baud_rate": result.baud_rate,
                "found_at": result.found_at,
                "response": result.hex(),
                "identity": identity,
            });
            emit(cli, &output, || {
                println!(
                    "Found device at address {} on {} @ {} baud",
                    result.address, port, result.baud_rate
                );
                println!("Response: {}", result.hex());
                println!();
                println!("{}", identity);
            })
        }
        DiscoveryOutcome::Exhausted => Err(BinError::NotFound(format!(
            "no device answered on {}",
            port
        ))),
        DiscoveryOutcome::Cancelled => Err(BinError::Interrupted("scan cancelled".into())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn test_arguments_override_config() {
        let cli = Cli::parse_from([
            "coilbus",
            "scan",
            "--first",
            "5",
            "--last",
            "9",
            "--baud-rates",
            "9600",
            "--probe-timeout",
            "250ms",
        ]);
        let crate::cli::Commands::Scan(args) = cli.command else {
            panic!("Expected Scan command");
        };

        let discovery = discovery_config(&CoilbusConfig::default(), &args);
        assert_eq!(discovery.first_address, 5);
        assert_eq!(discovery.last_address, 9);
        assert_eq!(discovery.baud_rates, vec![9600]);
        assert_eq!(discovery.timing.probe_timeout, Duration::from_millis(250));
        assert_eq!(discovery.probe_count(), 5);
    }

    #[test]
    fn test_defaults_cover_full_space() {
        let discovery = discovery_config(&CoilbusConfig::default(), &ScanArgs::default());
        assert_eq!(discovery.probe_count(), 1000);
    }
}
