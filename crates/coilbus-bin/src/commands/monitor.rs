// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `monitor` command.

use std::sync::Arc;

use coilbus_rtu::health::SerialPresence;
use coilbus_rtu::{
    HealthEvent, HealthMonitor, HealthTransition, HeartbeatProbe, LossCause, MonitorConfig,
    PresenceWatcher,
};
use tracing::info;

use super::{connect, print_json};
use crate::cli::{Cli, MonitorArgs, OutputFormat};
use crate::config::CoilbusConfig;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

fn monitor_config(config: &CoilbusConfig, args: &MonitorArgs, port: &str) -> MonitorConfig {
    let mut monitor = config.monitor.clone();
    if let Some(interval) = args.interval {
        monitor.interval = interval;
    }
    monitor.fast_mode |= args.fast;
    if monitor.device_path.is_none() {
        monitor.device_path = Some(port.to_string());
    }
    monitor
}

fn print_transition(cli: &Cli, transition: &HealthTransition) -> BinResult<()> {
    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(transition)?);
            Ok(())
        }
        OutputFormat::Text => {
            println!(
                "{}  {}",
                transition.at.format("%Y-%m-%d %H:%M:%S%.3f"),
                transition.event
            );
            Ok(())
        }
    }
}

/// Streams health events until Ctrl-C or loss.
pub async fn monitor(
    cli: &Cli,
    config: &CoilbusConfig,
    args: MonitorArgs,
    shutdown: &ShutdownCoordinator,
) -> BinResult<()> {
    let port = config.port()?.to_string();
    let monitor_config = monitor_config(config, &args, &port);
    let client = Arc::new(connect(config).await?);

    let watcher = PresenceWatcher::spawn(
        Arc::new(SerialPresence),
        monitor_config.presence_poll_interval,
    );
    let removal = monitor_config
        .device_path
        .as_deref()
        .map(|path| watcher.device_removed_event(listed_path(path)));

    info!(
        port = %port,
        interval = ?monitor_config.effective_interval(),
        fast_mode = monitor_config.fast_mode,
        "Monitoring connection"
    );

    let probe: Arc<dyn HeartbeatProbe> = client.clone();
    let mut handle = HealthMonitor::spawn(probe, monitor_config, removal);

    let result = loop {
        tokio::select! {
            _ = shutdown.signalled() => break Ok(()),
            transition = handle.next_event() => {
                let Some(transition) = transition else {
                    break Ok(());
                };
                print_transition(cli, &transition)?;
                match &transition.event {
                    HealthEvent::Lost { cause: LossCause::Removed { path } } => {
                        break Err(BinError::runtime(format!("{} was removed", path)));
                    }
                    HealthEvent::Lost { .. } if !args.follow => {
                        break Err(BinError::runtime("connection lost"));
                    }
                    _ => {}
                }
            }
        }
    };

    handle.join().await;
    watcher.stop();
    client.disconnect().await?;

    if cli.is_verbose() {
        let stats = client.stats();
        let summary = serde_json::json!({
            "transactions": stats.transactions(),
            "success_rate": stats.success_rate(),
            "crc_errors": stats.crc_errors(),
            "timeouts": stats.timeouts(),
        });
        print_json(&summary)?;
    }

    result
}

// =============================================================================
// Tests
// =============================================================================

/// Resolves symlinks such as `/dev/serial/by-id/...` to the node the port
/// enumeration lists. Paths that cannot be resolved are used as given.
fn listed_path(path: &str) -> String {
    std::fs::canonicalize(path)
        .ok()
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or_else(|| path.to_string())
}
