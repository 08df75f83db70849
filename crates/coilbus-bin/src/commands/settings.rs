// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of `settings show` and `settings apply`.

use coilbus_rtu::{apply_settings, read_settings, ApplyStep, DeviceSettings};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{connect, emit};
use crate::cli::{ApplyArgs, Cli, SettingsCommand};
use crate::config::CoilbusConfig;
use crate::error::{BinError, BinResult};

fn print_settings(settings: &DeviceSettings) {
    fn show<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "(unread)".to_string(), |v| v.to_string())
    }

    println!("{:<18} {}", "Channel 1 coils", settings.channel1_coils);
    println!("{:<18} {}", "Channel 2 coils", settings.channel2_coils);
    println!("{:<18} {}", "Modbus speed", show(settings.modbus_speed));
    println!("{:<18} {}", "Modbus address", show(settings.modbus_address));
    println!("{:<18} {}", "CAN speed", show(settings.can_speed));
    println!("{:<18} {}", "CAN address", show(settings.can_address));
}

/// Overlays the given options on the settings read from the device.
fn merge(mut settings: DeviceSettings, args: &ApplyArgs) -> DeviceSettings {
    if let Some(n) = args.channel1 {
        settings.channel1_coils = n;
    }
    if let Some(n) = args.channel2 {
        settings.channel2_coils = n;
    }
    if args.modbus_speed.is_some() {
        settings.modbus_speed = args.modbus_speed;
    }
    if args.modbus_address.is_some() {
        settings.modbus_address = args.modbus_address;
    }
    if args.can_speed.is_some() {
        settings.can_speed = args.can_speed;
    }
    if args.can_address.is_some() {
        settings.can_address = args.can_address;
    }
    settings.read_at = None;
    settings
}

fn step_label(step: ApplyStep) -> &'static str {
    match step {
        ApplyStep::Channels => "writing channel coil counts",
        ApplyStep::ModbusSpeed => "writing Modbus speed",
        ApplyStep::CanParams => "writing CAN parameters",
        ApplyStep::ModbusAddress => "writing Modbus address",
        ApplyStep::Settling => "waiting for the device",
    }
}

/// Executes a `settings` subcommand.
pub async fn settings(cli: &Cli, config: &CoilbusConfig, command: SettingsCommand) -> BinResult<()> {
    let client = connect(config).await?;
    let result = match command {
        SettingsCommand::Show => show(cli, &client).await,
        SettingsCommand::Apply(args) => apply(cli, &client, args).await,
    };
    client.disconnect().await?;
    result
}

async fn show(cli: &Cli, client: &coilbus_rtu::RtuClient) -> BinResult<()> {
    let settings = read_settings(client).await?;
    emit(cli, &settings, || print_settings(&settings))
}

async fn apply(cli: &Cli, client: &coilbus_rtu::RtuClient, args: ApplyArgs) -> BinResult<()> {
    let current = read_settings(client).await?;
    let target = merge(current.clone(), &args);

    if let Some(error) = target.validate().into_iter().next() {
        return Err(BinError::config(error.to_string()));
    }
    if target == merge(current, &ApplyArgs::default()) {
        info!("Settings unchanged, nothing to write");
        return emit(cli, &target, || println!("Settings unchanged"));
    }

    let (tx, mut rx) = mpsc::channel(8);
    let quiet = cli.quiet;
    let printer = tokio::spawn(async move {
        while let Some(step) = rx.recv().await {
            if !quiet {
                eprintln!("... {}", step_label(step));
            }
        }
    });

    let outcome = apply_settings(client, &target, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;
    let outcome = outcome?;

    if !outcome.address_acknowledged {
        warn!("Address change was not acknowledged; the device may already use the new address");
    }

    emit(cli, &target, || {
        println!("Settings applied");
        if args.modbus_address.is_some() || args.modbus_speed.is_some() {
            println!("Reconnect with the new address or speed to continue");
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use coilbus_rtu::{CanSpeed, DeviceAddress, ModbusSpeed};

    fn current() -> DeviceSettings {
        DeviceSettings {
            channel1_coils: 16,
            channel2_coils: 16,
            modbus_speed: Some(ModbusSpeed::B115200),
            modbus_address: DeviceAddress::new(1).ok(),
            can_speed: Some(CanSpeed::K125),
            can_address: Some(1),
            read_at: None,
        }
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let args = ApplyArgs {
            channel2: Some(8),
            can_speed: Some(CanSpeed::K500),
            ..Default::default()
        };
        let merged = merge(current(), &args);
        assert_eq!(merged.channel1_coils, 16);
        assert_eq!(merged.channel2_coils, 8);
        assert_eq!(merged.can_speed, Some(CanSpeed::K500));
        assert_eq!(merged.modbus_speed, Some(ModbusSpeed::B115200));
        assert!(merged.read_at.is_none());
    }

    #[test]
    fn test_merge_without_args_is_identity() {
        assert_eq!(merge(current(), &ApplyArgs::default()), current());
    }

    #[test]
    fn test_merged_can_address_validated() {
        let args = ApplyArgs {
            can_address: Some(200),
            ..Default::default()
        };
        assert!(!merge(current(), &args).validate().is_empty());
    }
}
