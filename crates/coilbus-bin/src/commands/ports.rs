// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `ports` command.

use coilbus_rtu::client::list_serial_devices;

use super::emit;
use crate::cli::Cli;
use crate::error::BinResult;

/// Lists serial devices.
pub fn ports(cli: &Cli) -> BinResult<()> {
    let ports = list_serial_devices()?;

    emit(cli, &ports, || {
        if ports.is_empty() {
            println!("No serial devices found");
        }
        for port in &ports {
            println!("{}", port);
        }
    })
}
