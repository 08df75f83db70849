// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of `identify`, `read`, `write` and `coils`.

use coilbus_rtu::{CoilBlock, RegisterBlock};
use tracing::info;

use super::{connect, emit};
use crate::cli::{Cli, CoilCommand, ReadArgs, WriteArgs};
use crate::config::CoilbusConfig;
use crate::error::{BinError, BinResult};

/// Reads and prints the identification block.
pub async fn identify(cli: &Cli, config: &CoilbusConfig) -> BinResult<()> {
    let client = connect(config).await?;
    let identity = client.read_identity().await;
    client.disconnect().await?;
    let identity = identity?;

    if !identity.is_recognized() {
        tracing::warn!(magic = ?identity.magic, "Unexpected identification magic");
    }

    emit(cli, &identity, || {
        for (name, value) in identity.fields() {
            println!("{:<18} {}", name, value);
        }
        if cli.is_verbose() {
            println!("{:<18} {}", "Raw", identity.raw_hex());
        }
    })
}

fn print_registers(block: &RegisterBlock) {
    if block.is_empty() {
        println!("(no data)");
    }
    for (i, value) in block.values.iter().enumerate() {
        let address = u32::from(block.start) + i as u32;
        println!("{:>5}: {:>5}  0x{:04X}", address, value, value);
    }
}

fn print_coils(block: &CoilBlock) {
    if block.is_empty() {
        println!("(no data)");
    }
    for (i, on) in block.values.iter().enumerate() {
        let address = u32::from(block.start) + i as u32;
        println!("{:>5}: {}", address, if *on { "ON" } else { "off" });
    }
}

/// Reads registers.
pub async fn read(cli: &Cli, config: &CoilbusConfig, args: ReadArgs) -> BinResult<()> {
    let client = connect(config).await?;
    let block = if args.input {
        client.read_input_registers(args.start, args.count).await
    } else {
        client.read_holding_registers(args.start, args.count).await
    };
    client.disconnect().await?;
    let block = block?;

    emit(cli, &block, || print_registers(&block))
}

/// Writes registers.
pub async fn write(cli: &Cli, config: &CoilbusConfig, args: WriteArgs) -> BinResult<()> {
    if args.single && args.values.len() != 1 {
        return Err(BinError::config("--single takes exactly one value"));
    }

    let client = connect(config).await?;
    let result = if args.single {
        client.write_single_register(args.start, args.values[0]).await
    } else {
        client.write_holding_registers(args.start, &args.values).await
    };
    client.disconnect().await?;
    result?;

    info!(start = args.start, count = args.values.len(), "Registers written");
    let block = RegisterBlock::new(args.start, args.values);
    emit(cli, &block, || {
        println!("Wrote {} register(s) at {}", block.len(), block.start)
    })
}

/// Reads or writes coils.
pub async fn coils(cli: &Cli, config: &CoilbusConfig, command: CoilCommand) -> BinResult<()> {
    let client = connect(config).await?;

    match command {
        CoilCommand::Read(args) => {
            let block = client.read_coils(args.start, args.count).await;
            client.disconnect().await?;
            let block = block?;
            emit(cli, &block, || print_coils(&block))
        }
        CoilCommand::Write(args) => {
            let result = match args.values.as_slice() {
                [on] => client.write_single_coil(args.start, *on).await,
                values => client.write_multiple_coils(args.start, values).await,
            };
            client.disconnect().await?;
            result?;

            let block = CoilBlock::new(args.start, args.values);
            emit(cli, &block, || {
                println!("Wrote {} coil(s) at {}", block.len(), block.start)
            })
        }
    }
}
