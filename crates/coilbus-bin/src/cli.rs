// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `ports`: list serial devices
//! - `scan`: find the device address and line speed
//! - `identify`: read the identification block
//! - `read` / `write`: holding registers
//! - `coils read` / `coils write`: coil access
//! - `settings show` / `settings apply`: configuration registers
//! - `monitor`: stream connection health events

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use coilbus_rtu::{CanSpeed, DeviceAddress, ModbusSpeed};

use crate::config::CoilbusConfig;
use crate::error::{BinError, BinResult};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// coilbus - Modbus RTU tool for serial coil controllers
#[derive(Parser, Debug)]
#[command(
    name = "coilbus",
    author = "Sylvex <contact@sylvex.io>",
    version = coilbus_rtu::VERSION,
    about = "Discover, inspect and configure serial coil controllers over Modbus RTU",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path (default: ./coilbus.toml if present)
    #[arg(short, long, env = "COILBUS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "COILBUS_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, default_value = "text", env = "COILBUS_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Serial port (overrides the configuration file)
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(short, long, global = true)]
    pub baud_rate: Option<u32>,

    /// Device address (overrides the configuration file)
    #[arg(short, long, global = true, value_parser = parse_address)]
    pub address: Option<DeviceAddress>,

    /// Output format for command results
    #[arg(short, long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List serial devices
    Ports,

    /// Find the device by probing every address and line speed
    ///
    /// Addresses are tried one at a time at every speed. Ctrl-C cancels
    /// within one probe timeout.
    Scan(ScanArgs),

    /// Read the identification block
    Identify,

    /// Read holding registers (falls back to input registers)
    Read(ReadArgs),

    /// Write holding registers
    Write(WriteArgs),

    /// Read or write coils
    #[command(subcommand)]
    Coils(CoilCommand),

    /// Show or change the device settings
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// Stream connection health events
    ///
    /// Runs until Ctrl-C or until the connection is lost.
    Monitor(MonitorArgs),
}

/// `coils` subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CoilCommand {
    /// Read coils
    Read(CoilReadArgs),
    /// Write coils (one value uses FC05, several use FC15)
    Write(CoilWriteArgs),
}

/// `settings` subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Read the configuration registers
    Show,
    /// Change configuration registers
    Apply(ApplyArgs),
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `scan` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// First address to probe
    #[arg(long)]
    pub first: Option<u8>,

    /// Last address to probe
    #[arg(long)]
    pub last: Option<u8>,

    /// Speeds to try, in order (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub baud_rates: Vec<u32>,

    /// Probe timeout (e.g. 100ms)
    #[arg(long, value_parser = parse_duration)]
    pub probe_timeout: Option<Duration>,

    /// Do not print progress lines
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the `read` command.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// First register
    #[arg(short, long, default_value = "0")]
    pub start: u16,

    /// Number of registers
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u16,

    /// Read input registers (FC04) instead of holding registers
    #[arg(long)]
    pub input: bool,
}

/// Arguments for the `write` command.
#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// First register
    #[arg(short, long)]
    pub start: u16,

    /// Values to write
    #[arg(required = true, num_args = 1..)]
    pub values: Vec<u16>,

    /// Use Write Single Register (FC06); requires exactly one value
    #[arg(long)]
    pub single: bool,
}

/// Arguments for `coils read`.
#[derive(Args, Debug, Clone)]
pub struct CoilReadArgs {
    /// First coil
    #[arg(short, long, default_value = "0")]
    pub start: u16,

    /// Number of coils
    #[arg(short = 'n', long, default_value = "8")]
    pub count: u16,
}

/// Arguments for `coils write`.
#[derive(Args, Debug, Clone)]
pub struct CoilWriteArgs {
    /// First coil
    #[arg(short, long)]
    pub start: u16,

    /// Coil states (1/0, on/off, true/false)
    #[arg(required = true, num_args = 1.., value_parser = parse_coil)]
    pub values: Vec<bool>,
}

/// Arguments for `settings apply`.
///
/// Unset options keep the value read from the device.
#[derive(Args, Debug, Clone, Default)]
pub struct ApplyArgs {
    /// Coil count of channel 1
    #[arg(long)]
    pub channel1: Option<u16>,

    /// Coil count of channel 2
    #[arg(long)]
    pub channel2: Option<u16>,

    /// Modbus line speed in baud
    #[arg(long, value_parser = parse_modbus_speed)]
    pub modbus_speed: Option<ModbusSpeed>,

    /// New Modbus device address
    #[arg(long, value_parser = parse_address)]
    pub modbus_address: Option<DeviceAddress>,

    /// CAN bus speed (e.g. 125K)
    #[arg(long)]
    pub can_speed: Option<CanSpeed>,

    /// CAN node address (1-127)
    #[arg(long)]
    pub can_address: Option<u16>,
}

/// Arguments for the `monitor` command.
#[derive(Args, Debug, Clone, Default)]
pub struct MonitorArgs {
    /// Heartbeat interval (e.g. 500ms, 2s)
    #[arg(short, long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Declare loss after two missed heartbeats instead of three
    #[arg(long)]
    pub fast: bool,

    /// Keep running after a heartbeat loss and report reconnects
    #[arg(long)]
    pub follow: bool,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Value Parsers
// =============================================================================

fn parse_address(s: &str) -> Result<DeviceAddress, String> {
    let value: u8 = s.parse().map_err(|_| format!("invalid address '{}'", s))?;
    DeviceAddress::new(value).map_err(|e| e.to_string())
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_modbus_speed(s: &str) -> Result<ModbusSpeed, String> {
    let baud: u32 = s.parse().map_err(|_| format!("invalid speed '{}'", s))?;
    ModbusSpeed::try_from(baud).map_err(|e| e.to_string())
}

fn parse_coil(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(format!("invalid coil state '{}'", s)),
    }
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Applies `--port`, `--baud-rate` and `--address` on top of `config`.
    pub fn apply_overrides(&self, config: &mut CoilbusConfig) -> BinResult<()> {
        if let Some(port) = &self.port {
            config.serial.port = Some(port.clone());
        }
        if let Some(baud_rate) = self.baud_rate {
            if !coilbus_rtu::SUPPORTED_BAUD_RATES.contains(&baud_rate) {
                return Err(BinError::config(format!("unsupported baud rate {}", baud_rate)));
            }
            config.serial.baud_rate = baud_rate;
        }
        if let Some(address) = self.address {
            config.serial.address = address;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
