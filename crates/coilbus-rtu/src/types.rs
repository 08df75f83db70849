// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core types for the RTU link and its configuration.
//!
//! - **FunctionCode**: the function codes this controller speaks
//! - **DeviceAddress**: a validated 1-247 station address
//! - **RegisterBlock / CoilBlock**: contiguous value blocks
//! - **RtuConfig**: serial configuration with builder
//! - **TimingConfig**: settle delays, read budget and timeouts
//!
//! # Examples
//!
//! ```
//! use coilbus_rtu::types::{DeviceAddress, RtuConfig};
//!
//! let config = RtuConfig::builder()
//!     .port("/dev/ttyUSB0")
//!     .baud_rate(38400)
//!     .address(DeviceAddress::new(7).unwrap())
//!     .build()
//!     .unwrap();
//! assert_eq!(config.address.get(), 7);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, RtuError};

// =============================================================================
// FunctionCode
// =============================================================================

/// Bit set in the function byte of an exception response.
pub const EXCEPTION_BIT: u8 = 0x80;

/// Modbus function codes used by this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCode {
    /// Read Coils (0x01).
    ReadCoils,
    /// Read Holding Registers (0x03).
    ReadHoldingRegisters,
    /// Read Input Registers (0x04).
    ReadInputRegisters,
    /// Write Single Coil (0x05).
    WriteSingleCoil,
    /// Write Single Register (0x06).
    WriteSingleRegister,
    /// Write Multiple Coils (0x0F).
    WriteMultipleCoils,
    /// Write Multiple Registers (0x10).
    WriteMultipleRegisters,
    /// Vendor identification (0x11, Report Server ID).
    Identify,
}

impl FunctionCode {
    /// Returns the wire byte.
    pub const fn code(&self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::Identify => 0x11,
        }
    }

    /// Parses a wire byte (exception bit cleared first).
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code & !EXCEPTION_BIT {
            0x01 => Some(Self::ReadCoils),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            0x11 => Some(Self::Identify),
            _ => None,
        }
    }

    /// Returns `true` for write function codes.
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil
                | Self::WriteSingleRegister
                | Self::WriteMultipleCoils
                | Self::WriteMultipleRegisters
        )
    }

    /// Returns the standard name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
            Self::Identify => "Identify",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.code())
    }
}

// =============================================================================
// DeviceAddress
// =============================================================================

/// A Modbus station address in the range 1-247.
///
/// Address 0 is broadcast and is never targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    /// Lowest valid address.
    pub const MIN: u8 = 1;
    /// Highest valid address.
    pub const MAX: u8 = 247;

    /// Creates a validated address.
    pub fn new(address: u8) -> Result<Self, ConfigurationError> {
        if (Self::MIN..=Self::MAX).contains(&address) {
            Ok(Self(address))
        } else {
            Err(ConfigurationError::invalid_address(address as u16))
        }
    }

    /// Creates an address from a wider integer, as read from a register.
    pub fn from_register(value: u16) -> Result<Self, ConfigurationError> {
        u8::try_from(value)
            .map_err(|_| ConfigurationError::invalid_address(value))
            .and_then(Self::new)
    }

    /// Returns the raw address byte.
    #[inline]
    pub const fn get(&self) -> u8 {
        self.0
    }
}

impl Default for DeviceAddress {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = ConfigurationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceAddress> for u8 {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// RegisterBlock / CoilBlock
// =============================================================================

/// Ordered 16-bit values at a contiguous start address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBlock {
    /// First register address.
    pub start: u16,
    /// Values in address order.
    pub values: Vec<u16>,
}

impl RegisterBlock {
    /// Creates a block.
    pub fn new(start: u16, values: Vec<u16>) -> Self {
        Self { start, values }
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the block holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at an absolute register address.
    pub fn get(&self, address: u16) -> Option<u16> {
        let offset = address.checked_sub(self.start)?;
        self.values.get(offset as usize).copied()
    }
}

/// Ordered booleans at a contiguous start address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoilBlock {
    /// First coil address.
    pub start: u16,
    /// Values in address order.
    pub values: Vec<bool>,
}

impl CoilBlock {
    /// Creates a block.
    pub fn new(start: u16, values: Vec<bool>) -> Self {
        Self { start, values }
    }

    /// Number of coils.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the block holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Packs the coils LSB-first: coil `i` is bit `i % 8` of byte `i / 8`.
    pub fn packed(&self) -> Vec<u8> {
        pack_coils(&self.values)
    }
}

/// Packs booleans LSB-first into `(n + 7) / 8` bytes.
pub fn pack_coils(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len().div_ceil(8)];
    for (i, _) in values.iter().enumerate().filter(|(_, on)| **on) {
        bytes[i / 8] |= 1 << (i % 8);
    }
    bytes
}

/// Unpacks `count` LSB-first booleans.
pub fn unpack_coils(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .take(bytes.len() * 8)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

// =============================================================================
// Serial Port Settings
// =============================================================================

/// Speeds this controller can be configured to, ascending.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Speeds tried during discovery and auto-detection, fastest first.
pub const DISCOVERY_BAUD_RATES: &[u32] = &[115200, 57600, 38400, 19200, 9600];

/// Data bits configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits (default).
    #[default]
    Eight,
}

impl DataBits {
    /// Returns the number of bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Parity configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity (default).
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Parity {
    /// Returns the number of parity bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Odd | Self::Even => 1,
        }
    }

    /// Returns the short character representation.
    pub const fn char(&self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.char())
    }
}

/// Stop bits configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// 1 stop bit (default).
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

impl StopBits {
    /// Returns the number of stop bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Line framing: data bits, parity and stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Framing {
    /// Data bits.
    #[serde(default)]
    pub data_bits: DataBits,
    /// Parity.
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits.
    #[serde(default)]
    pub stop_bits: StopBits,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.data_bits, self.parity, self.stop_bits)
    }
}

// =============================================================================
// TimingConfig
// =============================================================================

/// Per-operation timing of the transaction engine.
///
/// Settle delays are waited between writing a request and reading the
/// reply; the device is slower to answer writes than reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Settle delay for register and coil reads.
    #[serde(default = "default_read_settle", with = "humantime_serde")]
    pub read_settle: Duration,

    /// Settle delay for identification requests.
    #[serde(default = "default_identify_settle", with = "humantime_serde")]
    pub identify_settle: Duration,

    /// Settle delay for single register/coil writes.
    #[serde(default = "default_single_write_settle", with = "humantime_serde")]
    pub single_write_settle: Duration,

    /// Settle delay for multiple register/coil writes.
    #[serde(default = "default_multi_write_settle", with = "humantime_serde")]
    pub multi_write_settle: Duration,

    /// Time allowed for the first response byte after settling.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Silence after which a partially received response is complete.
    #[serde(default = "default_inter_byte_gap", with = "humantime_serde")]
    pub inter_byte_gap: Duration,

    /// Maximum bytes read per response.
    #[serde(default = "default_read_budget")]
    pub read_budget: usize,

    /// Back-off before the first re-read after an identification CRC error.
    #[serde(default = "default_identify_retry_backoff", with = "humantime_serde")]
    pub identify_retry_backoff: Duration,

    /// Delay between further identification re-reads.
    #[serde(default = "default_identify_retry_interval", with = "humantime_serde")]
    pub identify_retry_interval: Duration,

    /// Extra re-reads after an identification CRC error.
    #[serde(default = "default_identify_retries")]
    pub identify_retries: u32,

    /// Pause after a successful identification before the next request.
    #[serde(default = "default_identify_pause", with = "humantime_serde")]
    pub identify_pause: Duration,

    /// Settle delay of a discovery probe.
    #[serde(default = "default_probe_settle", with = "humantime_serde")]
    pub probe_settle: Duration,

    /// Read timeout of a discovery probe.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,
}

fn default_read_settle() -> Duration {
    Duration::from_millis(200)
}

fn default_identify_settle() -> Duration {
    Duration::from_millis(100)
}

fn default_single_write_settle() -> Duration {
    Duration::from_millis(300)
}

fn default_multi_write_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_inter_byte_gap() -> Duration {
    Duration::from_millis(20)
}

fn default_read_budget() -> usize {
    100
}

fn default_identify_retry_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_identify_retry_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_identify_retries() -> u32 {
    2
}

fn default_identify_pause() -> Duration {
    Duration::from_millis(500)
}

fn default_probe_settle() -> Duration {
    Duration::from_millis(100)
}

fn default_probe_timeout() -> Duration {
    Duration::from_millis(100)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            read_settle: default_read_settle(),
            identify_settle: default_identify_settle(),
            single_write_settle: default_single_write_settle(),
            multi_write_settle: default_multi_write_settle(),
            read_timeout: default_read_timeout(),
            inter_byte_gap: default_inter_byte_gap(),
            read_budget: default_read_budget(),
            identify_retry_backoff: default_identify_retry_backoff(),
            identify_retry_interval: default_identify_retry_interval(),
            identify_retries: default_identify_retries(),
            identify_pause: default_identify_pause(),
            probe_settle: default_probe_settle(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl TimingConfig {
    /// Timing with every delay set to zero, for simulated links.
    pub fn immediate() -> Self {
        Self {
            read_settle: Duration::ZERO,
            identify_settle: Duration::ZERO,
            single_write_settle: Duration::ZERO,
            multi_write_settle: Duration::ZERO,
            read_timeout: Duration::from_millis(50),
            inter_byte_gap: Duration::from_millis(5),
            read_budget: default_read_budget(),
            identify_retry_backoff: Duration::ZERO,
            identify_retry_interval: Duration::ZERO,
            identify_retries: default_identify_retries(),
            identify_pause: Duration::ZERO,
            probe_settle: Duration::ZERO,
            probe_timeout: Duration::from_millis(50),
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), RtuError> {
        if self.read_timeout.is_zero() {
            return Err(ConfigurationError::invalid_timing(
                "read_timeout",
                self.read_timeout,
                "must be greater than zero",
            )
            .into());
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigurationError::invalid_timing(
                "probe_timeout",
                self.probe_timeout,
                "must be greater than zero",
            )
            .into());
        }
        // The longest reply (identification) is 38 bytes.
        if self.read_budget < 8 {
            return Err(ConfigurationError::missing_field("read_budget >= 8").into());
        }
        Ok(())
    }
}

// =============================================================================
// RtuConfig
// =============================================================================

/// Configuration of one serial link to one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtuConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,

    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Line framing (8N1 by default).
    #[serde(default)]
    pub framing: Framing,

    /// Device address.
    #[serde(default)]
    pub address: DeviceAddress,

    /// Transaction timing.
    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_baud_rate() -> u32 {
    9600
}

impl RtuConfig {
    /// Creates a new builder for RtuConfig.
    pub fn builder() -> RtuConfigBuilder {
        RtuConfigBuilder::default()
    }

    /// Creates a simple configuration with just a port.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), RtuError> {
        if self.port.is_empty() {
            return Err(RtuError::configuration(ConfigurationError::missing_field(
                "port",
            )));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(RtuError::configuration(
                ConfigurationError::InvalidBaudRate {
                    baud_rate: self.baud_rate,
                },
            ));
        }

        self.timing.validate()
    }
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            framing: Framing::default(),
            address: DeviceAddress::default(),
            timing: TimingConfig::default(),
        }
    }
}

// =============================================================================
// RtuConfigBuilder
// =============================================================================

/// Builder for RtuConfig.
#[derive(Debug, Default)]
pub struct RtuConfigBuilder {
    port: Option<String>,
    baud_rate: Option<u32>,
    framing: Option<Framing>,
    address: Option<DeviceAddress>,
    timing: Option<TimingConfig>,
}

impl RtuConfigBuilder {
    /// Sets the serial port.
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Sets the baud rate.
    pub fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = Some(rate);
        self
    }

    /// Sets the line framing.
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = Some(framing);
        self
    }

    /// Sets the device address.
    pub fn address(mut self, address: DeviceAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the transaction timing.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<RtuConfig, RtuError> {
        let port = self
            .port
            .ok_or_else(|| RtuError::configuration(ConfigurationError::missing_field("port")))?;

        let config = RtuConfig {
            port,
            baud_rate: self.baud_rate.unwrap_or_else(default_baud_rate),
            framing: self.framing.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            timing: self.timing.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================
