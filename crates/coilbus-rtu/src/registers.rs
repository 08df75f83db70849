// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Register map of the controller.
//!
//! | Register | Content                          |
//! |----------|----------------------------------|
//! | 1, 2     | coil count of channel 1, 2       |
//! | 3        | Modbus line speed code           |
//! | 6        | Modbus device address            |
//! | 10, 11   | CAN speed code, CAN node address |
//!
//! Channel 1 coils start at coil 0, channel 2 coils at coil 32.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Channel coil counts (two registers).
pub const REG_CHANNELS: u16 = 1;
/// Modbus line speed code.
pub const REG_MODBUS_SPEED: u16 = 3;
/// Modbus device address.
pub const REG_MODBUS_ADDRESS: u16 = 6;
/// CAN speed code and CAN address (two registers).
pub const REG_CAN_PARAMS: u16 = 10;

/// First coil of channel 1.
pub const COIL_CHANNEL1_START: u16 = 0;
/// First coil of channel 2.
pub const COIL_CHANNEL2_START: u16 = 32;

/// Lowest CAN node address.
pub const MIN_CAN_ADDRESS: u16 = 1;
/// Highest CAN node address.
pub const MAX_CAN_ADDRESS: u16 = 127;

// =============================================================================
// ModbusSpeed
// =============================================================================

/// Modbus line speed as stored in register 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ModbusSpeed {
    /// 2400 baud (code 0).
    B2400,
    /// 4800 baud (code 1).
    B4800,
    /// 9600 baud (code 2).
    B9600,
    /// 19200 baud (code 3).
    B19200,
    /// 38400 baud (code 4).
    B38400,
    /// 57600 baud (code 5).
    B57600,
    /// 115200 baud (code 6).
    B115200,
}

impl ModbusSpeed {
    /// All speeds in code order.
    pub const ALL: [ModbusSpeed; 7] = [
        Self::B2400,
        Self::B4800,
        Self::B9600,
        Self::B19200,
        Self::B38400,
        Self::B57600,
        Self::B115200,
    ];

    /// Decodes a register value.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Register value.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Line speed in baud.
    pub fn baud_rate(&self) -> u32 {
        match self {
            Self::B2400 => 2400,
            Self::B4800 => 4800,
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
            Self::B57600 => 57600,
            Self::B115200 => 115200,
        }
    }

    /// Looks up a speed by baud rate.
    pub fn from_baud_rate(baud_rate: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.baud_rate() == baud_rate)
    }
}

impl TryFrom<u32> for ModbusSpeed {
    type Error = ConfigurationError;

    fn try_from(baud_rate: u32) -> Result<Self, Self::Error> {
        Self::from_baud_rate(baud_rate).ok_or(ConfigurationError::InvalidBaudRate { baud_rate })
    }
}

impl From<ModbusSpeed> for u32 {
    fn from(speed: ModbusSpeed) -> Self {
        speed.baud_rate()
    }
}

impl fmt::Display for ModbusSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.baud_rate())
    }
}

// =============================================================================
// CanSpeed
// =============================================================================

/// CAN bus speed as stored in register 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CanSpeed {
    /// 10 kbit/s (code 0).
    K10,
    /// 20 kbit/s (code 1).
    K20,
    /// 50 kbit/s (code 2).
    K50,
    /// 125 kbit/s (code 3).
    K125,
    /// 250 kbit/s (code 4).
    K250,
    /// 500 kbit/s (code 5).
    K500,
    /// 800 kbit/s (code 6).
    K800,
    /// 1000 kbit/s (code 7).
    K1000,
}

impl CanSpeed {
    /// All speeds in code order.
    pub const ALL: [CanSpeed; 8] = [
        Self::K10,
        Self::K20,
        Self::K50,
        Self::K125,
        Self::K250,
        Self::K500,
        Self::K800,
        Self::K1000,
    ];

    /// Decodes a register value.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Register value.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Bit rate in kbit/s.
    pub fn kbps(&self) -> u32 {
        match self {
            Self::K10 => 10,
            Self::K20 => 20,
            Self::K50 => 50,
            Self::K125 => 125,
            Self::K250 => 250,
            Self::K500 => 500,
            Self::K800 => 800,
            Self::K1000 => 1000,
        }
    }
}

impl fmt::Display for CanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}K", self.kbps())
    }
}

impl FromStr for CanSpeed {
    type Err = ConfigurationError;

    /// Accepts `125K`, `125k` or `125`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_end_matches(['K', 'k']);
        let invalid = || ConfigurationError::InvalidSpeedCode {
            kind: "CAN",
            code: u16::MAX,
        };
        let kbps: u32 = digits.parse().map_err(|_| invalid())?;
        Self::ALL
            .into_iter()
            .find(|c| c.kbps() == kbps)
            .ok_or_else(invalid)
    }
}

impl TryFrom<String> for CanSpeed {
    type Error = ConfigurationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CanSpeed> for String {
    fn from(speed: CanSpeed) -> Self {
        speed.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
