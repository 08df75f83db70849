// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Captured device data and ready-made configurations.

use coilbus_rtu::{DeviceAddress, DiscoveryConfig, RtuConfig, TimingConfig};

/// Port name used for simulated links.
pub const SIM_PORT: &str = "/dev/ttySIM0";

/// Identification reply captured from a controller at address 15, without
/// the address and function bytes and without the CRC.
///
/// Decodes to magic `0x77418799`, software V00.07, hardware V01.01,
/// status `OPH/`, I/O `0/32/0/0` and product id `0x63195FFB`.
pub const IDENTITY_PAYLOAD: [u8; 34] = [
    0x0F, 0xFF, 0x99, 0x87, 0x41, 0x77, 0x07, 0x00, 0x01, 0x01, 0x0F, 0x00, 0x00, 0x00, 0x2F,
    0x48, 0x50, 0x4F, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFB, 0x5F, 0x19, 0x63,
    0x19, 0x62, 0xB1, 0xB2,
];

/// Client configuration for a simulated device, with all settle delays
/// removed.
pub fn rtu_config(address: u8, baud_rate: u32) -> RtuConfig {
    let address = DeviceAddress::new(address).unwrap_or_default();
    RtuConfig::builder()
        .port(SIM_PORT)
        .baud_rate(baud_rate)
        .address(address)
        .timing(TimingConfig::immediate())
        .build()
        .expect("fixture config is valid")
}

/// Discovery over `first..=last` at every standard speed, without settle
/// delays.
pub fn discovery_config(first: u8, last: u8) -> DiscoveryConfig {
    DiscoveryConfig {
        first_address: first,
        last_address: last,
        timing: TimingConfig::immediate(),
        ..Default::default()
    }
}
