// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Framing, CRC and identification decoding against the simulated device.

use coilbus_rtu::codec::{self, to_hex};
use coilbus_rtu::{crc16, DeviceAddress, DeviceIdentity, FunctionCode, TransactionRequest};
use coilbus_tests::prelude::*;

// =============================================================================
// CRC and Framing
// =============================================================================

#[test]
fn test_crc_reference_vector() {
    let body = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
    assert_eq!(crc16(&body).to_le_bytes(), [0xC5, 0xCD]);
    assert_eq!(to_hex(&codec::encode(0x01, 0x03, &body[2..])), "01 03 00 00 00 0A C5 CD");
}

#[test]
fn test_request_encoding_is_accepted_by_device() {
    let device = SimulatedDevice::new(1, 9600).with_holding(0, &[0x1234]);
    let request = TransactionRequest::read(
        DeviceAddress::new(device.address()).unwrap(),
        FunctionCode::ReadHoldingRegisters,
        0,
        1,
    );

    let reply = device.respond(&request.encode()).expect("device answers");
    let frame = codec::decode(&reply).unwrap();
    assert_eq!(frame.function(), 0x03);
    assert_eq!(frame.payload(), &[0x02, 0x12, 0x34]);
}

#[test]
fn test_exception_frame_decodes() {
    let device = SimulatedDevice::new(1, 9600);
    device.fail_with_exception(0x10, 0x02);

    let reply = device
        .respond(&codec::encode(1, 0x10, &[0, 1, 0, 1, 2, 0, 9]))
        .unwrap();
    assert_eq!(to_hex(&reply[..3]), "01 90 02");

    let frame = codec::decode(&reply).unwrap();
    assert!(frame.is_exception());
    assert_eq!(frame.exception_code(), Some(0x02));
}

// =============================================================================
// Identification
// =============================================================================

#[tokio::test]
async fn test_identity_through_client() {
    let harness = BusHarness::connected(SimulatedDevice::new(15, 115200)).await;

    let identity = harness.client.read_identity().await.assert_ok();

    assert!(identity.is_recognized());
    assert_eq!(identity.address, Some(15));
    assert_eq!(identity.software_version.unwrap().to_string(), "V00.07");
    assert_eq!(identity.hardware_version.unwrap().to_string(), "V01.01");
    assert_eq!(identity.status.as_deref(), Some("OPH/"));
    assert_eq!(identity.io.unwrap().to_string(), "0/32/0/0");
    assert_eq!(identity.product_id, Some(0x6319_5FFB));
    // Address, function, payload and CRC.
    assert_eq!(identity.raw.len(), 2 + IDENTITY_PAYLOAD.len() + 2);
}

#[test]
fn test_identity_fields_listing() {
    let mut bytes = vec![0x0F, 0x11];
    bytes.extend_from_slice(&IDENTITY_PAYLOAD);
    let identity = DeviceIdentity::decode(&bytes);

    let names: Vec<&str> = identity.fields().iter().map(|(name, _)| *name).collect();
    assert!(names.len() >= 6, "fields: {:?}", names);
    assert!(identity.to_string().contains("V00.07"));
}

#[tokio::test]
async fn test_identity_from_silent_device() {
    let harness = BusHarness::connected(SimulatedDevice::new(3, 9600)).await;
    harness.device.set_present(false);

    let err = harness.client.read_identity().await.assert_err();
    err.assert_category("protocol");
}

#[tokio::test]
async fn test_identity_with_wrong_speed() {
    let config = BusHarnessConfig::new("wrong_speed").client_baud_rate(19200);
    let harness = BusHarness::new(SimulatedDevice::new(3, 9600), config);
    harness.client.connect().await.assert_ok();

    assert!(harness.client.read_identity().await.is_err());
    assert_eq!(harness.opener.request_count(), 1);
}

#[tokio::test]
async fn test_auto_baud_finds_device_speed() {
    let config = BusHarnessConfig::new("auto_baud").client_baud_rate(115200);
    let harness = BusHarness::new(SimulatedDevice::new(3, 19200), config);

    let found = harness.client.connect_auto_baud().await.assert_ok();

    assert_eq!(found, 19200);
    let speeds: Vec<u32> = harness.opener.requests().iter().map(|r| r.baud_rate).collect();
    assert_eq!(speeds, vec![115200, 57600, 38400, 19200]);
}
