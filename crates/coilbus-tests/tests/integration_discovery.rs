// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Discovery over the simulated bus.

use std::time::Duration;

use coilbus_rtu::{
    CancelFlag, DiscoveryOutcome, DiscoveryState, ScanProgress, DISCOVERY_BAUD_RATES,
};
use coilbus_tests::assert_completes_within;
use coilbus_tests::prelude::*;

#[tokio::test]
async fn test_scan_is_address_major() {
    let config = BusHarnessConfig::new("address_major").timeout(Duration::from_secs(10));
    let harness = BusHarness::new(SimulatedDevice::new(7, 38400), config);
    let engine = harness.discovery(discovery_config(1, 200));

    let cancel = CancelFlag::new();

    let outcome = harness
        .run(|| engine.scan(harness.port(), None, &cancel))
        .await;

    let found = outcome.found().expect("device found");
    assert_eq!(found.address.get(), 7);
    assert_eq!(found.baud_rate, 38400);
    assert_eq!(engine.state(), DiscoveryState::Found);

    let log = harness.opener.requests();
    // Six full addresses, then 115200, 57600 and 38400 at address 7.
    assert_eq!(log.len(), 6 * 5 + 3);
    log[..30].assert_address_major(1..=6, DISCOVERY_BAUD_RATES);
    assert_eq!(
        log[..5].iter().map(|r| r.baud_rate).collect::<Vec<_>>(),
        vec![115200, 57600, 38400, 19200, 9600]
    );
    assert!(log.iter().all(|r| r.function == 0x11));
}

#[tokio::test]
async fn test_found_result_carries_identity() {
    let harness = BusHarness::with_device(SimulatedDevice::new(3, 115200));
    let engine = harness.discovery(discovery_config(1, 10));

    let outcome = engine.scan(SIM_PORT, None, &CancelFlag::new()).await;

    let DiscoveryOutcome::Found(result) = outcome else {
        panic!("expected a device, got {:?}", outcome);
    };
    assert!(result.identity().is_recognized());
    assert!(result.hex().starts_with("03 11"));
    // Opened exactly once per probe.
    assert_eq!(harness.opener.open_count(), 11);
}

#[tokio::test]
async fn test_scan_exhausts_search_space() {
    let harness = BusHarness::with_device(SimulatedDevice::new(50, 9600));
    let engine = harness.discovery(discovery_config(1, 4));

    let outcome = engine.scan(SIM_PORT, None, &CancelFlag::new()).await;

    assert!(matches!(outcome, DiscoveryOutcome::Exhausted));
    assert_eq!(engine.state(), DiscoveryState::Exhausted);
    harness
        .opener
        .requests()
        .assert_address_major(1..=4, DISCOVERY_BAUD_RATES);
}

#[tokio::test]
async fn test_cancel_checked_before_each_probe() {
    let harness = BusHarness::with_device(SimulatedDevice::new(150, 9600));
    let engine = harness.discovery(discovery_config(1, 200));
    let cancel = CancelFlag::new();
    harness.opener.cancel_after(7, cancel.clone());

    let outcome = engine.scan(SIM_PORT, None, &cancel).await;

    assert!(matches!(outcome, DiscoveryOutcome::Cancelled));
    assert_eq!(engine.state(), DiscoveryState::Cancelled);
    assert_eq!(harness.opener.request_count(), 7);
}

#[tokio::test]
async fn test_cancel_before_start_sends_nothing() {
    let harness = BusHarness::with_device(SimulatedDevice::new(1, 115200));
    let engine = harness.discovery(discovery_config(1, 200));
    let cancel = CancelFlag::new();
    cancel.cancel();

    let outcome = engine.scan(SIM_PORT, None, &cancel).await;

    assert!(matches!(outcome, DiscoveryOutcome::Cancelled));
    assert_eq!(harness.opener.request_count(), 0);
}

#[tokio::test]
async fn test_unplugged_adapter_is_probed_through() {
    let harness = BusHarness::with_device(SimulatedDevice::new(1, 115200));
    harness.opener.set_unplugged(true);
    let engine = harness.discovery(discovery_config(1, 3));

    let outcome = engine.scan(SIM_PORT, None, &CancelFlag::new()).await;

    assert!(matches!(outcome, DiscoveryOutcome::Exhausted));
    assert_eq!(harness.opener.request_count(), 0);
}

#[tokio::test]
async fn test_spawned_scan_reports_progress_per_address() {
    let harness = BusHarness::with_device(SimulatedDevice::new(4, 9600));
    let mut handle = harness.discovery(discovery_config(1, 200)).spawn(SIM_PORT);

    let mut updates: Vec<ScanProgress> = Vec::new();
    assert_completes_within!(Duration::from_secs(10), async {
        while let Some(progress) = handle.next_progress().await {
            updates.push(progress);
        }
    });
    let outcome = handle.join().await.assert_ok();

    assert_eq!(outcome.found().map(|r| r.address.get()), Some(4));
    // Addresses 1 to 3 completed; the address that answered reports none.
    let addresses: Vec<u8> = updates.iter().map(|p| p.address).collect();
    assert_eq!(addresses, vec![1, 2, 3]);
    assert_eq!(updates[2].addresses_done, 3);
    assert_eq!(updates[2].addresses_total, 200);
    assert_eq!(updates[2].probes, 15);
}

#[tokio::test]
async fn test_spawned_scan_cancelled_through_handle() {
    let harness = BusHarness::with_device(SimulatedDevice::new(199, 9600));
    harness.opener.set_latency(Duration::from_millis(5));
    let mut handle = harness.discovery(discovery_config(1, 200)).spawn(SIM_PORT);

    // Wait for the first completed address, then cancel.
    let first = assert_completes_within!(Duration::from_secs(10), handle.next_progress());
    assert_eq!(first.map(|p| p.address), Some(1));
    handle.cancel();
    while handle.next_progress().await.is_some() {}

    let outcome = handle.join().await.assert_ok();
    assert!(matches!(outcome, DiscoveryOutcome::Cancelled));
    assert!(harness.opener.request_count() < 1000);
}

#[tokio::test]
async fn test_narrowed_speed_list() {
    let harness = BusHarness::with_device(SimulatedDevice::new(2, 9600));
    let mut config = discovery_config(1, 5);
    config.baud_rates = vec![9600];
    let engine = harness.discovery(config);

    let outcome = engine.scan(SIM_PORT, None, &CancelFlag::new()).await;

    assert_eq!(outcome.found().map(|r| r.baud_rate), Some(9600));
    harness.opener.requests().assert_address_major(1..=2, &[9600]);
}
