// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection health monitoring with heartbeats and device removal.

use std::sync::Arc;
use std::time::Duration;

use coilbus_rtu::health::{PresenceEvent, PresenceSource};
use coilbus_rtu::{
    ConnectionHealthState, HealthEvent, HealthMonitor, HeartbeatProbe, LossCause, MonitorConfig,
    PresenceWatcher,
};
use coilbus_tests::prelude::*;

const INTERVAL: Duration = Duration::from_millis(100);
const WAIT: Duration = Duration::from_secs(5);

fn lost_after(failures: u32) -> HealthEvent {
    HealthEvent::Lost {
        cause: LossCause::Heartbeat { failures },
    }
}

fn scripted(steps: &[ProbeStep], fallback: ProbeStep) -> (Arc<ScriptedProbe>, Arc<dyn HeartbeatProbe>) {
    let probe = Arc::new(ScriptedProbe::new(steps.iter().copied(), fallback));
    let dyn_probe: Arc<dyn HeartbeatProbe> = probe.clone();
    (probe, dyn_probe)
}

// =============================================================================
// Heartbeat
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_client_heartbeat_lifecycle() {
    let harness = BusHarness::connected(SimulatedDevice::new(1, 115200)).await;
    let mut handle = harness.monitor(MonitorConfig::new(INTERVAL).fast(true));

    expect_event_eq(&mut handle, HealthEvent::Alive, WAIT).await;
    assert_eq!(handle.state(), ConnectionHealthState::Alive);

    harness.device.set_present(false);
    expect_event_eq(&mut handle, lost_after(2), WAIT).await;
    assert_eq!(handle.state(), ConnectionHealthState::Lost);

    harness.device.set_present(true);
    expect_event_eq(&mut handle, HealthEvent::Reconnected, WAIT).await;
    assert_eq!(handle.state(), ConnectionHealthState::Alive);

    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_normal_mode_needs_three_failures() {
    let (probe, dyn_probe) = scripted(&[ProbeStep::Ok, ProbeStep::Fail, ProbeStep::Fail], ProbeStep::Fail);
    let mut handle = HealthMonitor::spawn(dyn_probe, MonitorConfig::new(INTERVAL), None);

    expect_event_eq(&mut handle, HealthEvent::Alive, WAIT).await;
    expect_event_eq(&mut handle, lost_after(3), WAIT).await;
    assert_eq!(probe.calls(), 4);

    // Lost is reported once while failures continue.
    expect_no_event(&mut handle, INTERVAL * 10).await;
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_fast_mode_needs_two_failures() {
    let (probe, dyn_probe) = scripted(&[ProbeStep::Ok], ProbeStep::Fail);
    let mut handle = HealthMonitor::spawn(dyn_probe, MonitorConfig::new(INTERVAL).fast(true), None);

    expect_event_eq(&mut handle, HealthEvent::Alive, WAIT).await;
    expect_event_eq(&mut handle, lost_after(2), WAIT).await;
    assert_eq!(probe.calls(), 3);
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count() {
    let steps = [
        ProbeStep::Ok,
        ProbeStep::Fail,
        ProbeStep::Ok,
        ProbeStep::Fail,
        ProbeStep::Ok,
    ];
    let (probe, dyn_probe) = scripted(&steps, ProbeStep::Ok);
    let mut handle = HealthMonitor::spawn(dyn_probe, MonitorConfig::new(INTERVAL).fast(true), None);

    expect_event_eq(&mut handle, HealthEvent::Alive, WAIT).await;
    expect_no_event(&mut handle, INTERVAL * 10).await;
    assert!(probe.calls() >= steps.len());
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_busy_link_is_not_a_failure() {
    let steps = [
        ProbeStep::Ok,
        ProbeStep::Fail,
        ProbeStep::Busy,
        ProbeStep::Busy,
        ProbeStep::Fail,
    ];
    let (probe, dyn_probe) = scripted(&steps, ProbeStep::Ok);
    let mut handle = HealthMonitor::spawn(dyn_probe, MonitorConfig::new(INTERVAL).fast(true), None);

    expect_event_eq(&mut handle, HealthEvent::Alive, WAIT).await;
    expect_event_eq(&mut handle, lost_after(2), WAIT).await;
    assert_eq!(probe.calls(), 5);
    expect_event_eq(&mut handle, HealthEvent::Reconnected, WAIT).await;
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_switching_to_fast_mode_at_runtime() {
    let (_probe, dyn_probe) = scripted(&[ProbeStep::Ok], ProbeStep::Fail);
    let mut handle = HealthMonitor::spawn(dyn_probe, MonitorConfig::new(INTERVAL), None);

    expect_event_eq(&mut handle, HealthEvent::Alive, WAIT).await;
    handle.set_fast_mode(true);
    expect_event_eq(&mut handle, lost_after(2), WAIT).await;
    handle.join().await;
}

// =============================================================================
// Removal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_removal_wins_immediately() {
    let presence = Arc::new(MockPresence::with_devices(&[SIM_PORT, "/dev/ttyUSB9"]));
    let watcher = PresenceWatcher::spawn(
        Arc::clone(&presence) as Arc<dyn PresenceSource>,
        Duration::from_millis(50),
    );
    let removal = watcher.device_removed_event(SIM_PORT);
    let (_probe, dyn_probe) = scripted(&[], ProbeStep::Ok);
    let config = MonitorConfig::new(Duration::from_secs(5)).with_device_path(SIM_PORT);
    let mut handle = HealthMonitor::spawn(dyn_probe, config, Some(removal));

    expect_event_eq(&mut handle, HealthEvent::Alive, WAIT).await;

    // Another adapter leaving does not matter.
    presence.unplug("/dev/ttyUSB9");
    expect_no_event(&mut handle, Duration::from_millis(500)).await;

    presence.unplug(SIM_PORT);
    let transition = expect_event(&mut handle, Duration::from_secs(1)).await;
    assert_eq!(
        transition.event,
        HealthEvent::Lost {
            cause: LossCause::Removed {
                path: SIM_PORT.to_string()
            }
        }
    );
    assert_eq!(handle.state(), ConnectionHealthState::Lost);

    // Removal ends the monitor.
    assert!(handle.next_event().await.is_none());
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_removal_interrupts_heartbeat_in_flight() {
    let harness = BusHarness::with_device(SimulatedDevice::new(1, 9600));
    harness.opener.set_latency(Duration::from_secs(60));
    harness.client.connect().await.assert_ok();

    let presence = Arc::new(MockPresence::with_devices(&[SIM_PORT]));
    let watcher = PresenceWatcher::spawn(
        Arc::clone(&presence) as Arc<dyn PresenceSource>,
        Duration::from_millis(50),
    );
    let removal = watcher.device_removed_event(SIM_PORT);
    let mut handle = HealthMonitor::spawn(
        Arc::clone(&harness.client) as Arc<dyn HeartbeatProbe>,
        MonitorConfig::new(INTERVAL),
        Some(removal),
    );

    // The first heartbeat is now stuck waiting for the slow link.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.opener.request_count(), 1);
    presence.unplug(SIM_PORT);

    let transition = expect_event(&mut handle, Duration::from_secs(1)).await;
    assert!(matches!(
        transition.event,
        HealthEvent::Lost {
            cause: LossCause::Removed { .. }
        }
    ));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_enumeration_failure_is_not_removal() {
    let presence = Arc::new(MockPresence::with_devices(&[SIM_PORT]));
    let watcher = PresenceWatcher::spawn(
        Arc::clone(&presence) as Arc<dyn PresenceSource>,
        Duration::from_millis(50),
    );
    let mut events = watcher.subscribe();

    tokio::time::sleep(Duration::from_millis(100)).await;
    presence.set_failing(true);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(events.try_recv().is_err());

    presence.set_failing(false);
    presence.plug("/dev/ttyUSB1");
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, PresenceEvent::Added("/dev/ttyUSB1".to_string()));

    presence.unplug(SIM_PORT);
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.path(), SIM_PORT);
    assert!(matches!(event, PresenceEvent::Removed(_)));
    watcher.stop();
}

// =============================================================================
// Reporting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_transition_json_shape() {
    let (_probe, dyn_probe) = scripted(&[ProbeStep::Ok], ProbeStep::Fail);
    let mut handle = HealthMonitor::spawn(dyn_probe, MonitorConfig::new(INTERVAL).fast(true), None);

    let alive = expect_event(&mut handle, WAIT).await;
    let lost = expect_event(&mut handle, WAIT).await;
    handle.join().await;

    let alive = serde_json::to_value(&alive).unwrap();
    assert_eq!(alive["event"], "alive");
    assert!(alive["at"].is_string());

    let lost = serde_json::to_value(&lost).unwrap();
    assert_eq!(lost["event"], "lost");
    assert_eq!(lost["cause"]["source"], "heartbeat");
    assert_eq!(lost["cause"]["failures"], 2);
}
