// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial device presence tracking.
//!
//! The watcher polls the list of serial devices and publishes the
//! difference between consecutive snapshots. A [`RemovalSignal`] resolves
//! once a particular device path disappears.
//!
//! Enumeration is synchronous and runs on the blocking pool.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::list_serial_devices;
use crate::error::{OperationError, RtuError, RtuResult};

/// Operating-system path of a serial device.
pub type DevicePath = String;

const EVENT_CAPACITY: usize = 64;

/// Source of the currently attached serial devices.
pub trait PresenceSource: Send + Sync {
    /// Lists the attached devices.
    fn list_serial_devices(&self) -> RtuResult<Vec<DevicePath>>;
}

/// Presence source backed by the operating system's port enumeration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPresence;

impl PresenceSource for SerialPresence {
    fn list_serial_devices(&self) -> RtuResult<Vec<DevicePath>> {
        list_serial_devices()
    }
}

/// Lists `source` on the blocking pool.
async fn snapshot(source: &Arc<dyn PresenceSource>) -> RtuResult<BTreeSet<DevicePath>> {
    let source = Arc::clone(source);
    match tokio::task::spawn_blocking(move || source.list_serial_devices()).await {
        Ok(list) => list.map(|devices| devices.into_iter().collect()),
        Err(e) => Err(RtuError::operation(OperationError::unavailable(
            "serial enumeration",
            e.to_string(),
        ))),
    }
}

/// A change in the set of attached devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A device appeared.
    Added(DevicePath),
    /// A device disappeared.
    Removed(DevicePath),
}

impl PresenceEvent {
    /// Path the event refers to.
    pub fn path(&self) -> &str {
        match self {
            Self::Added(p) | Self::Removed(p) => p,
        }
    }
}

/// Background poller publishing [`PresenceEvent`]s.
pub struct PresenceWatcher {
    source: Arc<dyn PresenceSource>,
    events: broadcast::Sender<PresenceEvent>,
    task: JoinHandle<()>,
}

impl PresenceWatcher {
    /// Starts polling `source` every `poll_interval`.
    ///
    /// The first snapshot is the baseline; devices present at start are not
    /// reported as added.
    pub fn spawn(source: Arc<dyn PresenceSource>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tx = events.clone();
        let poll_source = Arc::clone(&source);

        let task = tokio::spawn(async move {
            let mut known: Option<BTreeSet<DevicePath>> = None;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let current = match snapshot(&poll_source).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(error = %e, "Device enumeration failed, keeping previous snapshot");
                        continue;
                    }
                };

                if let Some(previous) = &known {
                    for path in previous.difference(&current) {
                        info!(path = %path, "Serial device removed");
                        let _ = tx.send(PresenceEvent::Removed(path.clone()));
                    }
                    for path in current.difference(previous) {
                        debug!(path = %path, "Serial device added");
                        let _ = tx.send(PresenceEvent::Added(path.clone()));
                    }
                }
                known = Some(current);
            }
        });

        Self {
            source,
            events,
            task,
        }
    }

    /// Subscribes to subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Signal that resolves when `path` is removed.
    ///
    /// A path that is already gone when the signal is first awaited counts
    /// as removed.
    pub fn device_removed_event(&self, path: impl Into<DevicePath>) -> RemovalSignal {
        RemovalSignal {
            rx: self.subscribe(),
            path: path.into(),
            source: Arc::clone(&self.source),
            verify: true,
        }
    }

    /// Stops polling.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Returns `true` once the polling task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PresenceWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Resolves when a specific device is removed.
pub struct RemovalSignal {
    rx: broadcast::Receiver<PresenceEvent>,
    path: DevicePath,
    source: Arc<dyn PresenceSource>,
    // Set until the device list has been checked directly, and again after
    // a lag may have dropped the removal.
    verify: bool,
}

impl std::fmt::Debug for RemovalSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalSignal")
            .field("path", &self.path)
            .field("verify", &self.verify)
            .finish()
    }
}

impl RemovalSignal {
    /// Watched path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the removal and returns the removed path.
    ///
    /// Never resolves if the watcher stops first.
    pub async fn wait(&mut self) -> DevicePath {
        loop {
            if self.verify {
                let listed = snapshot(&self.source).await;
                self.verify = false;
                match listed {
                    Ok(devices) if !devices.contains(&self.path) => {
                        info!(path = %self.path, "Serial device no longer listed");
                        return self.path.clone();
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, path = %self.path, "Presence check failed"),
                }
            }

            match self.rx.recv().await {
                Ok(PresenceEvent::Removed(p)) if p == self.path => return p,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, path = %self.path, "Presence events lagged, rechecking device list");
                    self.verify = true;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Returns a scripted sequence of snapshots, repeating the last one.
    struct ScriptedPresence {
        snapshots: Mutex<Vec<Vec<DevicePath>>>,
    }

    impl ScriptedPresence {
        fn new(snapshots: Vec<Vec<&str>>) -> Arc<Self> {
            let mut snapshots: Vec<Vec<DevicePath>> = snapshots
                .into_iter()
                .map(|s| s.into_iter().map(String::from).collect())
                .collect();
            snapshots.reverse();
            Arc::new(Self {
                snapshots: Mutex::new(snapshots),
            })
        }
    }

    impl PresenceSource for ScriptedPresence {
        fn list_serial_devices(&self) -> RtuResult<Vec<DevicePath>> {
            let mut snapshots = self.snapshots.lock();
            if snapshots.len() > 1 {
                Ok(snapshots.pop().unwrap_or_default())
            } else {
                Ok(snapshots.last().cloned().unwrap_or_default())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_added_and_removed() {
        let source = ScriptedPresence::new(vec![
            vec!["/dev/ttyUSB0"],
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1"],
            vec!["/dev/ttyUSB1"],
        ]);
        let watcher = PresenceWatcher::spawn(source, Duration::from_millis(100));
        let mut rx = watcher.subscribe();

        assert_eq!(
            rx.recv().await.unwrap(),
            PresenceEvent::Added("/dev/ttyUSB1".into())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            PresenceEvent::Removed("/dev/ttyUSB0".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_signal_matches_path() {
        let source = ScriptedPresence::new(vec![
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1"],
            vec!["/dev/ttyUSB0"],
            vec![],
        ]);
        let watcher = PresenceWatcher::spawn(source, Duration::from_millis(100));
        let mut signal = watcher.device_removed_event("/dev/ttyUSB0");

        assert_eq!(signal.wait().await, "/dev/ttyUSB0");
    }

    /// Device list set directly by the test.
    struct SwitchedPresence {
        devices: Mutex<Vec<DevicePath>>,
    }

    impl SwitchedPresence {
        fn new(devices: &[&str]) -> Arc<Self> {
            let source = Arc::new(Self {
                devices: Mutex::new(Vec::new()),
            });
            source.set(devices);
            source
        }

        fn set(&self, devices: &[&str]) {
            *self.devices.lock() = devices.iter().map(|d| d.to_string()).collect();
        }
    }

    impl PresenceSource for SwitchedPresence {
        fn list_serial_devices(&self) -> RtuResult<Vec<DevicePath>> {
            Ok(self.devices.lock().clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_gone_before_first_poll() {
        let source = ScriptedPresence::new(vec![vec![]]);
        let watcher = PresenceWatcher::spawn(source, Duration::from_millis(100));
        let mut signal = watcher.device_removed_event("/dev/ttyUSB0");

        let path = tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("absent device counts as removed");
        assert_eq!(path, "/dev/ttyUSB0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_found_after_lag() {
        let source = SwitchedPresence::new(&["/dev/ttyUSB0"]);
        let watcher = PresenceWatcher::spawn(
            Arc::clone(&source) as Arc<dyn PresenceSource>,
            Duration::from_millis(100),
        );
        let mut signal = watcher.device_removed_event("/dev/ttyUSB0");

        // Device is present: the first wait checks the list and then blocks.
        assert!(tokio::time::timeout(Duration::from_millis(50), signal.wait())
            .await
            .is_err());

        source.set(&[]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Enough additions to push the removal out of the channel.
        let others: Vec<String> = (0..EVENT_CAPACITY + 8)
            .map(|i| format!("/dev/ttyACM{}", i))
            .collect();
        let others: Vec<&str> = others.iter().map(String::as_str).collect();
        source.set(&others);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let path = tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("removal recovered after lag");
        assert_eq!(path, "/dev/ttyUSB0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_device_keeps_signal_pending() {
        let source = SwitchedPresence::new(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        let watcher = PresenceWatcher::spawn(
            Arc::clone(&source) as Arc<dyn PresenceSource>,
            Duration::from_millis(100),
        );
        let mut signal = watcher.device_removed_event("/dev/ttyUSB0");

        source.set(&["/dev/ttyUSB0"]);
        assert!(tokio::time::timeout(Duration::from_millis(500), signal.wait())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_task() {
        let source = ScriptedPresence::new(vec![vec![]]);
        let watcher = PresenceWatcher::spawn(source, Duration::from_millis(100));
        watcher.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(watcher.is_finished());
    }
}
