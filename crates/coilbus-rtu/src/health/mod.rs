// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection health monitoring.
//!
//! Two sources feed one liveness signal:
//!
//! - a heartbeat that issues an identification request every interval and
//!   counts consecutive failures;
//! - an optional [`RemovalSignal`] for the device path, which declares the
//!   connection lost at once.
//!
//! ```text
//!            success                 N failures
//!  Unknown ──────────▶ Alive ───────────────────▶ Lost
//!                        ▲                          │
//!                        └──────── success ─────────┘ (Reconnected)
//! ```
//!
//! N is 2 in fast mode and 3 otherwise. A hardware removal ends the monitor.
//! While paused, ticks are skipped so an explicit operation can use the link.

mod presence;

pub use presence::{
    DevicePath, PresenceEvent, PresenceSource, PresenceWatcher, RemovalSignal, SerialPresence,
};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::RtuClient;
use crate::error::RtuResult;

/// Consecutive failures that declare the connection lost.
pub const FAILURE_THRESHOLD: u32 = 3;
/// Threshold used in fast mode.
pub const FAST_FAILURE_THRESHOLD: u32 = 2;

const MIN_INTERVAL: Duration = Duration::from_millis(100);
const MAX_INTERVAL: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 16;

// =============================================================================
// MonitorConfig
// =============================================================================

/// Heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time between heartbeats.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Use the lower failure threshold.
    #[serde(default)]
    pub fast_mode: bool,

    /// Device path to watch for removal.
    #[serde(default)]
    pub device_path: Option<DevicePath>,

    /// Poll interval of the presence watcher.
    #[serde(default = "default_presence_poll", with = "humantime_serde")]
    pub presence_poll_interval: Duration,

    /// Failures before Lost in normal mode.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failures before Lost in fast mode.
    #[serde(default = "default_fast_failure_threshold")]
    pub fast_failure_threshold: u32,
}

fn default_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_presence_poll() -> Duration {
    Duration::from_secs(1)
}

fn default_failure_threshold() -> u32 {
    FAILURE_THRESHOLD
}

fn default_fast_failure_threshold() -> u32 {
    FAST_FAILURE_THRESHOLD
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            fast_mode: false,
            device_path: None,
            presence_poll_interval: default_presence_poll(),
            failure_threshold: FAILURE_THRESHOLD,
            fast_failure_threshold: FAST_FAILURE_THRESHOLD,
        }
    }
}

impl MonitorConfig {
    /// Creates a config with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Enables fast mode.
    pub fn fast(mut self, fast_mode: bool) -> Self {
        self.fast_mode = fast_mode;
        self
    }

    /// Sets the device path watched for removal.
    pub fn with_device_path(mut self, path: impl Into<DevicePath>) -> Self {
        self.device_path = Some(path.into());
        self
    }

    /// Interval clamped to 100 ms ..= 10 s.
    pub fn effective_interval(&self) -> Duration {
        self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
    }

    /// Threshold for the given mode, never below one.
    pub fn threshold(&self, fast_mode: bool) -> u32 {
        let n = if fast_mode {
            self.fast_failure_threshold
        } else {
            self.failure_threshold
        };
        n.max(1)
    }
}

// =============================================================================
// HeartbeatProbe
// =============================================================================

/// A single liveness check.
#[async_trait]
pub trait HeartbeatProbe: Send + Sync {
    /// Returns `Ok` if the device answered.
    async fn heartbeat(&self) -> RtuResult<()>;
}

#[async_trait]
impl HeartbeatProbe for RtuClient {
    async fn heartbeat(&self) -> RtuResult<()> {
        self.read_identity().await.map(|_| ())
    }
}

#[async_trait]
impl<T: HeartbeatProbe + ?Sized> HeartbeatProbe for Arc<T> {
    async fn heartbeat(&self) -> RtuResult<()> {
        (**self).heartbeat().await
    }
}

// =============================================================================
// State and events
// =============================================================================

/// Combined liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionHealthState {
    /// No heartbeat has completed yet.
    #[default]
    Unknown,
    /// The device answers.
    Alive,
    /// The device stopped answering or was removed.
    Lost,
}

impl fmt::Display for ConnectionHealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Alive => write!(f, "alive"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// Why the connection was declared lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum LossCause {
    /// Consecutive heartbeat failures.
    Heartbeat {
        /// Failures counted.
        failures: u32,
    },
    /// The device path disappeared.
    Removed {
        /// Removed path.
        path: DevicePath,
    },
}

/// A state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HealthEvent {
    /// First successful heartbeat.
    Alive,
    /// Connection lost.
    Lost {
        /// Loss cause.
        cause: LossCause,
    },
    /// Heartbeat succeeded again after a loss.
    Reconnected,
}

impl HealthEvent {
    /// State after this event.
    pub fn state(&self) -> ConnectionHealthState {
        match self {
            Self::Alive | Self::Reconnected => ConnectionHealthState::Alive,
            Self::Lost { .. } => ConnectionHealthState::Lost,
        }
    }
}

impl fmt::Display for HealthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Lost {
                cause: LossCause::Heartbeat { failures },
            } => write!(f, "lost ({} missed heartbeats)", failures),
            Self::Lost {
                cause: LossCause::Removed { path },
            } => write!(f, "lost ({} removed)", path),
            Self::Reconnected => write!(f, "reconnected"),
        }
    }
}

/// An event with its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTransition {
    /// What happened.
    #[serde(flatten)]
    pub event: HealthEvent,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl HealthTransition {
    fn now(event: HealthEvent) -> Self {
        Self {
            event,
            at: Utc::now(),
        }
    }
}

// =============================================================================
// HealthMonitor
// =============================================================================

struct Shared {
    paused: AtomicBool,
    fast_mode: AtomicBool,
    stopped: AtomicBool,
    stop: Notify,
    state: RwLock<ConnectionHealthState>,
}

/// Heartbeat loop state.
struct Tracker {
    failures: u32,
    state: ConnectionHealthState,
}

impl Tracker {
    fn new() -> Self {
        Self {
            failures: 0,
            state: ConnectionHealthState::Unknown,
        }
    }

    fn on_success(&mut self) -> Option<HealthEvent> {
        self.failures = 0;
        let event = match self.state {
            ConnectionHealthState::Unknown => Some(HealthEvent::Alive),
            ConnectionHealthState::Lost => Some(HealthEvent::Reconnected),
            ConnectionHealthState::Alive => None,
        };
        self.state = ConnectionHealthState::Alive;
        event
    }

    fn on_failure(&mut self, threshold: u32) -> Option<HealthEvent> {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= threshold && self.state != ConnectionHealthState::Lost {
            self.state = ConnectionHealthState::Lost;
            return Some(HealthEvent::Lost {
                cause: LossCause::Heartbeat {
                    failures: self.failures,
                },
            });
        }
        None
    }
}

/// Spawns the heartbeat loop.
pub struct HealthMonitor;

impl HealthMonitor {
    /// Starts monitoring. Events arrive on the returned handle.
    pub fn spawn(
        probe: Arc<dyn HeartbeatProbe>,
        config: MonitorConfig,
        removal: Option<RemovalSignal>,
    ) -> MonitorHandle {
        let shared = Arc::new(Shared {
            paused: AtomicBool::new(false),
            fast_mode: AtomicBool::new(config.fast_mode),
            stopped: AtomicBool::new(false),
            stop: Notify::new(),
            state: RwLock::new(ConnectionHealthState::Unknown),
        });
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

        let task = tokio::spawn(run(probe, config, removal, Arc::clone(&shared), tx));

        MonitorHandle {
            events: rx,
            shared,
            task,
        }
    }
}

async fn removal_of(removal: &mut Option<RemovalSignal>) -> DevicePath {
    match removal {
        Some(signal) => signal.wait().await,
        None => std::future::pending().await,
    }
}

async fn run(
    probe: Arc<dyn HeartbeatProbe>,
    config: MonitorConfig,
    mut removal: Option<RemovalSignal>,
    shared: Arc<Shared>,
    tx: mpsc::Sender<HealthTransition>,
) {
    let interval = config.effective_interval();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tracker = Tracker::new();

    info!(
        interval_ms = interval.as_millis() as u64,
        fast_mode = config.fast_mode,
        device_path = ?config.device_path,
        "Health monitor started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shared.stop.notified() => break,
            path = removal_of(&mut removal) => {
                lose_to_removal(&shared, &tx, path).await;
                break;
            }
            _ = ticker.tick() => {}
        }

        if shared.stopped.load(Ordering::Acquire) {
            break;
        }
        if shared.paused.load(Ordering::Acquire) {
            continue;
        }

        // The removal source wins even while a heartbeat is in flight.
        let result = tokio::select! {
            biased;
            _ = shared.stop.notified() => break,
            path = removal_of(&mut removal) => {
                lose_to_removal(&shared, &tx, path).await;
                break;
            }
            result = probe.heartbeat() => result,
        };

        let event = match result {
            Ok(()) => tracker.on_success(),
            Err(e) if e.is_busy() => {
                debug!("Link busy, heartbeat skipped");
                None
            }
            Err(e) => {
                let threshold = config.threshold(shared.fast_mode.load(Ordering::Acquire));
                debug!(error = %e, failures = tracker.failures + 1, threshold, "Heartbeat failed");
                tracker.on_failure(threshold)
            }
        };

        *shared.state.write() = tracker.state;

        if let Some(event) = event {
            match &event {
                HealthEvent::Lost { .. } => warn!(event = %event, "Connection lost"),
                _ => info!(event = %event, "Connection healthy"),
            }
            if tx.send(HealthTransition::now(event)).await.is_err() {
                break;
            }
        }
    }

    info!("Health monitor stopped");
}

async fn lose_to_removal(shared: &Shared, tx: &mpsc::Sender<HealthTransition>, path: DevicePath) {
    *shared.state.write() = ConnectionHealthState::Lost;
    let event = HealthEvent::Lost {
        cause: LossCause::Removed { path },
    };
    warn!(event = %event, "Connection lost");
    let _ = tx.send(HealthTransition::now(event)).await;
}

// =============================================================================
// MonitorHandle
// =============================================================================

/// Controls a running monitor.
pub struct MonitorHandle {
    events: mpsc::Receiver<HealthTransition>,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Next transition, or `None` once the monitor has stopped.
    pub async fn next_event(&mut self) -> Option<HealthTransition> {
        self.events.recv().await
    }

    /// Suspends heartbeats so another operation can use the link.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    /// Resumes heartbeats.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    /// Returns `true` while paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Switches between the fast and normal threshold.
    pub fn set_fast_mode(&self, fast_mode: bool) {
        self.shared.fast_mode.store(fast_mode, Ordering::Release);
    }

    /// Current state.
    pub fn state(&self) -> ConnectionHealthState {
        *self.shared.state.read()
    }

    /// Asks the monitor to stop.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.stop.notify_one();
    }

    /// Returns `true` once the monitor task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the monitor and waits for it to end.
    pub async fn join(mut self) {
        self.stop();
        // Unblocks a send on a full channel.
        self.events.close();
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Health monitor task failed");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.stop.notify_one();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RtuError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Beat {
        Ok,
        Fail,
        Busy,
    }

    /// Replays a script, repeating the last entry.
    struct ScriptedProbe {
        script: Mutex<VecDeque<Beat>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(script: &[Beat]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HeartbeatProbe for ScriptedProbe {
        async fn heartbeat(&self) -> RtuResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let beat = {
                let mut script = self.script.lock();
                if script.len() > 1 {
                    script.pop_front().unwrap_or(Beat::Fail)
                } else {
                    script.front().copied().unwrap_or(Beat::Fail)
                }
            };
            match beat {
                Beat::Ok => Ok(()),
                Beat::Fail => Err(RtuError::no_response()),
                Beat::Busy => Err(RtuError::busy()),
            }
        }
    }

    fn config(fast: bool) -> MonitorConfig {
        MonitorConfig::new(Duration::from_millis(100)).fast(fast)
    }

    #[test]
    fn test_tracker_single_failure_does_not_lose() {
        let mut t = Tracker::new();
        assert_eq!(t.on_success(), Some(HealthEvent::Alive));
        assert_eq!(t.on_failure(3), None);
        assert_eq!(t.on_success(), None);
        assert_eq!(t.failures, 0);
        assert_eq!(t.state, ConnectionHealthState::Alive);
    }

    #[test]
    fn test_tracker_loses_once() {
        let mut t = Tracker::new();
        t.on_success();
        assert_eq!(t.on_failure(3), None);
        assert_eq!(t.on_failure(3), None);
        assert_eq!(
            t.on_failure(3),
            Some(HealthEvent::Lost {
                cause: LossCause::Heartbeat { failures: 3 }
            })
        );
        assert_eq!(t.on_failure(3), None);
        assert_eq!(t.on_success(), Some(HealthEvent::Reconnected));
    }

    #[test]
    fn test_config_clamps_interval() {
        assert_eq!(
            MonitorConfig::new(Duration::from_millis(1)).effective_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(
            MonitorConfig::new(Duration::from_secs(60)).effective_interval(),
            Duration::from_secs(10)
        );
        let config = MonitorConfig::default();
        assert_eq!(config.threshold(false), 3);
        assert_eq!(config.threshold(true), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_mode_loses_after_two() {
        let probe = ScriptedProbe::new(&[Beat::Ok, Beat::Fail, Beat::Fail, Beat::Fail]);
        let mut handle = HealthMonitor::spawn(probe.clone(), config(true), None);

        assert_eq!(handle.next_event().await.unwrap().event, HealthEvent::Alive);
        assert_eq!(
            handle.next_event().await.unwrap().event,
            HealthEvent::Lost {
                cause: LossCause::Heartbeat { failures: 2 }
            }
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.state(), ConnectionHealthState::Lost);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_loss() {
        let probe = ScriptedProbe::new(&[
            Beat::Ok,
            Beat::Fail,
            Beat::Fail,
            Beat::Fail,
            Beat::Fail,
            Beat::Ok,
        ]);
        let mut handle = HealthMonitor::spawn(probe, config(false), None);

        assert_eq!(handle.next_event().await.unwrap().event, HealthEvent::Alive);
        assert!(matches!(
            handle.next_event().await.unwrap().event,
            HealthEvent::Lost {
                cause: LossCause::Heartbeat { failures: 3 }
            }
        ));
        assert_eq!(
            handle.next_event().await.unwrap().event,
            HealthEvent::Reconnected
        );
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_is_not_counted() {
        let probe = ScriptedProbe::new(&[
            Beat::Ok,
            Beat::Fail,
            Beat::Busy,
            Beat::Busy,
            Beat::Fail,
            Beat::Ok,
        ]);
        let handle = HealthMonitor::spawn(probe.clone(), config(false), None);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(handle.state(), ConnectionHealthState::Alive);
        assert!(probe.calls.load(Ordering::SeqCst) >= 6);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_skips_heartbeats() {
        let probe = ScriptedProbe::new(&[Beat::Ok]);
        let mut handle = HealthMonitor::spawn(probe.clone(), config(false), None);
        assert_eq!(handle.next_event().await.unwrap().event, HealthEvent::Alive);

        handle.pause();
        let before = probe.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), before);

        handle.resume();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(probe.calls.load(Ordering::SeqCst) > before);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_monitor() {
        let probe = ScriptedProbe::new(&[Beat::Ok]);
        let mut handle = HealthMonitor::spawn(probe, config(false), None);
        assert_eq!(handle.next_event().await.unwrap().event, HealthEvent::Alive);
        handle.stop();
        assert!(handle.next_event().await.is_none());
    }

    #[test]
    fn test_transition_serializes_flat() {
        let transition = HealthTransition::now(HealthEvent::Lost {
            cause: LossCause::Removed {
                path: "/dev/ttyUSB0".into(),
            },
        });
        let json = serde_json::to_value(&transition).unwrap();
        assert_eq!(json["event"], "lost");
        assert_eq!(json["cause"]["source"], "removed");
        assert_eq!(json["cause"]["path"], "/dev/ttyUSB0");
    }
}
