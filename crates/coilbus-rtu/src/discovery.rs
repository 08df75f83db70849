// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device discovery by exhaustive probing.
//!
//! The search space is address × line speed. One address is tried at every
//! speed before the next address is touched:
//!
//! ```text
//!  address 1: 115200 → 57600 → 38400 → 19200 → 9600
//!  address 2: 115200 → 57600 → 38400 → 19200 → 9600
//!  ...
//!  address 200: ...                                    → Exhausted
//! ```
//!
//! Each probe opens the port at the probe's speed, sends one identification
//! request with a short timeout and closes the port again. The first valid
//! identification reply ends the scan.
//!
//! # State machine
//!
//! ```text
//!  Idle ──▶ Scanning ──┬──▶ Found
//!                      ├──▶ Exhausted
//!                      └──▶ Cancelled
//! ```
//!
//! Cancellation is cooperative and checked before every probe, so a stop
//! request takes effect within one probe timeout. Progress is reported once
//! per address through a bounded channel; a full channel drops the update
//! rather than stalling the scan.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{
    exchange, LinkOpener, OperationClass, SerialPortOpener, TransactionRequest,
    TransactionResult, MIN_IDENTIFY_LEN,
};
use crate::codec::to_hex;
use crate::error::{ConfigurationError, RtuError, RtuResult};
use crate::identity::DeviceIdentity;
use crate::types::{
    DeviceAddress, Framing, TimingConfig, DISCOVERY_BAUD_RATES, SUPPORTED_BAUD_RATES,
};

// =============================================================================
// DiscoveryConfig
// =============================================================================

/// Search space and probe timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// First address probed.
    #[serde(default = "default_first_address")]
    pub first_address: u8,

    /// Last address probed (inclusive).
    #[serde(default = "default_last_address")]
    pub last_address: u8,

    /// Speeds tried at each address, in order.
    #[serde(default = "default_baud_rates")]
    pub baud_rates: Vec<u32>,

    /// Line framing.
    #[serde(default)]
    pub framing: Framing,

    /// Probe timing (`probe_settle`, `probe_timeout`, read budget).
    #[serde(default)]
    pub timing: TimingConfig,

    /// Capacity of the progress channel.
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

fn default_first_address() -> u8 {
    1
}

fn default_last_address() -> u8 {
    200
}

fn default_baud_rates() -> Vec<u32> {
    DISCOVERY_BAUD_RATES.to_vec()
}

fn default_progress_capacity() -> usize {
    32
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            first_address: default_first_address(),
            last_address: default_last_address(),
            baud_rates: default_baud_rates(),
            framing: Framing::default(),
            timing: TimingConfig::default(),
            progress_capacity: default_progress_capacity(),
        }
    }
}

impl DiscoveryConfig {
    /// Validates this configuration.
    pub fn validate(&self) -> RtuResult<()> {
        DeviceAddress::new(self.first_address)?;
        DeviceAddress::new(self.last_address)?;
        if self.first_address > self.last_address {
            return Err(ConfigurationError::missing_field("first_address <= last_address").into());
        }
        if self.baud_rates.is_empty() {
            return Err(ConfigurationError::missing_field("baud_rates").into());
        }
        if let Some(&baud_rate) = self
            .baud_rates
            .iter()
            .find(|b| !SUPPORTED_BAUD_RATES.contains(b))
        {
            return Err(ConfigurationError::InvalidBaudRate { baud_rate }.into());
        }
        if self.progress_capacity == 0 {
            return Err(ConfigurationError::missing_field("progress_capacity > 0").into());
        }
        self.timing.validate()
    }

    /// Number of addresses in the search space.
    pub fn address_count(&self) -> u32 {
        u32::from(self.last_address.saturating_sub(self.first_address)) + 1
    }

    /// Number of probes in the full search space.
    pub fn probe_count(&self) -> u32 {
        self.address_count() * self.baud_rates.len() as u32
    }
}

// =============================================================================
// CancelFlag
// =============================================================================

/// Cooperative cancellation flag shared between a scan and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Progress / Result / State
// =============================================================================

/// Progress after one address has been tried at every speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    /// The address just finished.
    pub address: u8,
    /// Addresses finished so far.
    pub addresses_done: u32,
    /// Addresses in the search space.
    pub addresses_total: u32,
    /// Probes sent so far.
    pub probes: u32,
}

impl ScanProgress {
    /// Completion in percent.
    pub fn percent(&self) -> u8 {
        if self.addresses_total == 0 {
            return 100;
        }
        ((self.addresses_done * 100) / self.addresses_total).min(100) as u8
    }
}

/// The device found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// Device address.
    pub address: DeviceAddress,
    /// Line speed.
    pub baud_rate: u32,
    /// The identification reply, CRC included.
    pub response: Vec<u8>,
    /// When the device answered.
    pub found_at: DateTime<Utc>,
}

impl ScanResult {
    /// Reply as `XX XX ..`.
    pub fn hex(&self) -> String {
        to_hex(&self.response)
    }

    /// Decodes the identification reply.
    pub fn identity(&self) -> DeviceIdentity {
        let body_len = self.response.len().saturating_sub(2);
        let mut identity = DeviceIdentity::decode(&self.response[..body_len]);
        identity.raw = self.response.clone();
        identity
    }
}

/// State of a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DiscoveryState {
    /// Not started.
    #[default]
    Idle,
    /// Probing.
    Scanning,
    /// A device answered.
    Found,
    /// Every combination was tried without an answer.
    Exhausted,
    /// Stopped on request.
    Cancelled,
}

impl DiscoveryState {
    /// Returns `true` for the three final states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Found | Self::Exhausted | Self::Cancelled)
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Found => "found",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// A device answered.
    Found(ScanResult),
    /// Nothing answered.
    Exhausted,
    /// Stopped on request.
    Cancelled,
}

impl DiscoveryOutcome {
    /// The matching final state.
    pub fn state(&self) -> DiscoveryState {
        match self {
            Self::Found(_) => DiscoveryState::Found,
            Self::Exhausted => DiscoveryState::Exhausted,
            Self::Cancelled => DiscoveryState::Cancelled,
        }
    }

    /// The scan result, if a device was found.
    pub fn found(&self) -> Option<&ScanResult> {
        match self {
            Self::Found(result) => Some(result),
            _ => None,
        }
    }
}

// =============================================================================
// DiscoveryEngine
// =============================================================================

/// Probes a port for the controller.
pub struct DiscoveryEngine {
    opener: Arc<dyn LinkOpener>,
    config: DiscoveryConfig,
    state: Arc<RwLock<DiscoveryState>>,
}

impl DiscoveryEngine {
    /// Creates an engine that opens links through `opener`.
    pub fn new(opener: Arc<dyn LinkOpener>, config: DiscoveryConfig) -> RtuResult<Self> {
        config.validate()?;
        Ok(Self {
            opener,
            config,
            state: Arc::new(RwLock::new(DiscoveryState::Idle)),
        })
    }

    /// Creates an engine for real serial ports.
    ///
    /// # Errors
    ///
    /// `OperationError::Unavailable` when this host cannot enumerate serial
    /// ports.
    pub fn for_serial_ports(config: DiscoveryConfig) -> RtuResult<Self> {
        let opener = SerialPortOpener::new()?;
        Self::new(Arc::new(opener), config)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> DiscoveryState {
        *self.state.read()
    }

    fn set_state(&self, state: DiscoveryState) {
        *self.state.write() = state;
    }

    /// Runs the scan on the calling task.
    ///
    /// Unanswered probes, open failures and malformed replies all advance to
    /// the next combination; the scan itself cannot fail.
    pub async fn scan(
        &self,
        port: &str,
        progress: Option<&mpsc::Sender<ScanProgress>>,
        cancel: &CancelFlag,
    ) -> DiscoveryOutcome {
        self.set_state(DiscoveryState::Scanning);
        tracing::info!(
            port,
            first_address = self.config.first_address,
            last_address = self.config.last_address,
            speeds = ?self.config.baud_rates,
            "Discovery started"
        );

        let outcome = self.run(port, progress, cancel).await;

        self.set_state(outcome.state());
        match &outcome {
            DiscoveryOutcome::Found(result) => tracing::info!(
                port,
                address = result.address.get(),
                baud_rate = result.baud_rate,
                "Device found"
            ),
            DiscoveryOutcome::Exhausted => tracing::info!(port, "Discovery exhausted"),
            DiscoveryOutcome::Cancelled => tracing::info!(port, "Discovery cancelled"),
        }
        outcome
    }

    async fn run(
        &self,
        port: &str,
        progress: Option<&mpsc::Sender<ScanProgress>>,
        cancel: &CancelFlag,
    ) -> DiscoveryOutcome {
        let total = self.config.address_count();
        let mut probes = 0u32;

        for (done, raw_address) in (self.config.first_address..=self.config.last_address).enumerate() {
            let Ok(address) = DeviceAddress::new(raw_address) else {
                continue;
            };

            for &baud_rate in &self.config.baud_rates {
                if cancel.is_cancelled() {
                    return DiscoveryOutcome::Cancelled;
                }

                probes += 1;
                if let Some(response) = self.probe(port, address, baud_rate).await {
                    return DiscoveryOutcome::Found(ScanResult {
                        address,
                        baud_rate,
                        response,
                        found_at: Utc::now(),
                    });
                }
            }

            if let Some(tx) = progress {
                let update = ScanProgress {
                    address: raw_address,
                    addresses_done: done as u32 + 1,
                    addresses_total: total,
                    probes,
                };
                if tx.try_send(update).is_err() {
                    tracing::trace!(address = raw_address, "Progress update dropped");
                }
            }
        }

        DiscoveryOutcome::Exhausted
    }

    /// One probe: open, identify, close. Returns the reply on success.
    async fn probe(&self, port: &str, address: DeviceAddress, baud_rate: u32) -> Option<Vec<u8>> {
        let mut link = match self.opener.open(port, baud_rate, self.config.framing).await {
            Ok(link) => link,
            Err(e) => {
                tracing::trace!(port, baud_rate, error = %e, "Probe open failed");
                return None;
            }
        };

        let request = TransactionRequest::identify(address);
        let result = exchange(
            &mut *link,
            &request,
            OperationClass::Probe,
            &self.config.timing,
        )
        .await;
        drop(link);

        match result {
            Ok(result) => match result.require_len(MIN_IDENTIFY_LEN) {
                TransactionResult::Ok(frame) => Some(frame.into_raw()),
                other => {
                    tracing::trace!(
                        address = address.get(),
                        baud_rate,
                        outcome = other.label(),
                        "Probe unanswered"
                    );
                    None
                }
            },
            Err(e) => {
                tracing::trace!(address = address.get(), baud_rate, error = %e, "Probe failed");
                None
            }
        }
    }

    /// Runs the scan on a new task.
    pub fn spawn(self, port: impl Into<String>) -> DiscoveryHandle {
        let port = port.into();
        let cancel = CancelFlag::new();
        let (tx, rx) = mpsc::channel(self.config.progress_capacity);
        let state = Arc::clone(&self.state);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { self.scan(&port, Some(&tx), &task_cancel).await });

        DiscoveryHandle {
            progress: rx,
            cancel,
            state,
            task,
        }
    }
}

impl fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// DiscoveryHandle
// =============================================================================

/// Owner's side of a spawned scan.
#[derive(Debug)]
pub struct DiscoveryHandle {
    progress: mpsc::Receiver<ScanProgress>,
    cancel: CancelFlag,
    state: Arc<RwLock<DiscoveryState>>,
    task: JoinHandle<DiscoveryOutcome>,
}

impl DiscoveryHandle {
    /// Waits for the next progress update. `None` once the scan ended and
    /// every update was received.
    pub async fn next_progress(&mut self) -> Option<ScanProgress> {
        self.progress.recv().await
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the cancellation flag, e.g. for a signal handler.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Current state of the scan.
    pub fn state(&self) -> DiscoveryState {
        *self.state.read()
    }

    /// Returns `true` once the scan task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the scan to end.
    ///
    /// # Errors
    ///
    /// `OperationError::Cancelled` if the task was aborted or panicked.
    pub async fn join(self) -> RtuResult<DiscoveryOutcome> {
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "Discovery task failed");
            RtuError::cancelled()
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
