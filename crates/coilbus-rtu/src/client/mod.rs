// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! RTU client.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         RtuClient                               │
//! │      (register/coil access, identity, connect/reconfigure)      │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Transaction engine                           │
//! │          (encode, settle, read, classify, CRC re-read)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          SerialLink (one exclusively held port)                 │
//! └─────────────────────────────────────────────────────────────────┘
//!            │                                     │
//!            ▼                                     ▼
//! ┌─────────────────────┐             ┌─────────────────────┐
//! │   SerialPortLink    │             │  simulated devices  │
//! │   (tokio-serial)    │             │      (tests)        │
//! └─────────────────────┘             └─────────────────────┘
//! ```
//!
//! The link sits behind a mutex that is only ever *tried*. A second
//! operation issued while one is in flight fails with `LinkError::Busy`
//! instead of interleaving bytes on the wire.
//!
//! # Examples
//!
//! ```rust,ignore
//! use coilbus_rtu::client::RtuClient;
//! use coilbus_rtu::types::RtuConfig;
//!
//! let config = RtuConfig::builder().port("/dev/ttyUSB0").baud_rate(38400).build()?;
//! let client = RtuClient::serial(config)?;
//!
//! client.connect().await?;
//! let values = client.read_holding_registers(1, 2).await?;
//! ```

mod access;
mod retry;
mod rtu;
mod transaction;
mod transport;

pub use access::{Echo, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
pub use retry::{with_retry, ExponentialBackoff, LinearBackoff, RetryConfig, RetryStrategy};
pub use rtu::{list_serial_devices, SerialPortLink, SerialPortOpener};
pub use transaction::{
    classify, exchange, identify_exchange, OperationClass, TransactionRequest, TransactionResult,
    IDENTIFY_PAYLOAD, MIN_IDENTIFY_LEN, MIN_WRITE_ECHO_LEN,
};
pub use transport::{BoxedLink, LinkOpener, LinkState, SerialLink};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::error::{ProtocolError, RtuError, RtuResult};
use crate::identity::DeviceIdentity;
use crate::types::{DeviceAddress, RtuConfig, TimingConfig, DISCOVERY_BAUD_RATES};

// =============================================================================
// RtuClient
// =============================================================================

/// Client for one device on one serial port.
///
/// # Thread Safety
///
/// The client is `Send + Sync`; share it with `Arc<RtuClient>`. Only one
/// operation may use the link at a time.
pub struct RtuClient {
    /// Link configuration.
    config: RwLock<RtuConfig>,
    /// Opens the port.
    opener: Arc<dyn LinkOpener>,
    /// The open link, if any.
    link: Mutex<Option<BoxedLink>>,
    /// Link state.
    state: RwLock<LinkState>,
    /// Retry policy for opening the port.
    retry_config: RetryConfig,
    /// Client statistics.
    stats: ClientStats,
}

impl RtuClient {
    /// Creates a client that opens links through `opener`.
    pub fn new(config: RtuConfig, opener: Arc<dyn LinkOpener>) -> Self {
        Self {
            config: RwLock::new(config),
            opener,
            link: Mutex::new(None),
            state: RwLock::new(LinkState::Closed),
            retry_config: RetryConfig::default(),
            stats: ClientStats::new(),
        }
    }

    /// Creates a client for a real serial port.
    ///
    /// # Errors
    ///
    /// `OperationError::Unavailable` when this host has no serial support.
    pub fn serial(config: RtuConfig) -> RtuResult<Self> {
        let opener = SerialPortOpener::new()?;
        Ok(Self::new(config, Arc::new(opener)))
    }

    /// Sets the retry policy for opening the port.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Returns a copy of the link configuration.
    pub fn config(&self) -> RtuConfig {
        self.config.read().clone()
    }

    /// Device address requests are sent to.
    pub fn address(&self) -> DeviceAddress {
        self.config.read().address
    }

    /// Configured line speed.
    pub fn baud_rate(&self) -> u32 {
        self.config.read().baud_rate
    }

    /// Configured port path.
    pub fn port(&self) -> String {
        self.config.read().port.clone()
    }

    pub(crate) fn timing(&self) -> TimingConfig {
        self.config.read().timing.clone()
    }

    /// Returns the link state.
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Returns `true` if the link is open.
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Returns the client statistics.
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    // =========================================================================
    // Connection management
    // =========================================================================

    /// Opens the port at the configured speed.
    ///
    /// Transient open failures (port missing while a USB adapter
    /// re-enumerates) are retried per the client's [`RetryConfig`].
    pub async fn connect(&self) -> RtuResult<()> {
        let config = self.config();
        config.validate()?;

        let mut slot = self.link.try_lock().map_err(|_| RtuError::busy())?;
        if slot.is_some() {
            return Ok(());
        }

        *self.state.write() = LinkState::Opening;

        let opened = with_retry(&self.retry_config, "open", |_| {
            let opener = Arc::clone(&self.opener);
            let port = config.port.clone();
            let (baud_rate, framing) = (config.baud_rate, config.framing);
            async move { opener.open(&port, baud_rate, framing).await }
        })
        .await;

        match opened {
            Ok(link) => {
                *slot = Some(link);
                *self.state.write() = LinkState::Open;
                self.stats.record_connection();
                tracing::info!(
                    port = %config.port,
                    baud_rate = config.baud_rate,
                    address = config.address.get(),
                    "Connected"
                );
                Ok(())
            }
            Err(e) => {
                *self.state.write() = LinkState::Error;
                Err(e)
            }
        }
    }

    /// Closes the port. Closing a closed client is a no-op.
    pub async fn disconnect(&self) -> RtuResult<()> {
        let mut slot = self.link.try_lock().map_err(|_| RtuError::busy())?;
        if slot.take().is_some() {
            tracing::info!(port = %self.port(), "Disconnected");
        }
        *self.state.write() = LinkState::Closed;
        Ok(())
    }

    /// Changes the device address and/or line speed.
    ///
    /// The link is closed and, if it was open, reopened with the new
    /// settings.
    pub async fn reconfigure(
        &self,
        address: Option<DeviceAddress>,
        baud_rate: Option<u32>,
    ) -> RtuResult<()> {
        let mut candidate = self.config();
        if let Some(address) = address {
            candidate.address = address;
        }
        if let Some(baud_rate) = baud_rate {
            candidate.baud_rate = baud_rate;
        }
        // A rejected change leaves the link and configuration untouched.
        candidate.validate()?;

        let was_open = self.is_connected();
        self.disconnect().await?;
        *self.config.write() = candidate;

        if was_open {
            self.connect().await?;
        }
        Ok(())
    }

    /// Tries the standard speeds in order and keeps the first one at which
    /// the device answers the identification request.
    ///
    /// Returns the speed found. When no speed answers, the configured speed
    /// is restored and the link is left closed.
    pub async fn connect_auto_baud(&self) -> RtuResult<u32> {
        let configured = self.baud_rate();
        let result = self.search_baud_rate().await;
        if result.is_err() {
            self.config.write().baud_rate = configured;
        }
        result
    }

    async fn search_baud_rate(&self) -> RtuResult<u32> {
        for &baud_rate in DISCOVERY_BAUD_RATES {
            self.disconnect().await?;
            self.config.write().baud_rate = baud_rate;

            if let Err(e) = self.connect().await {
                tracing::debug!(baud_rate, error = %e, "Open failed during speed search");
                continue;
            }

            match self.read_identity().await {
                Ok(_) => {
                    tracing::info!(baud_rate, "Line speed detected");
                    return Ok(baud_rate);
                }
                Err(e) if e.is_busy() => return Err(e),
                Err(e) => {
                    tracing::debug!(baud_rate, error = %e, "No identification at this speed");
                }
            }
        }

        self.disconnect().await?;
        Err(ProtocolError::NoResponse.into())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Runs one exchange on the held link and records statistics.
    pub(crate) async fn transact(
        &self,
        request: &TransactionRequest,
        class: OperationClass,
    ) -> RtuResult<TransactionResult> {
        let timing = self.timing();
        let mut slot = self.link.try_lock().map_err(|_| RtuError::busy())?;
        let link = slot.as_mut().ok_or_else(RtuError::not_open)?;

        let started = Instant::now();
        let outcome = match class {
            OperationClass::Identify => identify_exchange(&mut **link, request, &timing).await,
            _ => exchange(&mut **link, request, class, &timing).await,
        };

        match &outcome {
            Ok(result) => {
                self.stats.record(result, started.elapsed());
                if class == OperationClass::Identify
                    && result.is_ok()
                    && !timing.identify_pause.is_zero()
                {
                    tokio::time::sleep(timing.identify_pause).await;
                }
            }
            Err(_) => self.stats.record_link_error(),
        }

        outcome
    }

    /// Reads and decodes the device identification.
    pub async fn read_identity(&self) -> RtuResult<DeviceIdentity> {
        let request = TransactionRequest::identify(self.address());
        let frame = self
            .transact(&request, OperationClass::Identify)
            .await?
            .into_result(request.function())?;
        Ok(DeviceIdentity::from_frame(&frame))
    }
}

impl std::fmt::Debug for RtuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config.read();
        f.debug_struct("RtuClient")
            .field("port", &config.port)
            .field("baud_rate", &config.baud_rate)
            .field("address", &config.address)
            .field("state", &*self.state.read())
            .finish()
    }
}

// =============================================================================
// ClientStats
// =============================================================================

/// Statistics for client transactions.
#[derive(Debug)]
pub struct ClientStats {
    /// Total number of transactions.
    transactions: AtomicU64,
    /// Transactions classified `Ok`.
    successes: AtomicU64,
    /// Transactions with any other outcome, link errors included.
    failures: AtomicU64,
    /// CRC failures.
    crc_errors: AtomicU64,
    /// Transactions that got no reply.
    timeouts: AtomicU64,
    /// Total response time of successful transactions in microseconds.
    total_response_time_us: AtomicU64,
    /// Number of connections established.
    connections: AtomicU64,
}

impl ClientStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self {
            transactions: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            crc_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            connections: AtomicU64::new(0),
        }
    }

    /// Records a classified transaction.
    pub fn record(&self, result: &TransactionResult, elapsed: Duration) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
        match result {
            TransactionResult::Ok(_) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.total_response_time_us
                    .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
            }
            TransactionResult::NoResponse => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            TransactionResult::CrcMismatch { .. } => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.crc_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records a transaction aborted by a link failure.
    pub fn record_link_error(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection.
    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Resets all statistics.
    pub fn reset(&self) {
        self.transactions.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.crc_errors.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.total_response_time_us.store(0, Ordering::Relaxed);
        self.connections.store(0, Ordering::Relaxed);
    }

    /// Returns the total number of transactions.
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    /// Returns the number of successful transactions.
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Returns the number of failed transactions.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the number of CRC failures.
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of unanswered transactions.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Returns the success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        let total = self.transactions();
        if total == 0 {
            return 1.0;
        }
        self.successes() as f64 / total as f64
    }

    /// Returns the average response time.
    pub fn average_response_time(&self) -> Duration {
        let success = self.successes();
        if success == 0 {
            return Duration::ZERO;
        }
        let total_us = self.total_response_time_us.load(Ordering::Relaxed);
        Duration::from_micros(total_us / success)
    }

    /// Returns the number of connections established.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

impl Default for ClientStats {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::error::LinkError;
    use crate::types::Framing;
    use async_trait::async_trait;

    /// Opener whose links answer every request with a fixed identification.
    struct EchoOpener {
        answers_at: u32,
    }

    struct IdentityLink {
        baud_rate: u32,
        answer: bool,
        pending: Option<Vec<u8>>,
    }

    #[async_trait]
    impl SerialLink for IdentityLink {
        async fn write_frame(&mut self, frame: &[u8]) -> RtuResult<()> {
            if self.answer {
                self.pending = Some(codec::encode(
                    frame[0],
                    0x11,
                    &[0x0F, 0xFF, 0x99, 0x87, 0x41, 0x77, 0x07, 0x00],
                ));
            }
            Ok(())
        }

        async fn clear_input(&mut self) -> RtuResult<()> {
            Ok(())
        }

        async fn read_response(
            &mut self,
            _budget: usize,
            _timeout: Duration,
            _gap: Duration,
        ) -> RtuResult<Vec<u8>> {
            Ok(self.pending.take().unwrap_or_default())
        }

        fn port(&self) -> &str {
            "test"
        }

        fn baud_rate(&self) -> u32 {
            self.baud_rate
        }
    }

    #[async_trait]
    impl LinkOpener for EchoOpener {
        async fn open(&self, _port: &str, baud_rate: u32, _framing: Framing) -> RtuResult<BoxedLink> {
            Ok(Box::new(IdentityLink {
                baud_rate,
                answer: baud_rate == self.answers_at,
                pending: None,
            }))
        }
    }

    struct FailingOpener;

    #[async_trait]
    impl LinkOpener for FailingOpener {
        async fn open(&self, port: &str, _baud_rate: u32, _framing: Framing) -> RtuResult<BoxedLink> {
            Err(LinkError::access_denied(port).into())
        }
    }

    fn client(answers_at: u32) -> RtuClient {
        let config = RtuConfig::builder()
            .port("test")
            .baud_rate(9600)
            .timing(TimingConfig::immediate())
            .build()
            .unwrap();
        RtuClient::new(config, Arc::new(EchoOpener { answers_at }))
    }

    #[test]
    fn test_client_stats() {
        let stats = ClientStats::new();
        let frame = codec::decode(&codec::encode(1, 3, &[2, 0, 1])).unwrap();

        stats.record(&TransactionResult::Ok(frame.clone()), Duration::from_millis(10));
        stats.record(&TransactionResult::Ok(frame), Duration::from_millis(20));
        stats.record(&TransactionResult::NoResponse, Duration::from_millis(5));
        stats.record(
            &TransactionResult::CrcMismatch {
                expected: 1,
                actual: 2,
            },
            Duration::ZERO,
        );

        assert_eq!(stats.transactions(), 4);
        assert_eq!(stats.successes(), 2);
        assert_eq!(stats.failures(), 2);
        assert_eq!(stats.timeouts(), 1);
        assert_eq!(stats.crc_errors(), 1);
        assert!((stats.success_rate() - 0.5).abs() < 0.01);
        assert_eq!(stats.average_response_time(), Duration::from_millis(15));

        stats.reset();
        assert_eq!(stats.transactions(), 0);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = client(9600);
        let err = client.read_identity().await.unwrap_err();
        assert!(matches!(err, RtuError::Link(LinkError::NotOpen)));
    }

    #[tokio::test]
    async fn test_connect_and_identify() {
        let client = client(9600);
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.stats().connections(), 1);

        let identity = client.read_identity().await.unwrap();
        assert!(identity.is_recognized());
        assert_eq!(identity.software_version.unwrap().to_string(), "V00.07");

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error_state() {
        let config = RtuConfig::builder().port("test").build().unwrap();
        let client = RtuClient::new(config, Arc::new(FailingOpener));
        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), LinkState::Error);
    }

    #[tokio::test]
    async fn test_auto_baud_finds_speed() {
        let client = client(38400);
        let found = client.connect_auto_baud().await.unwrap();
        assert_eq!(found, 38400);
        assert_eq!(client.baud_rate(), 38400);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_reconfigure_reopens() {
        let client = client(19200);
        client.connect().await.unwrap();
        client
            .reconfigure(Some(DeviceAddress::new(5).unwrap()), Some(19200))
            .await
            .unwrap();
        assert!(client.is_connected());
        assert_eq!(client.address().get(), 5);
        assert_eq!(client.baud_rate(), 19200);
        assert_eq!(client.stats().connections(), 2);
    }

    #[tokio::test]
    async fn test_auto_baud_restores_configured_speed() {
        let client = client(0);
        let err = client.connect_auto_baud().await.unwrap_err();
        assert!(matches!(err, RtuError::Protocol(ProtocolError::NoResponse)));
        assert_eq!(client.baud_rate(), 9600);
        assert!(!client.is_connected());
        assert_eq!(client.stats().connections(), DISCOVERY_BAUD_RATES.len() as u64);
    }

    #[tokio::test]
    async fn test_rejected_reconfigure_keeps_link_open() {
        let client = client(9600);
        client.connect().await.unwrap();

        let err = client.reconfigure(None, Some(12345)).await.unwrap_err();

        assert!(matches!(err, RtuError::Configuration(_)));
        assert!(client.is_connected());
        assert_eq!(client.baud_rate(), 9600);
        assert_eq!(client.stats().connections(), 1);
        assert!(client.read_identity().await.is_ok());
    }

    #[tokio::test]
    async fn test_reconfigure_rejects_bad_speed() {
        let client = client(9600);
        let err = client.reconfigure(None, Some(12345)).await.unwrap_err();
        assert!(matches!(err, RtuError::Configuration(_)));
        assert_eq!(client.baud_rate(), 9600);
    }
}
