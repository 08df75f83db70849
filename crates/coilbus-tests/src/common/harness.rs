// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Wires a [`SimulatedDevice`] to a client and bounds every test with a
//! timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coilbus_rtu::{
    DiscoveryConfig, DiscoveryEngine, HealthMonitor, HeartbeatProbe, LinkOpener, MonitorConfig,
    MonitorHandle, RtuClient,
};

use super::fixtures::{rtu_config, SIM_PORT};
use super::mocks::{SimulatedDevice, SimulatedOpener};

// =============================================================================
// Harness Configuration
// =============================================================================

/// Configuration for the bus harness.
#[derive(Debug, Clone)]
pub struct BusHarnessConfig {
    /// Name of the test, used in logs.
    pub test_name: String,

    /// Timeout for the whole test.
    pub timeout: Duration,

    /// Address the client talks to. Defaults to the device's.
    pub client_address: Option<u8>,

    /// Speed the client opens at. Defaults to the device's.
    pub client_baud_rate: Option<u32>,
}

impl Default for BusHarnessConfig {
    fn default() -> Self {
        Self {
            test_name: "unknown_test".to_string(),
            timeout: Duration::from_secs(30),
            client_address: None,
            client_baud_rate: None,
        }
    }
}

impl BusHarnessConfig {
    /// Creates a config with a test name.
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            ..Default::default()
        }
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Talks to `address` instead of the device's address.
    pub fn client_address(mut self, address: u8) -> Self {
        self.client_address = Some(address);
        self
    }

    /// Opens at `baud_rate` instead of the device's speed.
    pub fn client_baud_rate(mut self, baud_rate: u32) -> Self {
        self.client_baud_rate = Some(baud_rate);
        self
    }
}

// =============================================================================
// Bus Harness
// =============================================================================

/// A client and a simulated device on one bus.
pub struct BusHarness {
    config: BusHarnessConfig,

    /// The device on the bus.
    pub device: SimulatedDevice,

    /// Opener shared by the client and any discovery engine.
    pub opener: Arc<SimulatedOpener>,

    /// Client for the device.
    pub client: Arc<RtuClient>,
}

impl BusHarness {
    /// Creates a harness around `device`.
    pub fn new(device: SimulatedDevice, config: BusHarnessConfig) -> Self {
        super::init_test_logging();

        let opener = Arc::new(SimulatedOpener::new(device.clone()));
        let client_config = rtu_config(
            config.client_address.unwrap_or_else(|| device.address()),
            config.client_baud_rate.unwrap_or_else(|| device.baud_rate()),
        );
        let client = Arc::new(RtuClient::new(
            client_config,
            Arc::clone(&opener) as Arc<dyn LinkOpener>,
        ));

        Self {
            config,
            device,
            opener,
            client,
        }
    }

    /// Creates a harness with default settings.
    pub fn with_device(device: SimulatedDevice) -> Self {
        Self::new(device, BusHarnessConfig::default())
    }

    /// Creates a harness and opens the client's link.
    pub async fn connected(device: SimulatedDevice) -> Self {
        let harness = Self::with_device(device);
        harness
            .client
            .connect()
            .await
            .expect("simulated link opens");
        harness
    }

    /// A discovery engine scanning the same bus.
    pub fn discovery(&self, config: DiscoveryConfig) -> DiscoveryEngine {
        DiscoveryEngine::new(Arc::clone(&self.opener) as Arc<dyn LinkOpener>, config)
            .expect("discovery config is valid")
    }

    /// A health monitor probing the device through the client.
    pub fn monitor(&self, config: MonitorConfig) -> MonitorHandle {
        HealthMonitor::spawn(Arc::clone(&self.client) as Arc<dyn HeartbeatProbe>, config, None)
    }

    /// Port the simulated links report.
    pub fn port(&self) -> &'static str {
        SIM_PORT
    }

    /// Runs `test_fn`, failing the test if it outlives the timeout.
    pub async fn run<F, Fut, T>(&self, test_fn: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, test_fn()).await {
            Ok(value) => value,
            Err(_) => panic!("{} timed out after {:?}", self.config.test_name, timeout),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
