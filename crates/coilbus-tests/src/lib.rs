// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # coilbus integration tests
//!
//! Simulated hardware and end-to-end tests for `coilbus-rtu`. Nothing here
//! needs a serial port: [`common::SimulatedDevice`] answers real RTU frames
//! through the crate's `LinkOpener` seam.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p coilbus-tests
//!
//! # One suite
//! cargo test -p coilbus-tests --test integration_discovery
//!
//! # With client logs
//! RUST_LOG=coilbus_rtu=trace cargo test -p coilbus-tests -- --nocapture
//! ```
//!
//! ## Suites
//!
//! - `integration_codec`: CRC vectors, framing, identity decoding
//! - `integration_access`: register and coil access, exceptions, settings
//! - `integration_discovery`: scan order, progress, cancellation
//! - `integration_health`: heartbeat thresholds, reconnect, removal
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use coilbus_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = BusHarness::connected(SimulatedDevice::new(7, 38400)).await;
//!     let block = harness.client.read_registers(1, 2).await.assert_ok();
//!     assert_eq!(block.len(), 2);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
}
