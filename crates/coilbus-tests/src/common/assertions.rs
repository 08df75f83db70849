// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Domain-specific assertion helpers with informative failure messages.

use std::time::Duration;

use coilbus_rtu::error::ProtocolError;
use coilbus_rtu::{HealthEvent, HealthTransition, MonitorHandle, RtuError};

use super::mocks::RequestRecord;

// =============================================================================
// Error Assertions
// =============================================================================

/// Assertion extensions for [`RtuError`].
pub trait RtuErrorAssertions {
    /// Assert a Modbus exception with the given exception code.
    fn assert_exception(&self, code: u8);

    /// Assert the error category (`link`, `protocol`, ...).
    fn assert_category(&self, category: &str);
}

impl RtuErrorAssertions for RtuError {
    fn assert_exception(&self, code: u8) {
        match self {
            RtuError::Protocol(ProtocolError::ExceptionResponse { exception_code, .. }) => {
                assert_eq!(
                    *exception_code, code,
                    "Expected exception code {}, got {}",
                    code, exception_code
                );
            }
            other => panic!("Expected exception response {}, got {:?}", code, other),
        }
    }

    fn assert_category(&self, category: &str) {
        assert_eq!(
            self.category(),
            category,
            "Expected a {} error, got {:?}",
            category,
            self
        );
    }
}

// =============================================================================
// Request Log Assertions
// =============================================================================

/// Assertion extensions for the simulated request log.
pub trait RequestLogAssertions {
    /// Assert the log is exactly `addresses` crossed with `speeds`,
    /// address-major.
    fn assert_address_major(&self, addresses: impl IntoIterator<Item = u8>, speeds: &[u32]);
}

impl RequestLogAssertions for [RequestRecord] {
    fn assert_address_major(&self, addresses: impl IntoIterator<Item = u8>, speeds: &[u32]) {
        let expected: Vec<(u8, u32)> = addresses
            .into_iter()
            .flat_map(|address| speeds.iter().map(move |&speed| (address, speed)))
            .collect();
        let actual: Vec<(u8, u32)> = self.iter().map(|r| (r.address, r.baud_rate)).collect();
        assert_eq!(
            actual.len(),
            expected.len(),
            "Expected {} probes, got {}",
            expected.len(),
            actual.len()
        );
        for (i, (a, e)) in actual.iter().zip(&expected).enumerate() {
            assert_eq!(a, e, "Probe {} out of order", i);
        }
    }
}

// =============================================================================
// Result Assertions
// =============================================================================

/// Assertion helper for Results.
pub trait ResultAssertions<T, E> {
    /// Assert that the result is Ok and return the value.
    fn assert_ok(self) -> T;

    /// Assert that the result is Err.
    fn assert_err(self) -> E;
}

impl<T: std::fmt::Debug, E: std::fmt::Debug> ResultAssertions<T, E> for Result<T, E> {
    fn assert_ok(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, but got Err: {:?}", e),
        }
    }

    fn assert_err(self) -> E {
        match self {
            Ok(v) => panic!("Expected Err, but got Ok: {:?}", v),
            Err(e) => e,
        }
    }
}

// =============================================================================
// Async Assertion Helpers
// =============================================================================

/// Waits for the next health transition, panicking after `timeout`.
pub async fn expect_event(handle: &mut MonitorHandle, timeout: Duration) -> HealthTransition {
    match tokio::time::timeout(timeout, handle.next_event()).await {
        Ok(Some(transition)) => transition,
        Ok(None) => panic!("Monitor stopped before the next event"),
        Err(_) => panic!("No health event within {:?}", timeout),
    }
}

/// Asserts that no transition arrives within `window`.
pub async fn expect_no_event(handle: &mut MonitorHandle, window: Duration) {
    if let Ok(Some(transition)) = tokio::time::timeout(window, handle.next_event()).await {
        panic!("Unexpected health event {}", transition.event);
    }
}

/// Waits for the next transition and asserts it is `expected`.
pub async fn expect_event_eq(handle: &mut MonitorHandle, expected: HealthEvent, timeout: Duration) {
    let transition = expect_event(handle, timeout).await;
    assert_eq!(transition.event, expected);
}

/// Wait for a condition to become true within a timeout.
pub async fn wait_for<F>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

// =============================================================================
// Macro Assertions
// =============================================================================

/// Assert that an async operation completes within a timeout.
#[macro_export]
macro_rules! assert_completes_within {
    ($timeout:expr, $future:expr) => {{
        match tokio::time::timeout($timeout, $future).await {
            Ok(result) => result,
            Err(_) => panic!("Operation did not complete within {:?}", $timeout),
        }
    }};
}
