// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Abstract serial link layer.
//!
//! This module defines the [`SerialLink`] trait for one opened half-duplex
//! port and the [`LinkOpener`] trait that opens links at a given speed.
//! Discovery opens a fresh link per probe, so opening is its own seam.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::RtuResult;
use crate::types::Framing;

// =============================================================================
// LinkState
// =============================================================================

/// State of the client's serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// No port is open.
    #[default]
    Closed,
    /// The port is being opened.
    Opening,
    /// The port is open and ready.
    Open,
    /// The last open attempt failed.
    Error,
}

impl LinkState {
    /// Returns `true` if the link is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// SerialLink Trait
// =============================================================================

/// One opened serial port.
///
/// A link is exclusively owned: it is never shared between two in-flight
/// exchanges.
///
/// # Implementors
///
/// - [`SerialPortLink`](super::rtu::SerialPortLink): `tokio-serial` port
/// - simulated devices in tests
#[async_trait]
pub trait SerialLink: Send {
    /// Writes a complete frame and flushes it onto the wire.
    async fn write_frame(&mut self, frame: &[u8]) -> RtuResult<()>;

    /// Discards any unread input.
    async fn clear_input(&mut self) -> RtuResult<()>;

    /// Reads one response.
    ///
    /// Waits up to `timeout` for the first byte, then keeps reading until
    /// `budget` bytes arrived or the line stays silent for `gap`. Returns an
    /// empty buffer when nothing arrived.
    async fn read_response(
        &mut self,
        budget: usize,
        timeout: Duration,
        gap: Duration,
    ) -> RtuResult<Vec<u8>>;

    /// Port path.
    fn port(&self) -> &str;

    /// Line speed the link was opened at.
    fn baud_rate(&self) -> u32;
}

/// A boxed, type-erased link.
pub type BoxedLink = Box<dyn SerialLink>;

// =============================================================================
// LinkOpener Trait
// =============================================================================

/// Opens serial links.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Opens `port` at `baud_rate` with the given framing.
    ///
    /// # Errors
    ///
    /// Returns a link error if the port cannot be opened.
    async fn open(&self, port: &str, baud_rate: u32, framing: Framing) -> RtuResult<BoxedLink>;
}

// =============================================================================
// Tests
// =============================================================================
