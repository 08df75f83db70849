// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial port link over `tokio-serial`.
//!
//! # Example
//!
//! ```rust,ignore
//! use coilbus_rtu::client::{LinkOpener, SerialPortOpener};
//! use coilbus_rtu::types::Framing;
//!
//! let opener = SerialPortOpener::new()?;
//! let mut link = opener.open("/dev/ttyUSB0", 38400, Framing::default()).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{
    ClearBuffer, DataBits as SerialDataBits, Parity as SerialParity, SerialPort,
    SerialPortBuilderExt, SerialStream, StopBits as SerialStopBits,
};

use crate::error::{LinkError, OperationError, RtuError, RtuResult};
use crate::types::{DataBits, Framing, Parity, StopBits};

use super::transport::{BoxedLink, LinkOpener, SerialLink};

// =============================================================================
// Port enumeration
// =============================================================================

/// Lists the serial device paths currently present on this host.
pub fn list_serial_devices() -> RtuResult<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(|e| {
        RtuError::operation(OperationError::unavailable(
            "serial port enumeration",
            e.to_string(),
        ))
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

// =============================================================================
// SerialPortLink
// =============================================================================

/// A serial port opened through `tokio-serial`.
pub struct SerialPortLink {
    stream: SerialStream,
    port: String,
    baud_rate: u32,
}

impl SerialPortLink {
    /// Converts DataBits to tokio-serial DataBits.
    fn convert_data_bits(bits: DataBits) -> SerialDataBits {
        match bits {
            DataBits::Seven => SerialDataBits::Seven,
            DataBits::Eight => SerialDataBits::Eight,
        }
    }

    /// Converts Parity to tokio-serial Parity.
    fn convert_parity(parity: Parity) -> SerialParity {
        match parity {
            Parity::None => SerialParity::None,
            Parity::Odd => SerialParity::Odd,
            Parity::Even => SerialParity::Even,
        }
    }

    /// Converts StopBits to tokio-serial StopBits.
    fn convert_stop_bits(bits: StopBits) -> SerialStopBits {
        match bits {
            StopBits::One => SerialStopBits::One,
            StopBits::Two => SerialStopBits::Two,
        }
    }

    /// Opens `port` at `baud_rate`.
    pub fn open(port: &str, baud_rate: u32, framing: Framing) -> RtuResult<Self> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(Self::convert_data_bits(framing.data_bits))
            .parity(Self::convert_parity(framing.parity))
            .stop_bits(Self::convert_stop_bits(framing.stop_bits))
            .open_native_async()
            .map_err(|e| RtuError::link(map_open_error(port, e)))?;

        tracing::debug!(port = %port, baud_rate, framing = %framing, "Serial port opened");

        Ok(Self {
            stream,
            port: port.to_string(),
            baud_rate,
        })
    }
}

fn map_open_error(port: &str, e: tokio_serial::Error) -> LinkError {
    match e.kind {
        tokio_serial::ErrorKind::NoDevice => LinkError::not_found(port),
        tokio_serial::ErrorKind::InvalidInput => LinkError::Configuration {
            port: port.to_string(),
            message: e.to_string(),
        },
        tokio_serial::ErrorKind::Io(io_kind) => match io_kind {
            std::io::ErrorKind::PermissionDenied => LinkError::access_denied(port),
            std::io::ErrorKind::NotFound => LinkError::not_found(port),
            _ => LinkError::unavailable(port, e.to_string()),
        },
        _ => LinkError::unavailable(port, e.to_string()),
    }
}

#[async_trait]
impl SerialLink for SerialPortLink {
    async fn write_frame(&mut self, frame: &[u8]) -> RtuResult<()> {
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| LinkError::io(format!("write to {}", self.port), e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| LinkError::io(format!("flush {}", self.port), e))?;
        Ok(())
    }

    async fn clear_input(&mut self) -> RtuResult<()> {
        self.stream.clear(ClearBuffer::Input).map_err(|e| {
            RtuError::link(LinkError::unavailable(&self.port, e.to_string()))
        })
    }

    async fn read_response(
        &mut self,
        budget: usize,
        first_byte_timeout: Duration,
        gap: Duration,
    ) -> RtuResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(budget);
        let mut chunk = [0u8; 64];
        let mut wait = first_byte_timeout;

        while buf.len() < budget {
            let want = (budget - buf.len()).min(chunk.len());
            match timeout(wait, self.stream.read(&mut chunk[..want])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    buf.extend_from_slice(&chunk[..n]);
                    wait = gap;
                }
                Ok(Err(e)) => {
                    return Err(LinkError::io(format!("read from {}", self.port), e).into())
                }
                Err(_) => break,
            }
        }

        Ok(buf)
    }

    fn port(&self) -> &str {
        &self.port
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl std::fmt::Debug for SerialPortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortLink")
            .field("port", &self.port)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}

// =============================================================================
// SerialPortOpener
// =============================================================================

/// Opens real serial ports.
#[derive(Debug, Clone, Default)]
pub struct SerialPortOpener {
    _private: (),
}

impl SerialPortOpener {
    /// Creates an opener after checking that serial ports can be enumerated
    /// on this host.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::Unavailable` when the platform offers no
    /// serial port support.
    pub fn new() -> RtuResult<Self> {
        list_serial_devices()?;
        Ok(Self { _private: () })
    }
}

#[async_trait]
impl LinkOpener for SerialPortOpener {
    async fn open(&self, port: &str, baud_rate: u32, framing: Framing) -> RtuResult<BoxedLink> {
        let link = SerialPortLink::open(port, baud_rate, framing)?;
        Ok(Box::new(link))
    }
}

// =============================================================================
// Tests
// =============================================================================
