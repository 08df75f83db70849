// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # coilbus-rtu
//!
//! Modbus RTU core for a single serial-attached coil controller.
//!
//! This crate provides:
//!
//! - **Frame codec**: RTU framing with CRC-16/MODBUS
//! - **Transaction engine**: request/response with settle delays, read
//!   timeouts and response classification
//! - **Register and coil access**: FC01/03/04/05/06/15/16 with the FC03 to
//!   FC04 fallback and echo validation for writes
//! - **Device identity**: decoding of the vendor identification reply
//! - **Discovery**: exhaustive address × speed probing with cancellation
//! - **Health monitoring**: heartbeat counter combined with hardware removal
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ DiscoveryEngine  │  │    RtuClient     │  │  HealthMonitor   │
//! │  (spawned task)  │  │ (register/coil)  │  │  (spawned task)  │
//! └──────────────────┘  └──────────────────┘  └──────────────────┘
//!           │                    │                     │
//!           └────────────────────┼─────────────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Transaction engine                          │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Frame codec + SerialLink                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coilbus_rtu::{DeviceAddress, RtuClient, RtuConfig};
//!
//! let config = RtuConfig::builder()
//!     .port("/dev/ttyUSB0")
//!     .baud_rate(115200)
//!     .address(DeviceAddress::new(1)?)
//!     .build()?;
//!
//! let client = RtuClient::serial(config)?;
//! client.connect().await?;
//!
//! let identity = client.read_identity().await?;
//! println!("{}", identity);
//!
//! let block = client.read_holding_registers(1, 2).await?;
//! ```
//!
//! ## Discovery
//!
//! ```rust,ignore
//! use coilbus_rtu::{DiscoveryConfig, DiscoveryEngine};
//!
//! let engine = DiscoveryEngine::for_serial_ports(DiscoveryConfig::default())?;
//! let mut handle = engine.spawn("/dev/ttyUSB0");
//! while let Some(progress) = handle.next_progress().await {
//!     println!("{:.0}%", progress.percent());
//! }
//! let outcome = handle.join().await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod client;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod health;
pub mod identity;
pub mod registers;
pub mod settings;
pub mod types;

// =============================================================================
// Re-exports - Error Module
// =============================================================================

pub use error::{
    // Main error type
    RtuError,
    RtuResult,
    // Error categories
    ConfigurationError,
    LinkError,
    OperationError,
    ProtocolError,
    TimeoutError,
    // Error metadata
    ErrorCode,
    ErrorSeverity,
    // Extension traits
    RtuErrorContext,
};

// =============================================================================
// Re-exports - Types and Codec
// =============================================================================

pub use codec::{crc16, Frame};
pub use types::{
    // Protocol
    DeviceAddress,
    FunctionCode,
    // Data
    CoilBlock,
    RegisterBlock,
    // Configuration
    RtuConfig,
    RtuConfigBuilder,
    TimingConfig,
    // Serial port settings
    DataBits,
    Framing,
    Parity,
    StopBits,
    DISCOVERY_BAUD_RATES,
    SUPPORTED_BAUD_RATES,
};

// =============================================================================
// Re-exports - Client Module
// =============================================================================

pub use client::{
    // Client
    ClientStats,
    RtuClient,
    // Transport
    LinkOpener,
    LinkState,
    SerialLink,
    SerialPortOpener,
    // Transactions
    OperationClass,
    TransactionRequest,
    TransactionResult,
    // Retry
    RetryConfig,
    RetryStrategy,
};

// =============================================================================
// Re-exports - Device Modules
// =============================================================================

pub use discovery::{
    CancelFlag, DiscoveryConfig, DiscoveryEngine, DiscoveryHandle, DiscoveryOutcome,
    DiscoveryState, ScanProgress, ScanResult,
};
pub use health::{
    ConnectionHealthState, HealthEvent, HealthMonitor, HealthTransition, HeartbeatProbe,
    LossCause, MonitorConfig, MonitorHandle, PresenceWatcher,
};
pub use identity::{DeviceIdentity, IoCounts, Version};
pub use registers::{CanSpeed, ModbusSpeed};
pub use settings::{apply_settings, read_settings, ApplyOutcome, ApplyStep, DeviceSettings};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
