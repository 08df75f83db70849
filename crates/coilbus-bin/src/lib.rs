// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # coilbus-bin
//!
//! Command-line front end for serial coil controllers.
//!
//! This crate wires [`coilbus_rtu`] into a CLI:
//!
//! - CLI argument parsing with clap
//! - Layered configuration (file, `${VAR}` placeholders, environment, flags)
//! - Logging initialization
//! - Ctrl-C handling for long-running commands (`scan`, `monitor`)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   main.rs                    │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                 ┌──────▼──────┐
//!                 │   cli.rs    │──────┐
//!                 └──────┬──────┘      │
//!                        │       ┌─────▼─────┐
//!            ┌───────────┼───────│ config.rs │
//!            ▼           ▼       └───────────┘
//!     ┌──────────┐ ┌──────────┐
//!     │ commands │ │ logging  │
//!     └────┬─────┘ └──────────┘
//!          │   ┌──────────┐
//!          ├───│ shutdown │
//!          │   └──────────┘
//!   ┌──────▼──────┐
//!   │ coilbus-rtu │
//!   └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Find the controller on a port
//! coilbus -p /dev/ttyUSB0 scan
//!
//! # Read the identification block
//! coilbus -p /dev/ttyUSB0 -a 7 -b 38400 identify
//!
//! # Switch coils 0..2
//! coilbus -p /dev/ttyUSB0 coils write 0 1,0,1
//!
//! # Watch the connection
//! coilbus -c coilbus.toml monitor --fast
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use crate::config::{CoilbusConfig, ConfigLoader};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use shutdown::ShutdownCoordinator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
