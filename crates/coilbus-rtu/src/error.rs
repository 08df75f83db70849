// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the RTU core with diagnostics.
//!
//! The hierarchy keeps link failures, wire-protocol violations and
//! operation-level problems apart so callers can decide what is worth
//! retrying and what must surface to the operator.
//!
//! # Error Categories
//!
//! ```text
//! RtuError
//! ├── Link          - serial port open/read/write, ownership violations
//! ├── Protocol      - framing, CRC, address, exception responses
//! ├── Operation     - invalid requests, cancellation, missing capabilities
//! ├── Configuration - invalid settings
//! └── Timeout       - stalled writes and reads
//! ```
//!
//! # Examples
//!
//! ```
//! use coilbus_rtu::error::{ProtocolError, RtuError};
//!
//! let error = RtuError::exception(0x10, 0x02);
//! assert!(!error.is_retryable());
//! assert_eq!(error.error_code().to_string(), "RTU-0202");
//! ```

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

// =============================================================================
// RtuError - Main Error Type
// =============================================================================

/// The main error type for RTU operations.
#[derive(Debug, Error)]
pub enum RtuError {
    /// Serial link errors.
    #[error("{0}")]
    Link(#[from] LinkError),

    /// Wire protocol errors (framing, CRC, exception responses).
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Operation errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl RtuError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a link error.
    #[inline]
    pub fn link(error: LinkError) -> Self {
        Self::Link(error)
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(error: ProtocolError) -> Self {
        Self::Protocol(error)
    }

    /// Creates an operation error.
    #[inline]
    pub fn operation(error: OperationError) -> Self {
        Self::Operation(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(error: TimeoutError) -> Self {
        Self::Timeout(error)
    }

    // =========================================================================
    // Convenience Factory Methods
    // =========================================================================

    /// Creates a not-open error.
    pub fn not_open() -> Self {
        Self::Link(LinkError::NotOpen)
    }

    /// Creates a link-busy error.
    pub fn busy() -> Self {
        Self::Link(LinkError::Busy)
    }

    /// Creates a no-response error.
    pub fn no_response() -> Self {
        Self::Protocol(ProtocolError::NoResponse)
    }

    /// Creates an exception response error.
    pub fn exception(function_code: u8, exception_code: u8) -> Self {
        Self::Protocol(ProtocolError::exception_response(function_code, exception_code))
    }

    /// Creates a cancellation error.
    pub fn cancelled() -> Self {
        Self::Operation(OperationError::Cancelled)
    }

    /// Creates a read timeout.
    pub fn read_timeout(duration: Duration) -> Self {
        Self::Timeout(TimeoutError::read(duration))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Link(e) => e.is_retryable(),
            Self::Protocol(e) => e.is_retryable(),
            Self::Operation(_) => false,
            Self::Timeout(_) => true,
            Self::Configuration(_) => false,
        }
    }

    /// Returns `true` if this error means the link is currently held by
    /// another operation.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Link(LinkError::Busy))
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Link(e) => e.severity(),
            Self::Protocol(e) => e.severity(),
            Self::Operation(e) => e.severity(),
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Link(_) => "link",
            Self::Protocol(_) => "protocol",
            Self::Operation(_) => "operation",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Link(e) => e.error_code(),
            Self::Protocol(e) => e.error_code(),
            Self::Operation(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Link(e) => e.recovery_hints(),
            Self::Protocol(e) => e.recovery_hints(),
            Self::Operation(e) => e.recovery_hints(),
            Self::Timeout(e) => e.recovery_hints(),
            Self::Configuration(e) => e.recovery_hints(),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let level = self.tracing_level();
        let code = self.error_code();

        match level {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// LinkError
// =============================================================================

/// Serial link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The port exists but could not be opened.
    #[error("Serial port unavailable: {port} ({reason})")]
    PortUnavailable {
        /// Port path.
        port: String,
        /// Reason reported by the driver.
        reason: String,
    },

    /// Serial port not found.
    #[error("Serial port not found: {port}")]
    PortNotFound {
        /// Port path.
        port: String,
    },

    /// Serial port access denied.
    #[error("Serial port access denied: {port}")]
    AccessDenied {
        /// Port path.
        port: String,
    },

    /// Serial port could not be configured.
    #[error("Serial port configuration failed for '{port}': {message}")]
    Configuration {
        /// Port path.
        port: String,
        /// Error message.
        message: String,
    },

    /// No link is open.
    #[error("Serial link is not open")]
    NotOpen,

    /// The link is held by another in-flight operation.
    #[error("Serial link is busy with another operation")]
    Busy,

    /// Generic I/O error.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl LinkError {
    /// Creates a port unavailable error.
    pub fn unavailable(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortUnavailable {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Creates a port not found error.
    pub fn not_found(port: impl Into<String>) -> Self {
        Self::PortNotFound { port: port.into() }
    }

    /// Creates an access denied error.
    pub fn access_denied(port: impl Into<String>) -> Self {
        Self::AccessDenied { port: port.into() }
    }

    /// Creates an I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            // A USB adapter re-enumerating after a device restart shows up
            // as a short-lived unavailable or missing port.
            Self::PortUnavailable { .. } | Self::PortNotFound { .. } => true,
            Self::Busy => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            Self::AccessDenied { .. } | Self::Configuration { .. } | Self::NotOpen => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Busy | Self::NotOpen => ErrorSeverity::Warning,
            Self::AccessDenied { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::PortUnavailable { .. } => ErrorCode::new(1, 1),
            Self::PortNotFound { .. } => ErrorCode::new(1, 2),
            Self::AccessDenied { .. } => ErrorCode::new(1, 3),
            Self::Configuration { .. } => ErrorCode::new(1, 4),
            Self::NotOpen => ErrorCode::new(1, 5),
            Self::Busy => ErrorCode::new(1, 6),
            Self::Io { .. } => ErrorCode::new(1, 7),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::PortUnavailable { .. } => vec![
                "Close other programs using the serial port",
                "Re-plug the USB adapter",
            ],
            Self::PortNotFound { .. } => vec![
                "Check that the adapter is plugged in",
                "List available ports with `coilbus ports`",
            ],
            Self::AccessDenied { .. } => vec![
                "Add the user to the 'dialout' group (Linux)",
                "Run with sufficient permissions",
            ],
            Self::Configuration { .. } => vec!["Check that the adapter supports 8N1 at this speed"],
            Self::NotOpen => vec!["Connect before issuing requests"],
            Self::Busy => vec![
                "Pause the health monitor before explicit operations",
                "Do not run discovery while other operations are active",
            ],
            Self::Io { .. } => vec!["Check cable connections", "Re-plug the USB adapter"],
        }
    }
}

impl From<io::Error> for LinkError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::PortNotFound {
                port: "unknown".to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::AccessDenied {
                port: "unknown".to_string(),
            },
            _ => Self::Io {
                message: error.to_string(),
                source: error,
            },
        }
    }
}

// =============================================================================
// ProtocolError
// =============================================================================

/// Wire-level protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No bytes arrived within the read timeout.
    #[error("No response from device")]
    NoResponse,

    /// Fewer bytes than the smallest valid frame.
    #[error("Response too short: {len} bytes")]
    ShortResponse {
        /// Number of bytes received.
        len: usize,
    },

    /// CRC check failed.
    #[error("CRC check failed: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC computed over the received bytes.
        expected: u16,
        /// CRC carried in the frame.
        actual: u16,
    },

    /// The response came from a different device address.
    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch {
        /// Requested address.
        expected: u8,
        /// Address byte of the response.
        actual: u8,
    },

    /// Modbus exception response received.
    #[error("Modbus exception: function code {function_code:#04x}, exception {exception_code} ({exception_name})")]
    ExceptionResponse {
        /// The function code that caused the exception.
        function_code: u8,
        /// The exception code.
        exception_code: u8,
        /// Human-readable exception name.
        exception_name: String,
    },

    /// Response function byte differs without the exception bit.
    #[error("Unexpected function code: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedFunction {
        /// Requested function code.
        expected: u8,
        /// Function byte of the response.
        actual: u8,
    },
}

impl ProtocolError {
    /// Creates an exception response error.
    pub fn exception_response(function_code: u8, exception_code: u8) -> Self {
        Self::ExceptionResponse {
            function_code,
            exception_code,
            exception_name: Self::exception_name(exception_code).to_string(),
        }
    }

    /// Returns the human-readable name for an exception code.
    pub fn exception_name(code: u8) -> &'static str {
        match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            _ => "Unknown Exception",
        }
    }

    /// Creates a CRC mismatch error.
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExceptionResponse { exception_code, .. } => {
                matches!(exception_code, 0x05 | 0x06)
            }
            Self::NoResponse | Self::ShortResponse { .. } | Self::CrcMismatch { .. } => true,
            _ => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ExceptionResponse { exception_code, .. } => match exception_code {
                0x05 | 0x06 => ErrorSeverity::Warning,
                0x01..=0x03 => ErrorSeverity::Error,
                _ => ErrorSeverity::Critical,
            },
            Self::NoResponse => ErrorSeverity::Info,
            Self::UnexpectedFunction { .. } => ErrorSeverity::Error,
            _ => ErrorSeverity::Warning,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ExceptionResponse { exception_code, .. } => ErrorCode::new(2, *exception_code),
            Self::NoResponse => ErrorCode::new(2, 20),
            Self::ShortResponse { .. } => ErrorCode::new(2, 21),
            Self::CrcMismatch { .. } => ErrorCode::new(2, 22),
            Self::AddressMismatch { .. } => ErrorCode::new(2, 23),
            Self::UnexpectedFunction { .. } => ErrorCode::new(2, 24),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::ExceptionResponse { exception_code, .. } => match exception_code {
                0x01 => vec!["The function code is not supported by this device"],
                0x02 => vec![
                    "The register address is out of range",
                    "Check the device register map",
                ],
                0x03 => vec!["The value is not valid for this register"],
                0x04 => vec!["Power cycle the device if the problem persists"],
                0x06 => vec!["The device is busy, retry after a delay"],
                _ => vec!["Check device status"],
            },
            Self::NoResponse => vec![
                "Verify the device address and line speed",
                "Run discovery to find the device",
            ],
            Self::CrcMismatch { .. } | Self::ShortResponse { .. } => vec![
                "Check serial cable connections and termination",
                "Reduce the line speed if errors persist",
            ],
            Self::AddressMismatch { .. } => {
                vec!["Another device on the bus answered, check for address conflicts"]
            }
            _ => vec!["Check protocol configuration"],
        }
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Operation-level errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A write request carried no values.
    #[error("Nothing to write at address {address}")]
    EmptyWrite {
        /// Start address.
        address: u16,
    },

    /// Requested count is outside the allowed range.
    #[error("Invalid count {count} (maximum {max})")]
    InvalidCount {
        /// Requested count.
        count: u16,
        /// Maximum allowed.
        max: u16,
    },

    /// The operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,

    /// A required capability is not available on this host.
    #[error("Capability unavailable: {capability} ({reason})")]
    Unavailable {
        /// Capability name.
        capability: String,
        /// Why it is unavailable.
        reason: String,
    },

    /// Not a single settings register group could be read.
    #[error("Device settings could not be read")]
    SettingsIncomplete,
}

impl OperationError {
    /// Creates an unavailable capability error.
    pub fn unavailable(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled => ErrorSeverity::Info,
            Self::Unavailable { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyWrite { .. } => ErrorCode::new(3, 1),
            Self::InvalidCount { .. } => ErrorCode::new(3, 2),
            Self::Cancelled => ErrorCode::new(3, 3),
            Self::Unavailable { .. } => ErrorCode::new(3, 4),
            Self::SettingsIncomplete => ErrorCode::new(3, 5),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::EmptyWrite { .. } => vec!["Provide at least one value"],
            Self::InvalidCount { .. } => vec!["Split the request into smaller blocks"],
            Self::Cancelled => vec![],
            Self::Unavailable { .. } => vec!["Install the serial port support for this platform"],
            Self::SettingsIncomplete => vec![
                "Check that the device is connected",
                "Verify the device address and line speed",
            ],
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Invalid device address.
    #[error("Invalid device address: {address} (valid range: 1-247)")]
    InvalidAddress {
        /// The invalid address.
        address: u16,
    },

    /// Invalid baud rate.
    #[error("Invalid baud rate: {baud_rate}")]
    InvalidBaudRate {
        /// The invalid baud rate.
        baud_rate: u32,
    },

    /// Invalid CAN address.
    #[error("Invalid CAN address: {address} (valid range: 1-127)")]
    InvalidCanAddress {
        /// The invalid address.
        address: u16,
    },

    /// Invalid speed code read from or written to the device.
    #[error("Invalid {kind} speed code: {code}")]
    InvalidSpeedCode {
        /// "Modbus" or "CAN".
        kind: &'static str,
        /// The code.
        code: u16,
    },

    /// Invalid timing value.
    #[error("Invalid {field}: {duration:?} ({reason})")]
    InvalidTiming {
        /// Field name.
        field: String,
        /// The invalid duration.
        duration: Duration,
        /// Reason.
        reason: String,
    },

    /// Missing required field.
    #[error("Missing required configuration: {field}")]
    MissingField {
        /// The missing field.
        field: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid address error.
    pub fn invalid_address(address: u16) -> Self {
        Self::InvalidAddress { address }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid timing error.
    pub fn invalid_timing(
        field: impl Into<String>,
        duration: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTiming {
            field: field.into(),
            duration,
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidAddress { .. } => ErrorCode::new(5, 1),
            Self::InvalidBaudRate { .. } => ErrorCode::new(5, 2),
            Self::InvalidCanAddress { .. } => ErrorCode::new(5, 3),
            Self::InvalidSpeedCode { .. } => ErrorCode::new(5, 4),
            Self::InvalidTiming { .. } => ErrorCode::new(5, 5),
            Self::MissingField { .. } => ErrorCode::new(5, 6),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::InvalidAddress { .. } => vec![
                "Device address must be between 1 and 247",
                "Address 0 is broadcast and never targeted",
            ],
            Self::InvalidBaudRate { .. } => {
                vec!["Supported speeds: 2400, 4800, 9600, 19200, 38400, 57600, 115200"]
            }
            Self::InvalidCanAddress { .. } => vec!["CAN address must be between 1 and 127"],
            Self::InvalidSpeedCode { .. } => vec!["Modbus speed codes are 0-6, CAN speed codes 0-7"],
            Self::InvalidTiming { .. } => vec!["Check timing values in the configuration file"],
            Self::MissingField { .. } => vec!["Check the configuration file for required fields"],
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Timeout errors.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// Read operation timeout.
    #[error("Read operation timed out after {duration:?}")]
    Read {
        /// Timeout duration.
        duration: Duration,
    },

    /// Write operation timeout.
    #[error("Write operation timed out after {duration:?}")]
    Write {
        /// Timeout duration.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Creates a read timeout.
    pub fn read(duration: Duration) -> Self {
        Self::Read { duration }
    }

    /// Creates a write timeout.
    pub fn write(duration: Duration) -> Self {
        Self::Write { duration }
    }

    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Read { duration } | Self::Write { duration } => *duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::new(6, 2),
            Self::Write { .. } => ErrorCode::new(6, 3),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        vec![
            "Verify the device is powered and connected",
            "Increase the timeout value",
        ]
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error => Level::ERROR,
            Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code for categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1=link, 2=protocol, 3=operation, 5=config, 6=timeout).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTU-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with RtuError.
pub type RtuResult<T> = Result<T, RtuError>;

// =============================================================================
// Error Context Extension
// =============================================================================

/// Extension trait for adding context to RTU errors.
pub trait RtuErrorContext<T> {
    /// Logs the error with the given operation context and passes it on.
    fn context(self, context: &str) -> Result<T, RtuError>;

    /// Adds register address context to errors.
    fn with_register(self, address: u16) -> Result<T, RtuError>;
}

impl<T> RtuErrorContext<T> for Result<T, RtuError> {
    fn context(self, context: &str) -> Result<T, RtuError> {
        self.map_err(|e| {
            e.log(context);
            e
        })
    }

    fn with_register(self, address: u16) -> Result<T, RtuError> {
        self.map_err(|e| {
            tracing::debug!(register = address, error = %e, "RTU error with register context");
            e
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
