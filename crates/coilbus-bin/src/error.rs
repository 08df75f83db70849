// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the coilbus binary.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for coilbus-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the coilbus binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Invalid arguments or settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Device communication error.
    #[error("Device error: {0}")]
    Device(#[from] coilbus_rtu::RtuError),

    /// No device answered a scan.
    #[error("No device found: {0}")]
    NotFound(String),

    /// The operation was interrupted.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Runtime error.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Creates an I/O error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::Device(e) if e.category() == "configuration" => 1,
            Self::Device(e) if e.category() == "link" => 2,
            Self::Device(_) => 3,
            Self::Io(_) => 4,
            Self::NotFound(_) => 5,
            Self::Interrupted(_) => 130,
            Self::Runtime(_) => 6,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }

    /// Recovery hints from the underlying device error, if any.
    pub fn hints(&self) -> Vec<&'static str> {
        match self {
            Self::Device(e) => e.recovery_hints(),
            Self::WithContext { source, .. } => source.hints(),
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BinError {
    fn from(err: serde_json::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

impl From<anyhow::Error> for BinError {
    fn from(err: anyhow::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with appropriate formatting.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }

    for hint in error.hints() {
        eprintln!("  Hint: {}", hint);
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use coilbus_rtu::{LinkError, RtuError};

    #[test]
    fn test_error_creation() {
        let err = BinError::config("test error");
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_error_with_context() {
        let err = BinError::config("inner error").with_context("outer context");
        assert_eq!(err.to_string(), "outer context: Configuration error: inner error");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BinError::config("test").exit_code(), 1);
        assert_eq!(BinError::runtime("test").exit_code(), 6);
        assert_eq!(BinError::io("test").exit_code(), 4);
        assert_eq!(BinError::NotFound("scan".into()).exit_code(), 5);
        assert_eq!(
            BinError::from(RtuError::link(LinkError::not_found("/dev/ttyUSB9"))).exit_code(),
            2
        );
        assert_eq!(BinError::from(RtuError::no_response()).exit_code(), 3);
    }

    #[test]
    fn test_device_error_hints() {
        let err = BinError::from(RtuError::link(LinkError::not_found("/dev/ttyUSB9")))
            .with_context("connect");
        assert!(!err.hints().is_empty());
    }
}
