//! Error handling for MillKit
//!
//! Provides error types for every layer of the motion stack:
//! - Connection errors (port discovery, open/close)
//! - Configuration errors (config files, controller settings)
//! - Command errors (device rejections, transport failures)
//! - Motion errors (planner bounds, position reporting)
//! - Tool errors (tool offset library)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::data::Axis;
use thiserror::Error;

/// Connection error type
///
/// Represents errors related to locating, opening and closing the
/// serial link to the motion controller.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// No GRBL-compatible device answered on any candidate port
    #[error("No GRBL controller found after {rounds} scan(s); searched {patterns}")]
    NoDevice {
        /// The port name patterns that were searched.
        patterns: String,
        /// The number of full scans attempted.
        rounds: usize,
    },

    /// Failed to open port
    #[error("Failed to open port {port} at {baud} baud: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The baud rate used.
        baud: u32,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Port still reports open after close
    #[error("Failed to close port {port}")]
    CloseFailed {
        /// The port that did not close.
        port: String,
    },

    /// Operation requires an open connection
    #[error("Controller not connected")]
    NotConnected,

    /// Device is in a state that prevents use
    #[error("Controller reported {status} while connecting")]
    Unusable {
        /// The raw status text.
        status: String,
    },

    /// Port enumeration failed
    #[error("Failed to enumerate serial ports: {reason}")]
    Enumeration {
        /// The reason enumeration failed.
        reason: String,
    },
}

/// Configuration error type
///
/// Represents errors reading configuration files or interpreting
/// controller settings.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Configuration file does not exist and no fallback is available
    #[error("Configuration not found: {path}")]
    NotFound {
        /// The path that was looked up.
        path: String,
    },

    /// Configuration file could not be parsed
    #[error("Corrupted configuration {path}: {reason}")]
    Corrupted {
        /// The file that failed to parse.
        path: String,
        /// The parse failure.
        reason: String,
    },

    /// A configuration value is missing or invalid
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting {
        /// The setting key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Configuration file format not supported
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Port discovery has no naming conventions for this platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Configuration could not be written
    #[error("Failed to save {path}: {reason}")]
    SaveFailed {
        /// The destination file.
        path: String,
        /// The write failure.
        reason: String,
    },
}

/// Command error type
///
/// Represents failures executing a command on the controller.
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// Device answered with an error or alarm
    #[error("Command '{command}' rejected: {response}")]
    Rejected {
        /// The command that was sent.
        command: String,
        /// The raw device response.
        response: String,
    },

    /// Device reported an error or alarm while a command was running
    #[error("Error in status: {status}")]
    Status {
        /// The raw status text.
        status: String,
    },

    /// Transport failed while sending or receiving
    #[error("Error executing command {command}: {reason}")]
    Transport {
        /// The command being executed.
        command: String,
        /// The underlying transport failure.
        reason: String,
    },

    /// Multi-line response did not terminate
    #[error("Timed out waiting for response to '{command}'")]
    Timeout {
        /// The command being executed.
        command: String,
    },
}

/// Motion error type
///
/// Represents planner rejections and position reporting failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    /// Target lies outside the working volume
    #[error("{axis} coordinate out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        /// The offending axis.
        axis: Axis,
        /// The rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Status report never contained the expected position tag
    #[error("{tag} position not found in status after {attempts} attempts")]
    LocationNotFound {
        /// The position tag that was expected (`WPos` or `MPos`).
        tag: String,
        /// Number of attempts made.
        attempts: usize,
    },
}

/// Tool offset library error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Tool name not present in the library
    #[error("Tool {0} not found")]
    NotFound(String),

    /// Tool may not be removed
    #[error("Tool {0} is required and cannot be deleted")]
    Protected(String),

    /// Tool name normalises to an empty key
    #[error("Invalid tool name '{0}'")]
    InvalidName(String),
}

/// Main error type for MillKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Motion error
    #[error(transparent)]
    Motion(#[from] MotionError),

    /// Tool library error
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// No parseable status could be obtained
    #[error("Status unavailable: {reason}")]
    StatusUnavailable {
        /// What was (or was not) received.
        reason: String,
    },

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this is a command error
    pub fn is_command_error(&self) -> bool {
        matches!(self, Error::Command(_))
    }

    /// Check if this is a planner bounds violation
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Error::Motion(MotionError::OutOfRange { .. }))
    }

    /// Check if the position could not be located
    pub fn is_location_not_found(&self) -> bool {
        matches!(self, Error::Motion(MotionError::LocationNotFound { .. }))
    }

    /// Check if no status could be obtained
    pub fn is_status_unavailable(&self) -> bool {
        matches!(self, Error::StatusUnavailable { .. })
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_names_axis() {
        let err = MotionError::OutOfRange {
            axis: Axis::Y,
            value: 12.5,
            min: -300.0,
            max: 0.0,
        };
        assert_eq!(
            err.to_string(),
            "y coordinate out of range: 12.5 not in [-300, 0]"
        );
    }

    #[test]
    fn test_rejected_carries_device_text() {
        let err: Error = CommandError::Rejected {
            command: "G01 X-10".to_string(),
            response: "error:9".to_string(),
        }
        .into();
        assert!(err.is_command_error());
        assert!(err.to_string().contains("error:9"));
        assert!(err.to_string().contains("G01 X-10"));
    }

    #[test]
    fn test_classifiers() {
        let err: Error = ConnectionError::NotConnected.into();
        assert!(err.is_connection_error());
        assert!(!err.is_command_error());

        let err: Error = MotionError::LocationNotFound {
            tag: "WPos".to_string(),
            attempts: 3,
        }
        .into();
        assert!(err.is_location_not_found());

        let err = Error::StatusUnavailable {
            reason: "no reply".to_string(),
        };
        assert!(err.is_status_unavailable());
    }
}
