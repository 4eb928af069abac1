//! Error types for the flow debugger
//!
//! The engine operations never fail: unknown ids and out-of-state calls are
//! benign no-ops. Errors only surface at the edges where text from outside
//! the process is turned into typed values.

use thiserror::Error;

/// Errors raised while decoding locations, breakpoint requests or configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebuggerError {
    /// A location key string could not be parsed
    #[error("Invalid location key '{key}': {reason}")]
    InvalidLocation { key: String, reason: String },

    /// A port type other than `i`/`o` (or `in`/`out`)
    #[error("Invalid port type: {0}")]
    InvalidPortType(String),

    /// A breakpoint request was missing required fields
    #[error("Invalid breakpoint request: {0}")]
    InvalidBreakpoint(String),

    /// Configuration value could not be interpreted
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DebuggerError {
    /// Create an invalid location error
    pub fn invalid_location(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a config error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}
