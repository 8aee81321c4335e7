//! Unified error types for cableguy

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classes exposed to API layers
///
/// Callers map these onto their own status codes without needing to
/// match on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller supplied malformed or self-inconsistent addressing
    Validation,
    /// Address already claimed by another interface or host
    Conflict,
    /// Referenced interface or address does not exist
    NotFound,
    /// Kernel, subprocess, filesystem or engine failure
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Main error type for cableguy operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Settings store errors
    #[error("Failed to serialize settings: {0}")]
    SettingsSerialize(#[from] toml::ser::Error),

    #[error("Unsupported settings version {found} (expected {expected})")]
    SettingsVersion { found: u32, expected: u32 },

    // Addressing errors
    #[error("Invalid addressing: {0}")]
    Validation(String),

    #[error("Address conflict: {0}")]
    Conflict(String),

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Address {address} not found on interface '{interface}'")]
    AddressNotFound { interface: String, address: String },

    // OS errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Command '{command}' timed out after {seconds} seconds")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Failed to parse '{command}' output: {source}")]
    CommandOutput {
        command: String,
        source: serde_json::Error,
    },

    #[error("Signal delivery to pid {pid} failed: {source}")]
    Signal { pid: u32, source: nix::Error },

    // Engine errors
    #[error("Interface manager is not running")]
    EngineClosed,

    #[error("Root privileges are required to manage network interfaces")]
    NotRoot,
}

impl Error {
    /// Classify the error for callers that only care about the broad kind
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Validation,
            Error::Conflict(_) => ErrorCategory::Conflict,
            Error::InterfaceNotFound(_) | Error::AddressNotFound { .. } => ErrorCategory::NotFound,
            Error::Io(_)
            | Error::ConfigRead { .. }
            | Error::ConfigParse(_)
            | Error::ConfigValidation(_)
            | Error::SettingsSerialize(_)
            | Error::SettingsVersion { .. }
            | Error::CommandFailed { .. }
            | Error::CommandTimeout { .. }
            | Error::CommandOutput { .. }
            | Error::Signal { .. }
            | Error::EngineClosed
            | Error::NotRoot => ErrorCategory::Internal,
        }
    }

    /// Whether the failure came from the kernel or a subprocess
    pub fn is_os(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::CommandFailed { .. }
                | Error::CommandTimeout { .. }
                | Error::CommandOutput { .. }
                | Error::Signal { .. }
        )
    }
}

/// Result type alias for cableguy operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::Validation("bad".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            Error::Conflict("taken".into()).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            Error::InterfaceNotFound("eth9".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            Error::AddressNotFound {
                interface: "eth0".into(),
                address: "10.0.0.1".into()
            }
            .category(),
            ErrorCategory::NotFound
        );
        assert_eq!(Error::EngineClosed.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_os_classification() {
        let timeout = Error::CommandTimeout {
            command: "ip".into(),
            seconds: 5,
        };
        assert!(timeout.is_os());
        assert_eq!(timeout.category(), ErrorCategory::Internal);
        assert!(!Error::Validation("x".into()).is_os());
    }
}
