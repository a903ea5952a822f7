//! Error types for Ailydian core

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] ailydian_crypto::CryptoError),

    /// Storage backend failed
    #[error("Storage error during {operation}: {reason}")]
    Storage {
        /// Operation that failed
        operation: &'static str,
        /// Backend message
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A sealed record failed authentication
    #[error("Sealed record {namespace}/{key} failed authentication")]
    SealedRecordCorrupt {
        /// Record namespace
        namespace: String,
        /// Record key
        key: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Build a storage error
    pub fn storage(operation: &'static str, reason: impl ToString) -> Self {
        Error::Storage {
            operation,
            reason: reason.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::storage("sled", err)
    }
}
