//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
///
/// No variant ever carries key material; context is limited to operation
/// names, counters and sizes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The crypto provider or the OS random source failed
    #[error("Crypto primitive failure during {operation}")]
    CryptoPrimitiveFailure {
        /// Operation that failed
        operation: &'static str,
    },

    /// Signed pre-key signature did not verify against the bundle identity
    #[error("Pre-key bundle signature is invalid")]
    BundleSignatureInvalid,

    /// Message authentication or decryption failed
    #[error("Decryption failed for message {counter}")]
    DecryptionFailed {
        /// Counter of the message that failed
        counter: u32,
    },

    /// Too many messages would have to be skipped
    #[error("Message gap too large: {gap} messages skipped (max {max})")]
    MessageGapTooLarge {
        /// Requested gap
        gap: u32,
        /// Configured limit
        max: u32,
    },

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Message too large
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Plaintext size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// A chain counter would wrap
    #[error("Message counter overflow")]
    CounterOverflow,

    /// Ratchet state is internally inconsistent
    #[error("Ratchet state corrupted: {0}")]
    RatchetCorrupted(&'static str),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CryptoError {
    /// Whether the session can keep being used after this error
    ///
    /// Failed decryptions and oversized inputs leave state untouched;
    /// provider failures and corrupted state do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed { .. }
                | CryptoError::MessageGapTooLarge { .. }
                | CryptoError::MessageTooLarge { .. }
                | CryptoError::BundleSignatureInvalid
                | CryptoError::InvalidPublicKey(_)
        )
    }
}

impl From<bincode::Error> for CryptoError {
    fn from(err: bincode::Error) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}

impl From<rand::Error> for CryptoError {
    fn from(_: rand::Error) -> Self {
        CryptoError::CryptoPrimitiveFailure {
            operation: "random generation",
        }
    }
}
