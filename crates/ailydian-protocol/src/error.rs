//! Protocol error types

use ailydian_crypto::CryptoError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Coarse classification for callers that only branch on the failure class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// RNG or primitive failure
    CryptoPrimitiveFailure,
    /// A bundle's signed pre-key signature did not verify
    BundleSignatureInvalid,
    /// A message could not be authenticated or decrypted
    DecryptionFailed,
    /// No session exists and none could be created
    SessionNotFound,
    /// The key store failed
    StorageFailure,
    /// The bundle directory failed
    DirectoryFailure,
    /// A peer presented an identity other than the pinned one
    Untrusted,
    /// Input could not be parsed
    Malformed,
    /// Configuration was rejected
    Configuration,
    /// The context has no local device yet
    NotInitialized,
}

/// Protocol errors
///
/// Variants carry peer ids, operation names and counters, never key
/// material.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Cryptographic failure while talking to a peer
    #[error("Crypto error with {peer}: {source}")]
    Crypto {
        /// Peer id
        peer: String,
        /// Underlying error
        #[source]
        source: CryptoError,
    },

    /// No session with this peer and the message cannot start one
    #[error("No session with {peer}")]
    SessionNotFound {
        /// Peer id
        peer: String,
    },

    /// The directory has no bundle for this peer
    #[error("No pre-key bundle available for {peer}")]
    BundleUnavailable {
        /// Peer id
        peer: String,
    },

    /// A handshake referenced a pre-key this device does not hold
    #[error("Handshake from {peer} references unknown {kind} pre-key {id}")]
    UnknownPreKey {
        /// Peer id
        peer: String,
        /// "signed" or "one-time"
        kind: &'static str,
        /// Pre-key id
        id: u32,
    },

    /// Storage or device registry failure
    #[error("Storage failure during {operation}: {source}")]
    Storage {
        /// Operation that failed
        operation: &'static str,
        /// Underlying error
        #[source]
        source: ailydian_core::Error,
    },

    /// Generating device keys failed
    #[error("Device provisioning failed: {source}")]
    Provision {
        /// Underlying error
        #[source]
        source: ailydian_core::Error,
    },

    /// The bundle directory failed
    #[error("Directory failure for {peer}: {reason}")]
    Directory {
        /// Peer id
        peer: String,
        /// Backend message
        reason: String,
    },

    /// The peer's identity differs from the pinned one
    #[error("Identity key for {peer} does not match the trusted key")]
    UntrustedIdentity {
        /// Peer id
        peer: String,
    },

    /// Wire data could not be parsed
    #[error("Malformed message: {reason}")]
    Malformed {
        /// What was wrong
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// `initialize` has not completed
    #[error("Context is not initialized")]
    NotInitialized,
}

impl ProtocolError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Crypto { source, .. } => crypto_kind(source),
            ProtocolError::SessionNotFound { .. } | ProtocolError::BundleUnavailable { .. } => {
                ErrorKind::SessionNotFound
            }
            ProtocolError::UnknownPreKey { .. } => ErrorKind::DecryptionFailed,
            ProtocolError::Storage { source, .. } => match source {
                ailydian_core::Error::Crypto(e) => crypto_kind(e),
                ailydian_core::Error::InvalidConfig(_) => ErrorKind::Configuration,
                _ => ErrorKind::StorageFailure,
            },
            ProtocolError::Provision { source } => match source {
                ailydian_core::Error::Crypto(e) => crypto_kind(e),
                _ => ErrorKind::CryptoPrimitiveFailure,
            },
            ProtocolError::Directory { .. } => ErrorKind::DirectoryFailure,
            ProtocolError::UntrustedIdentity { .. } => ErrorKind::Untrusted,
            ProtocolError::Malformed { .. } => ErrorKind::Malformed,
            ProtocolError::Configuration(_) => ErrorKind::Configuration,
            ProtocolError::NotInitialized => ErrorKind::NotInitialized,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn crypto(peer: &str) -> impl FnOnce(CryptoError) -> Self + '_ {
        move |source| ProtocolError::Crypto {
            peer: peer.to_string(),
            source,
        }
    }

    pub(crate) fn provision(source: ailydian_core::Error) -> Self {
        ProtocolError::Provision { source }
    }

    pub(crate) fn storage(operation: &'static str) -> impl FnOnce(ailydian_core::Error) -> Self {
        move |source| ProtocolError::Storage { operation, source }
    }
}

fn crypto_kind(err: &CryptoError) -> ErrorKind {
    match err {
        CryptoError::BundleSignatureInvalid => ErrorKind::BundleSignatureInvalid,
        CryptoError::DecryptionFailed { .. }
        | CryptoError::MessageGapTooLarge { .. }
        | CryptoError::RatchetCorrupted(_) => ErrorKind::DecryptionFailed,
        CryptoError::InvalidKeyLength { .. }
        | CryptoError::InvalidPublicKey(_)
        | CryptoError::MessageTooLarge { .. }
        | CryptoError::Serialization(_) => ErrorKind::Malformed,
        CryptoError::CryptoPrimitiveFailure { .. } | CryptoError::CounterOverflow => {
            ErrorKind::CryptoPrimitiveFailure
        }
    }
}
