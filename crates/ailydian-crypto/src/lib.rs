//! # Ailydian Cryptographic Library
//!
//! Core cryptographic building blocks for Ailydian end-to-end encrypted
//! one-to-one messaging.
//!
//! ## Security Properties
//!
//! - **Asynchronous session setup**: X3DH lets an initiator derive a shared
//!   secret from a published pre-key bundle while the responder is offline
//! - **Forward secrecy**: every message is sealed under a single-use key
//!   derived from a one-way chain; old keys are zeroized
//! - **Break-in recovery**: Diffie-Hellman ratchet steps mix fresh entropy
//!   into the root key whenever the speaking direction changes
//! - **Out-of-band verification**: safety numbers let two users compare
//!   identity keys by digits, hex or QR payload
//!
//! ## Core Components
//!
//! - [`keys`]: X25519 key pairs, pre-keys, hashing and randomness
//! - [`identity`]: Long-term identity keys (Ed25519 + X25519)
//! - [`kdf`]: HKDF/HMAC derivations used by the handshake and ratchet
//! - [`aead`]: AES-256-GCM and XChaCha20-Poly1305 message sealing
//! - [`x3dh`]: Handshake between initiator and responder
//! - [`ratchet`]: Double Ratchet with a bounded skipped-key cache
//! - [`safety`]: Safety numbers and emoji fingerprints

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod aead;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod ratchet;
pub mod safety;
pub mod x3dh;

pub use error::{CryptoError, Result};

/// Protocol version carried in every envelope
pub const PROTOCOL_VERSION: u8 = 1;

/// Default HKDF info string for the X3DH shared secret
pub const DEFAULT_HKDF_INFO: &str = "Ailydian-E2EE-v1";

/// Maximum plaintext size in bytes (64 KB)
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Default upper bound on skipped message keys held per session
pub const DEFAULT_MAX_SKIP: u32 = 1000;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aead::{Aead, AeadAlgorithm, AeadKey, Nonce};
    pub use crate::error::{CryptoError, Result};
    pub use crate::identity::{IdentityKeyPair, IdentityPublicKey};
    pub use crate::keys::{KeyPair, OneTimePreKey, PreKey, PublicKeyBytes, SignedPreKey};
    pub use crate::ratchet::{EncryptedMessage, RatchetSeed, RatchetState};
    pub use crate::safety::SafetyNumber;
    pub use crate::x3dh::{HandshakeHeader, X3dhBundle, X3dhResult};
}
