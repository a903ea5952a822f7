//! Identity key management
//!
//! Each device owns exactly one long-term identity. It carries two separate
//! keys: an Ed25519 key that signs pre-keys and an X25519 key used in the
//! X3DH agreement. The public identity is the 64-byte concatenation of both.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::keys::{KeyPair, PublicKeyBytes, SharedSecret, SIGNATURE_SIZE};

/// Size of a serialized public identity key
pub const IDENTITY_PUBLIC_KEY_SIZE: usize = 64;

/// Long-term identity key pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    /// Identity identifier
    #[zeroize(skip)]
    id: Uuid,
    /// Creation time in milliseconds since the epoch
    created_at: i64,
    /// Ed25519 seed
    signing_seed: [u8; 32],
    /// X25519 agreement key
    dh: KeyPair,
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair
    pub fn generate() -> Result<Self> {
        let mut signing_seed = [0u8; 32];
        OsRng.try_fill_bytes(&mut signing_seed)?;

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now().timestamp_millis(),
            signing_seed,
            dh: KeyPair::generate()?,
        })
    }

    /// Identity identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time in milliseconds since the epoch
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Get the public identity key
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey {
            signing_key: self.signing_key().verifying_key().to_bytes(),
            dh_key: self.dh.public_key(),
        }
    }

    /// Sign a message with the Ed25519 key
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key().sign(message).to_bytes()
    }

    /// Perform Diffie-Hellman with the identity agreement key
    pub fn diffie_hellman(&self, their_public: &PublicKeyBytes) -> Result<SharedSecret> {
        self.dh.diffie_hellman(their_public)
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.signing_seed)
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("id", &self.id)
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public identity key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPublicKey {
    /// Ed25519 verifying key
    #[serde(with = "hex::serde")]
    signing_key: [u8; 32],
    /// X25519 public key for DH
    dh_key: PublicKeyBytes,
}

impl IdentityPublicKey {
    /// Parse the 64-byte wire form, validating the Ed25519 point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != IDENTITY_PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: IDENTITY_PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut signing_key = [0u8; 32];
        signing_key.copy_from_slice(&bytes[..32]);
        VerifyingKey::from_bytes(&signing_key)
            .map_err(|_| CryptoError::InvalidPublicKey("invalid Ed25519 point".to_string()))?;

        Ok(Self {
            signing_key,
            dh_key: PublicKeyBytes::from_slice(&bytes[32..])?,
        })
    }

    /// Parse from base64
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidPublicKey("invalid base64".to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Serialize to the 64-byte wire form (signing key then DH key)
    pub fn to_bytes(&self) -> [u8; IDENTITY_PUBLIC_KEY_SIZE] {
        let mut out = [0u8; IDENTITY_PUBLIC_KEY_SIZE];
        out[..32].copy_from_slice(&self.signing_key);
        out[32..].copy_from_slice(self.dh_key.as_bytes());
        out
    }

    /// Base64 export of the wire form
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Ed25519 verifying key bytes
    pub fn signing_key_bytes(&self) -> &[u8; 32] {
        &self.signing_key
    }

    /// X25519 agreement key
    pub fn dh_key(&self) -> &PublicKeyBytes {
        &self.dh_key
    }

    /// Hex encoding of the wire form
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", &self.fingerprint_hex()[..16])
    }
}
