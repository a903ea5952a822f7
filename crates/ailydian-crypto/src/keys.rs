//! Key types and primitives for the Ailydian protocol
//!
//! This module provides the fundamental key material used throughout the
//! protocol:
//! - X25519 key pairs for every Diffie-Hellman computation
//! - One-time and signed pre-keys published in bundles
//! - Signing/verification, hashing and randomness helpers

use std::fmt;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::identity::{IdentityKeyPair, IdentityPublicKey};

/// Size of X25519 public keys in bytes
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of Ed25519 signatures in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// A serializable X25519 public key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyBytes(#[serde(with = "hex::serde")] pub [u8; 32]);

impl PublicKeyBytes {
    /// Parse from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: X25519_PUBLIC_KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Convert to an X25519 public key
    pub fn to_x25519(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PublicKeyBytes {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PublicKeyBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A shared secret derived from Diffie-Hellman key exchange
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 32]);

impl SharedSecret {
    /// Get the secret bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An X25519 key pair
///
/// The secret half is zeroized on drop and redacted from `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    secret: [u8; 32],
    public: [u8; 32],
}

impl KeyPair {
    /// Generate a new key pair from the OS random source
    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; 32];
        OsRng.try_fill_bytes(&mut secret)?;
        let pair = Self::from_secret_bytes(secret);
        secret.zeroize();
        Ok(pair)
    }

    /// Rebuild a key pair from stored secret bytes
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = X25519StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        Self {
            secret: secret.to_bytes(),
            public: *public.as_bytes(),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.public)
    }

    /// Perform X25519 Diffie-Hellman with a peer public key
    ///
    /// Rejects low-order peer points that would produce an all-zero secret.
    pub fn diffie_hellman(&self, their_public: &PublicKeyBytes) -> Result<SharedSecret> {
        let secret = X25519StaticSecret::from(self.secret);
        let shared = secret.diffie_hellman(&their_public.to_x25519());
        if !shared.was_contributory() {
            return Err(CryptoError::CryptoPrimitiveFailure {
                operation: "x25519 agreement",
            });
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// A one-time pre-key held by its owner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKey {
    /// Pre-key identifier, unique per device
    pub id: u32,
    /// The key pair
    pub key_pair: KeyPair,
}

impl PreKey {
    /// Public form published in a bundle
    pub fn to_public(&self) -> OneTimePreKey {
        OneTimePreKey {
            id: self.id,
            public_key: self.key_pair.public_key(),
        }
    }
}

/// A one-time pre-key as published in a bundle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKey {
    /// The key ID
    pub id: u32,
    /// The public key
    pub public_key: PublicKeyBytes,
}

/// A medium-term pre-key signed by the identity key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKey {
    /// The pre-key ID
    pub id: u32,
    /// The key pair
    pub key_pair: KeyPair,
    /// Ed25519 signature over the public key by the identity key
    #[serde(with = "hex::serde")]
    pub signature: [u8; SIGNATURE_SIZE],
    /// Creation time in milliseconds since the epoch
    pub timestamp: i64,
}

impl SignedPreKey {
    /// Verify the signature against an identity public key
    pub fn verify(&self, identity: &IdentityPublicKey) -> Result<()> {
        if verify(
            self.key_pair.public_key().as_bytes(),
            &self.signature,
            identity.signing_key_bytes(),
        ) {
            Ok(())
        } else {
            Err(CryptoError::BundleSignatureInvalid)
        }
    }
}

/// Generate a fresh device identity
pub fn generate_identity_key_pair() -> Result<IdentityKeyPair> {
    IdentityKeyPair::generate()
}

/// Generate a signed pre-key with the given id
pub fn generate_signed_pre_key(identity: &IdentityKeyPair, key_id: u32) -> Result<SignedPreKey> {
    let key_pair = KeyPair::generate()?;
    let signature = identity.sign(key_pair.public_key().as_bytes());
    Ok(SignedPreKey {
        id: key_id,
        key_pair,
        signature,
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

/// Generate `count` one-time pre-keys with consecutive ids from `start_id`
pub fn generate_one_time_pre_keys(start_id: u32, count: u32) -> Result<Vec<PreKey>> {
    start_id
        .checked_add(count)
        .ok_or(CryptoError::CounterOverflow)?;

    (0..count)
        .map(|offset| {
            Ok(PreKey {
                id: start_id + offset,
                key_pair: KeyPair::generate()?,
            })
        })
        .collect()
}

/// Sign data with the identity signing key
pub fn sign(data: &[u8], identity: &IdentityKeyPair) -> [u8; SIGNATURE_SIZE] {
    identity.sign(data)
}

/// Verify an Ed25519 signature
///
/// Malformed keys or signatures yield `false`; this never errors.
pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    verifying_key
        .verify(data, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

/// Compute a Diffie-Hellman shared secret
pub fn derive_shared_secret(private: &KeyPair, public: &PublicKeyBytes) -> Result<SharedSecret> {
    private.diffie_hellman(public)
}

/// SHA-256 digest
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Fill a buffer of `len` bytes from the OS random source
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    OsRng.try_fill_bytes(&mut buf)?;
    Ok(buf)
}
