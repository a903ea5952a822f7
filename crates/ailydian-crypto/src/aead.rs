//! Authenticated Encryption with Associated Data (AEAD)
//!
//! AES-256-GCM is the default message cipher. XChaCha20-Poly1305 is
//! available for platforms without AES acceleration.

use aes_gcm::{
    aead::{Aead as AeadTrait, KeyInit, Payload},
    Aes256Gcm,
};
use chacha20poly1305::XChaCha20Poly1305;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::MAX_MESSAGE_SIZE;

/// Nonce size for XChaCha20-Poly1305 (192 bits)
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// Nonce size for AES-256-GCM (96 bits)
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Key size for both algorithms (256 bits)
pub const KEY_SIZE: usize = 32;

/// AEAD key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// AEAD algorithm selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    /// AES-256-GCM
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// XChaCha20-Poly1305
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Wire identifier
    pub fn to_byte(self) -> u8 {
        match self {
            AeadAlgorithm::Aes256Gcm => 1,
            AeadAlgorithm::XChaCha20Poly1305 => 2,
        }
    }

    /// Parse a wire identifier
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(AeadAlgorithm::Aes256Gcm),
            2 => Some(AeadAlgorithm::XChaCha20Poly1305),
            _ => None,
        }
    }

    /// Nonce length for this algorithm
    pub fn nonce_len(self) -> usize {
        match self {
            AeadAlgorithm::Aes256Gcm => AES_GCM_NONCE_SIZE,
            AeadAlgorithm::XChaCha20Poly1305 => XCHACHA_NONCE_SIZE,
        }
    }
}

/// Nonce (IV) for AEAD
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nonce {
    /// AES-GCM nonce (12 bytes)
    AesGcm([u8; AES_GCM_NONCE_SIZE]),
    /// XChaCha20-Poly1305 nonce (24 bytes)
    XChaCha([u8; XCHACHA_NONCE_SIZE]),
}

impl Nonce {
    /// Draw a fresh nonce from the OS random source
    pub fn random(algorithm: AeadAlgorithm) -> Result<Self> {
        Ok(match algorithm {
            AeadAlgorithm::Aes256Gcm => {
                let mut n = [0u8; AES_GCM_NONCE_SIZE];
                OsRng.try_fill_bytes(&mut n)?;
                Nonce::AesGcm(n)
            }
            AeadAlgorithm::XChaCha20Poly1305 => {
                let mut n = [0u8; XCHACHA_NONCE_SIZE];
                OsRng.try_fill_bytes(&mut n)?;
                Nonce::XChaCha(n)
            }
        })
    }

    /// Rebuild a nonce read from the wire
    pub fn from_parts(algorithm: AeadAlgorithm, bytes: &[u8]) -> Result<Self> {
        let invalid = || CryptoError::InvalidKeyLength {
            expected: algorithm.nonce_len(),
            actual: bytes.len(),
        };
        Ok(match algorithm {
            AeadAlgorithm::Aes256Gcm => Nonce::AesGcm(bytes.try_into().map_err(|_| invalid())?),
            AeadAlgorithm::XChaCha20Poly1305 => {
                Nonce::XChaCha(bytes.try_into().map_err(|_| invalid())?)
            }
        })
    }

    /// Algorithm this nonce belongs to
    pub fn algorithm(&self) -> AeadAlgorithm {
        match self {
            Nonce::AesGcm(_) => AeadAlgorithm::Aes256Gcm,
            Nonce::XChaCha(_) => AeadAlgorithm::XChaCha20Poly1305,
        }
    }

    /// Get nonce bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Nonce::AesGcm(n) => n,
            Nonce::XChaCha(n) => n,
        }
    }
}

/// AEAD cipher
#[derive(Clone, Copy, Debug)]
pub struct Aead {
    algorithm: AeadAlgorithm,
    max_message_size: usize,
}

impl Aead {
    /// Create a cipher for the given algorithm
    pub fn new(algorithm: AeadAlgorithm) -> Self {
        Self {
            algorithm,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Override the plaintext size limit
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Algorithm used for sealing
    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    /// Encrypt plaintext under a fresh random nonce
    ///
    /// Returns the nonce and the ciphertext with its authentication tag.
    pub fn seal(&self, key: &AeadKey, plaintext: &[u8], aad: &[u8]) -> Result<(Nonce, Vec<u8>)> {
        if plaintext.len() > self.max_message_size {
            return Err(CryptoError::MessageTooLarge {
                size: plaintext.len(),
                max: self.max_message_size,
            });
        }

        let nonce = Nonce::random(self.algorithm)?;
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let sealed = match &nonce {
            Nonce::AesGcm(n) => Aes256Gcm::new(key.as_bytes().into()).encrypt(n.into(), payload),
            Nonce::XChaCha(n) => {
                XChaCha20Poly1305::new(key.as_bytes().into()).encrypt(n.into(), payload)
            }
        };

        let ciphertext = sealed.map_err(|_| CryptoError::CryptoPrimitiveFailure {
            operation: "aead seal",
        })?;
        Ok((nonce, ciphertext))
    }

    /// Decrypt and authenticate
    ///
    /// Returns `None` when authentication fails; callers attach their own
    /// context to the failure.
    pub fn open(&self, key: &AeadKey, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match nonce {
            Nonce::AesGcm(n) => Aes256Gcm::new(key.as_bytes().into())
                .decrypt(n.into(), payload)
                .ok(),
            Nonce::XChaCha(n) => XChaCha20Poly1305::new(key.as_bytes().into())
                .decrypt(n.into(), payload)
                .ok(),
        }
    }
}

impl Default for Aead {
    fn default() -> Self {
        Self::new(AeadAlgorithm::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip() {
        let cipher = Aead::default();
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);

        let (nonce, ct) = cipher.seal(&key, b"Hello, Ailydian!", b"aad").unwrap();
        assert_eq!(nonce.as_bytes().len(), AES_GCM_NONCE_SIZE);
        assert_eq!(ct.len(), 16 + TAG_SIZE);

        let pt = cipher.open(&key, &nonce, &ct, b"aad").unwrap();
        assert_eq!(pt, b"Hello, Ailydian!");
    }

    #[test]
    fn test_xchacha_roundtrip() {
        let cipher = Aead::new(AeadAlgorithm::XChaCha20Poly1305);
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);

        let (nonce, ct) = cipher.seal(&key, b"payload", b"").unwrap();
        assert_eq!(nonce.algorithm(), AeadAlgorithm::XChaCha20Poly1305);
        assert_eq!(cipher.open(&key, &nonce, &ct, b"").unwrap(), b"payload");
    }

    #[test]
    fn test_tampering_fails() {
        let cipher = Aead::default();
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);
        let (nonce, mut ct) = cipher.seal(&key, b"Secret message", b"aad").unwrap();

        assert!(cipher.open(&key, &nonce, &ct, b"other").is_none());
        assert!(cipher
            .open(&AeadKey::from_bytes([0x43; KEY_SIZE]), &nonce, &ct, b"aad")
            .is_none());

        ct[0] ^= 0xFF;
        assert!(cipher.open(&key, &nonce, &ct, b"aad").is_none());
    }

    #[test]
    fn test_nonces_are_fresh() {
        let a = Nonce::random(AeadAlgorithm::Aes256Gcm).unwrap();
        let b = Nonce::random(AeadAlgorithm::Aes256Gcm).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_nonce_from_parts_checks_length() {
        assert!(Nonce::from_parts(AeadAlgorithm::Aes256Gcm, &[0u8; 12]).is_ok());
        assert!(Nonce::from_parts(AeadAlgorithm::Aes256Gcm, &[0u8; 24]).is_err());
        assert!(Nonce::from_parts(AeadAlgorithm::XChaCha20Poly1305, &[0u8; 24]).is_ok());
    }

    #[test]
    fn test_message_too_large() {
        let cipher = Aead::default().with_max_message_size(8);
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);

        let result = cipher.seal(&key, &[0u8; 9], b"");
        assert!(matches!(result, Err(CryptoError::MessageTooLarge { size: 9, max: 8 })));
    }
}
