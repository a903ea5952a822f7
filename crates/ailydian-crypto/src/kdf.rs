//! Key Derivation Functions (KDF)
//!
//! HKDF-SHA256 for the handshake and root-key steps, HMAC-SHA256 for the
//! symmetric chain steps. Every derivation uses a distinct label.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// HKDF using SHA-256 for key derivation
pub type HkdfSha256 = Hkdf<Sha256>;

/// HMAC-SHA256 for chain steps
pub type HmacSha256 = Hmac<Sha256>;

/// Labels separating the derivation contexts
pub mod domain {
    /// HMAC label producing a message key from a chain key
    pub const MESSAGE_KEY: &[u8] = b"message-key";
    /// HMAC label producing the next chain key
    pub const CHAIN_KEY: &[u8] = b"chain-key";
    /// HKDF info for Diffie-Hellman ratchet steps
    pub const RATCHET_STEP: &[u8] = b"Ailydian-E2EE-v1-ratchet";
    /// Suffix appended to the handshake info when expanding the session seed
    pub const SESSION_SEED: &[u8] = b"-session";
    /// HKDF info for at-rest storage keys
    pub const STORAGE_KEY: &[u8] = b"Ailydian-E2EE-v1-storage";
}

/// A derived key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey<const N: usize>([u8; N]);

impl<const N: usize> DerivedKey<N> {
    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> AsRef<[u8]> for DerivedKey<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key derivation context for HKDF operations
pub struct KeyDerivationContext {
    hkdf: HkdfSha256,
}

impl KeyDerivationContext {
    /// Create a new KDF context from input key material
    ///
    /// # Arguments
    /// * `salt` - Optional salt (if None, uses zero-filled salt)
    /// * `ikm` - Input Key Material (e.g., concatenated DH outputs)
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        Self {
            hkdf: HkdfSha256::new(salt, ikm),
        }
    }

    /// Derive a key with the given info string
    pub fn derive<const N: usize>(&self, info: &[u8]) -> Result<DerivedKey<N>> {
        let mut output = [0u8; N];
        self.hkdf
            .expand(info, &mut output)
            .map_err(|_| CryptoError::CryptoPrimitiveFailure {
                operation: "hkdf expand",
            })?;
        Ok(DerivedKey(output))
    }
}

/// Advance a symmetric chain by one step
///
/// Returns `(next_chain_key, message_key)`:
/// message key = HMAC(chain, "message-key"), next chain = HMAC(chain, "chain-key").
pub fn chain_step(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let message_key = hmac_derive(chain_key, domain::MESSAGE_KEY);
    let next_chain_key = hmac_derive(chain_key, domain::CHAIN_KEY);
    (next_chain_key, message_key)
}

fn hmac_derive(key: &[u8; 32], label: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length, a 32-byte key cannot be rejected
    let mut mac = match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts 32-byte keys"),
    };
    mac.update(label);
    mac.finalize().into_bytes().into()
}

/// Derive a new root key and chain key from a DH ratchet output
pub fn derive_root_and_chain_keys(
    root_key: &[u8; 32],
    dh_output: &[u8; 32],
) -> Result<([u8; 32], [u8; 32])> {
    let kdf = KeyDerivationContext::new(Some(root_key), dh_output);
    let okm: DerivedKey<64> = kdf.derive(domain::RATCHET_STEP)?;

    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&okm.as_bytes()[..32]);
    chain.copy_from_slice(&okm.as_bytes()[32..]);
    Ok((root, chain))
}

/// Expand a 32-byte handshake secret into the 64-byte session seed
pub fn expand_ratchet_seed(shared_secret: &[u8; 32], info: &[u8]) -> Result<DerivedKey<64>> {
    let mut label = Vec::with_capacity(info.len() + domain::SESSION_SEED.len());
    label.extend_from_slice(info);
    label.extend_from_slice(domain::SESSION_SEED);
    KeyDerivationContext::new(None, shared_secret).derive(&label)
}

/// Constant-time comparison
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation_context() {
        let ikm = [0x42u8; 32];
        let kdf = KeyDerivationContext::new(Some(b"salt"), &ikm);

        let key1: DerivedKey<32> = kdf.derive(b"context1").unwrap();
        let key2: DerivedKey<32> = kdf.derive(b"context2").unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());

        let key1_again: DerivedKey<32> = kdf.derive(b"context1").unwrap();
        assert_eq!(key1.as_bytes(), key1_again.as_bytes());
    }

    #[test]
    fn test_chain_step_labels() {
        let chain = [0x42u8; 32];
        let (next, message) = chain_step(&chain);

        assert_ne!(next, message);
        assert_ne!(next, chain);
        assert_eq!(message, hmac_derive(&chain, b"message-key"));
        assert_eq!(next, hmac_derive(&chain, b"chain-key"));

        let (next2, message2) = chain_step(&next);
        assert_ne!(message, message2);
        assert_ne!(next, next2);
    }

    #[test]
    fn test_root_step_depends_on_inputs() {
        let (r1, c1) = derive_root_and_chain_keys(&[1u8; 32], &[2u8; 32]).unwrap();
        let (r2, c2) = derive_root_and_chain_keys(&[1u8; 32], &[3u8; 32]).unwrap();

        assert_ne!(r1, c1);
        assert_ne!(r1, r2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_seed_depends_on_info() {
        let a = expand_ratchet_seed(&[7u8; 32], b"Ailydian-E2EE-v1").unwrap();
        let b = expand_ratchet_seed(&[7u8; 32], b"Other-v1").unwrap();
        assert_ne!(a.as_bytes()[..], b.as_bytes()[..]);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&[1, 2, 3, 4], &[1, 2, 3, 4]));
        assert!(!constant_time_eq(&[1, 2, 3, 4], &[1, 2, 3, 5]));
        assert!(!constant_time_eq(&[1, 2, 3, 4], &[]));
    }
}
