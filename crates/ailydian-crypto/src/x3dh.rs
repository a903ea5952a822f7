//! X3DH (Extended Triple Diffie-Hellman) Key Agreement
//!
//! Asynchronous session establishment between an initiator (Alice) and a
//! responder (Bob) who published a pre-key bundle.
//!
//! # Protocol Overview
//!
//! 1. Bob publishes his identity key (IK), a signed pre-key (SPK) and
//!    one-time pre-keys (OPK)
//! 2. Alice fetches a bundle, verifies the SPK signature, generates an
//!    ephemeral key (EK) and computes:
//!    - DH1 = DH(IK_A, SPK_B)
//!    - DH2 = DH(EK_A, IK_B)
//!    - DH3 = DH(EK_A, SPK_B)
//!    - DH4 = DH(EK_A, OPK_B) (if OPK present)
//! 3. Shared secret = HKDF-SHA256(DH1 || DH2 || DH3 [|| DH4], info)
//! 4. Associated data = IK_B || EK_A

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::Result;
use crate::identity::{IdentityKeyPair, IdentityPublicKey};
use crate::kdf::{DerivedKey, KeyDerivationContext};
use crate::keys::{KeyPair, OneTimePreKey, PublicKeyBytes, SIGNATURE_SIZE};

/// Length of the associated data produced by the handshake
pub const ASSOCIATED_DATA_SIZE: usize = 64 + 32;

/// A pre-key bundle as published by a responder device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct X3dhBundle {
    /// Responder identity key
    pub identity_key: IdentityPublicKey,
    /// Signed pre-key id
    pub signed_pre_key_id: u32,
    /// Signed pre-key public half
    pub signed_pre_key: PublicKeyBytes,
    /// Signature over `signed_pre_key` by the identity signing key
    #[serde(with = "hex::serde")]
    pub signed_pre_key_signature: [u8; SIGNATURE_SIZE],
    /// One-time pre-key, absent when the pool is exhausted
    pub one_time_pre_key: Option<OneTimePreKey>,
}

impl X3dhBundle {
    /// Check the signed pre-key signature
    pub fn verify_signature(&self) -> bool {
        crate::keys::verify(
            self.signed_pre_key.as_bytes(),
            &self.signed_pre_key_signature,
            self.identity_key.signing_key_bytes(),
        )
    }
}

/// Output of a completed handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct X3dhResult {
    shared_secret: [u8; 32],
    associated_data: Vec<u8>,
    #[zeroize(skip)]
    ephemeral_key: PublicKeyBytes,
}

impl X3dhResult {
    /// The 32-byte shared secret
    pub fn shared_secret(&self) -> &[u8; 32] {
        &self.shared_secret
    }

    /// Responder identity key followed by the initiator ephemeral key
    pub fn associated_data(&self) -> &[u8] {
        &self.associated_data
    }

    /// The initiator ephemeral public key
    pub fn ephemeral_key(&self) -> &PublicKeyBytes {
        &self.ephemeral_key
    }
}

/// Handshake parameters attached to messages until the responder replies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeHeader {
    /// Initiator identity key
    pub identity_key: IdentityPublicKey,
    /// Initiator ephemeral key
    pub ephemeral_key: PublicKeyBytes,
    /// Signed pre-key the initiator used
    pub signed_pre_key_id: u32,
    /// One-time pre-key the initiator used, if any
    pub one_time_pre_key_id: Option<u32>,
}

/// Run the initiator side of X3DH
///
/// The bundle signature is checked before any key agreement; a bad
/// signature yields [`CryptoError::BundleSignatureInvalid`](crate::CryptoError::BundleSignatureInvalid).
pub fn initiate_x3dh(
    my_identity: &IdentityKeyPair,
    their_bundle: &X3dhBundle,
    my_ephemeral: &KeyPair,
    info: &[u8],
) -> Result<X3dhResult> {
    if !their_bundle.verify_signature() {
        warn!(
            target: "ailydian::security",
            signed_pre_key_id = their_bundle.signed_pre_key_id,
            "rejecting bundle with invalid signed pre-key signature"
        );
        return Err(crate::CryptoError::BundleSignatureInvalid);
    }

    let their_identity_dh = their_bundle.identity_key.dh_key();
    let dh1 = my_identity.diffie_hellman(&their_bundle.signed_pre_key)?;
    let dh2 = my_ephemeral.diffie_hellman(their_identity_dh)?;
    let dh3 = my_ephemeral.diffie_hellman(&their_bundle.signed_pre_key)?;
    let dh4 = their_bundle
        .one_time_pre_key
        .as_ref()
        .map(|opk| my_ephemeral.diffie_hellman(&opk.public_key))
        .transpose()?;

    let mut ikm = Zeroizing::new(Vec::with_capacity(32 * 4));
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());
    if let Some(dh4) = &dh4 {
        ikm.extend_from_slice(dh4.as_bytes());
    }

    let ephemeral_key = my_ephemeral.public_key();
    debug!(
        one_time_pre_key = dh4.is_some(),
        "x3dh initiator agreement complete"
    );

    finish(&ikm, info, &their_bundle.identity_key, ephemeral_key)
}

/// Run the responder side of X3DH
pub fn respond_x3dh(
    my_identity: &IdentityKeyPair,
    my_signed_pre_key: &KeyPair,
    my_one_time_pre_key: Option<&KeyPair>,
    their_identity: &IdentityPublicKey,
    their_ephemeral: &PublicKeyBytes,
    info: &[u8],
) -> Result<X3dhResult> {
    let dh1 = my_signed_pre_key.diffie_hellman(their_identity.dh_key())?;
    let dh2 = my_identity.diffie_hellman(their_ephemeral)?;
    let dh3 = my_signed_pre_key.diffie_hellman(their_ephemeral)?;
    let dh4 = my_one_time_pre_key
        .map(|opk| opk.diffie_hellman(their_ephemeral))
        .transpose()?;

    let mut ikm = Zeroizing::new(Vec::with_capacity(32 * 4));
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());
    if let Some(dh4) = &dh4 {
        ikm.extend_from_slice(dh4.as_bytes());
    }

    debug!(
        one_time_pre_key = dh4.is_some(),
        "x3dh responder agreement complete"
    );

    finish(&ikm, info, &my_identity.public_key(), *their_ephemeral)
}

fn finish(
    ikm: &[u8],
    info: &[u8],
    responder_identity: &IdentityPublicKey,
    ephemeral_key: PublicKeyBytes,
) -> Result<X3dhResult> {
    let secret: DerivedKey<32> = KeyDerivationContext::new(None, ikm).derive(info)?;

    let mut associated_data = Vec::with_capacity(ASSOCIATED_DATA_SIZE);
    associated_data.extend_from_slice(&responder_identity.to_bytes());
    associated_data.extend_from_slice(ephemeral_key.as_bytes());

    Ok(X3dhResult {
        shared_secret: *secret.as_bytes(),
        associated_data,
        ephemeral_key,
    })
}
