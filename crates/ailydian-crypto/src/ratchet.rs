//! Double Ratchet
//!
//! Per-message keys come from a symmetric HMAC chain; Diffie-Hellman steps
//! refresh the root key whenever the remote side presents a new ratchet key.
//!
//! State transitions are pure: [`RatchetState::encrypt`] and
//! [`RatchetState::decrypt`] borrow the current state and return the next
//! one alongside their output. The caller decides when to commit, so a
//! failed decryption (or a failed persist) never disturbs the live state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead::{Aead, AeadAlgorithm, AeadKey, Nonce};
use crate::error::{CryptoError, Result};
use crate::kdf::{chain_step, derive_root_and_chain_keys};
use crate::keys::{KeyPair, PublicKeyBytes};
use crate::{DEFAULT_MAX_SKIP, MAX_MESSAGE_SIZE};

/// Length of the secret accepted by [`initialize_ratchet`]
pub const RATCHET_SEED_SIZE: usize = 64;

/// Root and chain keys a session starts from
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RatchetSeed {
    root_key: [u8; 32],
    chain_key: [u8; 32],
}

/// Split a 64-byte secret into root key (first half) and chain key (second half)
pub fn initialize_ratchet(secret: &[u8]) -> Result<RatchetSeed> {
    if secret.len() != RATCHET_SEED_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: RATCHET_SEED_SIZE,
            actual: secret.len(),
        });
    }

    let mut root_key = [0u8; 32];
    let mut chain_key = [0u8; 32];
    root_key.copy_from_slice(&secret[..32]);
    chain_key.copy_from_slice(&secret[32..]);
    Ok(RatchetSeed {
        root_key,
        chain_key,
    })
}

/// A single-use message key, zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey {
    key: [u8; 32],
    counter: u32,
}

impl MessageKey {
    /// Counter this key belongs to
    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn aead_key(&self) -> AeadKey {
        AeadKey::from_bytes(self.key)
    }
}

/// Limits and cipher choice carried with a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetLimits {
    /// Maximum number of skipped message keys kept (and skipped at once)
    pub max_skip: u32,
    /// Maximum plaintext length
    pub max_message_size: usize,
    /// Cipher used for outgoing messages
    pub aead: AeadAlgorithm,
}

impl Default for RatchetLimits {
    fn default() -> Self {
        Self {
            max_skip: DEFAULT_MAX_SKIP,
            max_message_size: MAX_MESSAGE_SIZE,
            aead: AeadAlgorithm::default(),
        }
    }
}

/// An encrypted ratchet message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Sender's current ratchet public key
    pub ratchet_key: PublicKeyBytes,
    /// Position in the sending chain
    pub counter: u32,
    /// Length of the sender's previous sending chain
    pub previous_counter: u32,
    /// Fresh random IV
    pub nonce: Nonce,
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    fn authenticated_data(&self, associated_data: &[u8]) -> Vec<u8> {
        header_aad(
            associated_data,
            &self.ratchet_key,
            self.counter,
            self.previous_counter,
            self.nonce.algorithm(),
        )
    }
}

fn header_aad(
    associated_data: &[u8],
    ratchet_key: &PublicKeyBytes,
    counter: u32,
    previous_counter: u32,
    algorithm: AeadAlgorithm,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(associated_data.len() + 32 + 9);
    aad.extend_from_slice(associated_data);
    aad.extend_from_slice(ratchet_key.as_bytes());
    aad.extend_from_slice(&counter.to_be_bytes());
    aad.extend_from_slice(&previous_counter.to_be_bytes());
    aad.push(algorithm.to_byte());
    aad
}

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SkippedKey {
    ratchet_key: [u8; 32],
    counter: u32,
    message_key: [u8; 32],
}

/// Double Ratchet state for one session
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RatchetState {
    root_key: [u8; 32],
    sending_chain: Option<[u8; 32]>,
    receiving_chain: Option<[u8; 32]>,
    send_counter: u32,
    receive_counter: u32,
    previous_counter: u32,
    own_ratchet: KeyPair,
    #[zeroize(skip)]
    remote_ratchet: Option<PublicKeyBytes>,
    skipped: Vec<SkippedKey>,
    #[zeroize(skip)]
    limits: RatchetLimits,
}

impl RatchetState {
    /// State for the party that ran the X3DH initiator side
    ///
    /// `own_ratchet` is the handshake ephemeral key; the seed chain is the
    /// first sending chain.
    pub fn initiator(seed: &RatchetSeed, own_ratchet: KeyPair, limits: RatchetLimits) -> Self {
        Self {
            root_key: seed.root_key,
            sending_chain: Some(seed.chain_key),
            receiving_chain: None,
            send_counter: 0,
            receive_counter: 0,
            previous_counter: 0,
            own_ratchet,
            remote_ratchet: None,
            skipped: Vec::new(),
            limits,
        }
    }

    /// State for the responder
    ///
    /// `own_ratchet` is the signed pre-key used in the handshake and
    /// `remote_ratchet` the initiator's ephemeral key; the seed chain is the
    /// first receiving chain.
    pub fn responder(
        seed: &RatchetSeed,
        own_ratchet: KeyPair,
        remote_ratchet: PublicKeyBytes,
        limits: RatchetLimits,
    ) -> Self {
        Self {
            root_key: seed.root_key,
            sending_chain: None,
            receiving_chain: Some(seed.chain_key),
            send_counter: 0,
            receive_counter: 0,
            previous_counter: 0,
            own_ratchet,
            remote_ratchet: Some(remote_ratchet),
            skipped: Vec::new(),
            limits,
        }
    }

    /// Next counter to be used for sending
    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Next counter expected on the receiving chain
    pub fn receive_counter(&self) -> u32 {
        self.receive_counter
    }

    /// Length of the previous sending chain
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Number of cached skipped message keys
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Current own ratchet public key
    pub fn own_ratchet_key(&self) -> PublicKeyBytes {
        self.own_ratchet.public_key()
    }

    /// Last ratchet key seen from the remote side
    pub fn remote_ratchet_key(&self) -> Option<PublicKeyBytes> {
        self.remote_ratchet
    }

    /// Encrypt a message, returning the advanced state and the message
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<(RatchetState, EncryptedMessage)> {
        let mut next = self.clone();
        next.ensure_sending_chain()?;

        let counter = next.send_counter;
        let following = counter.checked_add(1).ok_or(CryptoError::CounterOverflow)?;
        let message_key = next.next_sending_key()?;

        let ratchet_key = next.own_ratchet.public_key();
        let algorithm = next.limits.aead;
        let aad = header_aad(
            associated_data,
            &ratchet_key,
            counter,
            next.previous_counter,
            algorithm,
        );
        let (nonce, ciphertext) = Aead::new(algorithm)
            .with_max_message_size(next.limits.max_message_size)
            .seal(&message_key.aead_key(), plaintext, &aad)?;
        drop(message_key);

        next.send_counter = following;
        trace!(counter, "ratchet message sealed");

        let message = EncryptedMessage {
            ratchet_key,
            counter,
            previous_counter: next.previous_counter,
            nonce,
            ciphertext,
        };
        Ok((next, message))
    }

    /// Decrypt a message, returning the advanced state and the plaintext
    ///
    /// On error `self` is unchanged and the returned state never existed.
    pub fn decrypt(
        &self,
        message: &EncryptedMessage,
        associated_data: &[u8],
    ) -> Result<(RatchetState, Zeroizing<Vec<u8>>)> {
        let mut next = self.clone();
        let aad = message.authenticated_data(associated_data);
        let failed = CryptoError::DecryptionFailed {
            counter: message.counter,
        };

        if let Some(message_key) = next.take_skipped(&message.ratchet_key, message.counter) {
            trace!(counter = message.counter, "using cached skipped key");
            let plaintext = Aead::default()
                .open(&message_key.aead_key(), &message.nonce, &message.ciphertext, &aad)
                .ok_or(failed)?;
            return Ok((next, Zeroizing::new(plaintext)));
        }

        if next.remote_ratchet != Some(message.ratchet_key) {
            next.skip_message_keys(message.previous_counter)?;
            next.ratchet_forward(message.ratchet_key)?;
        }

        if message.counter < next.receive_counter {
            return Err(failed);
        }
        next.skip_message_keys(message.counter)?;

        let message_key = next.next_receiving_key()?;
        let plaintext = Aead::default()
            .open(&message_key.aead_key(), &message.nonce, &message.ciphertext, &aad)
            .ok_or(failed)?;

        Ok((next, Zeroizing::new(plaintext)))
    }

    /// Perform a Diffie-Hellman ratchet step towards a new remote key
    ///
    /// Derives a fresh receiving chain from the current own key, then
    /// generates a new own key and derives a fresh sending chain. Counters
    /// restart at zero; the old sending length becomes `previous_counter`.
    pub fn ratchet_forward(&mut self, remote: PublicKeyBytes) -> Result<()> {
        let dh = self.own_ratchet.diffie_hellman(&remote)?;
        let (root, receiving) = derive_root_and_chain_keys(&self.root_key, dh.as_bytes())?;
        self.replace_root(root);
        replace_chain(&mut self.receiving_chain, receiving);

        self.own_ratchet = KeyPair::generate()?;
        let dh = self.own_ratchet.diffie_hellman(&remote)?;
        let (root, sending) = derive_root_and_chain_keys(&self.root_key, dh.as_bytes())?;
        self.replace_root(root);
        replace_chain(&mut self.sending_chain, sending);

        self.previous_counter = self.send_counter;
        self.send_counter = 0;
        self.receive_counter = 0;
        self.remote_ratchet = Some(remote);

        debug!(previous_counter = self.previous_counter, "dh ratchet step");
        Ok(())
    }

    /// Serialize for persistence
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(bincode::serialize(self)?))
    }

    /// Restore from persisted bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    // The responder learns no remote sending chain for its first reply; it
    // steps against the initiator's ephemeral key before sending.
    fn ensure_sending_chain(&mut self) -> Result<()> {
        if self.sending_chain.is_some() {
            return Ok(());
        }
        let remote = self
            .remote_ratchet
            .ok_or(CryptoError::RatchetCorrupted("no sending chain and no remote key"))?;

        self.own_ratchet = KeyPair::generate()?;
        let dh = self.own_ratchet.diffie_hellman(&remote)?;
        let (root, sending) = derive_root_and_chain_keys(&self.root_key, dh.as_bytes())?;
        self.replace_root(root);
        self.sending_chain = Some(sending);
        self.previous_counter = self.send_counter;
        self.send_counter = 0;
        Ok(())
    }

    fn next_sending_key(&mut self) -> Result<MessageKey> {
        let chain = self
            .sending_chain
            .as_mut()
            .ok_or(CryptoError::RatchetCorrupted("missing sending chain"))?;
        let (next_chain, key) = chain_step(chain);
        chain.zeroize();
        *chain = next_chain;
        Ok(MessageKey {
            key,
            counter: self.send_counter,
        })
    }

    fn next_receiving_key(&mut self) -> Result<MessageKey> {
        let following = self
            .receive_counter
            .checked_add(1)
            .ok_or(CryptoError::CounterOverflow)?;
        let chain = self
            .receiving_chain
            .as_mut()
            .ok_or(CryptoError::RatchetCorrupted("missing receiving chain"))?;
        let (next_chain, key) = chain_step(chain);
        chain.zeroize();
        *chain = next_chain;

        let message_key = MessageKey {
            key,
            counter: self.receive_counter,
        };
        self.receive_counter = following;
        Ok(message_key)
    }

    fn skip_message_keys(&mut self, until: u32) -> Result<()> {
        if self.receiving_chain.is_none() || until <= self.receive_counter {
            return Ok(());
        }

        let gap = until - self.receive_counter;
        if gap > self.limits.max_skip {
            return Err(CryptoError::MessageGapTooLarge {
                gap,
                max: self.limits.max_skip,
            });
        }
        let remote = self
            .remote_ratchet
            .ok_or(CryptoError::RatchetCorrupted("receiving chain without remote key"))?;

        while self.receive_counter < until {
            let skipped = self.next_receiving_key()?;
            self.cache_skipped(SkippedKey {
                ratchet_key: remote.0,
                counter: skipped.counter,
                message_key: skipped.key,
            });
        }
        trace!(gap, "cached skipped message keys");
        Ok(())
    }

    fn cache_skipped(&mut self, key: SkippedKey) {
        let max = self.limits.max_skip as usize;
        while !self.skipped.is_empty() && self.skipped.len() >= max {
            // oldest first
            self.skipped.remove(0);
        }
        if max > 0 {
            self.skipped.push(key);
        }
    }

    fn take_skipped(&mut self, ratchet_key: &PublicKeyBytes, counter: u32) -> Option<MessageKey> {
        let index = self
            .skipped
            .iter()
            .position(|k| &k.ratchet_key == ratchet_key.as_bytes() && k.counter == counter)?;
        let entry = self.skipped.remove(index);
        Some(MessageKey {
            key: entry.message_key,
            counter: entry.counter,
        })
    }

    fn replace_root(&mut self, root: [u8; 32]) {
        self.root_key.zeroize();
        self.root_key = root;
    }
}

fn replace_chain(slot: &mut Option<[u8; 32]>, chain: [u8; 32]) {
    if let Some(old) = slot.as_mut() {
        old.zeroize();
    }
    *slot = Some(chain);
}

impl fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetState")
            .field("send_counter", &self.send_counter)
            .field("receive_counter", &self.receive_counter)
            .field("previous_counter", &self.previous_counter)
            .field("skipped", &self.skipped.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::random_bytes;

    const AD: &[u8] = b"associated-data";

    fn pair_with(limits: RatchetLimits) -> (RatchetState, RatchetState, RatchetSeed) {
        let secret = random_bytes(RATCHET_SEED_SIZE).unwrap();
        let seed = initialize_ratchet(&secret).unwrap();
        let ephemeral = KeyPair::generate().unwrap();
        let signed_pre_key = KeyPair::generate().unwrap();

        let alice = RatchetState::initiator(&seed, ephemeral.clone(), limits);
        let bob = RatchetState::responder(&seed, signed_pre_key, ephemeral.public_key(), limits);
        (alice, bob, seed)
    }

    fn pair() -> (RatchetState, RatchetState) {
        let (alice, bob, _) = pair_with(RatchetLimits::default());
        (alice, bob)
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_initialize_splits_secret() {
        let mut secret = [0u8; 64];
        secret[..32].fill(1);
        secret[32..].fill(2);

        let seed = initialize_ratchet(&secret).unwrap();
        assert_eq!(seed.root_key, [1u8; 32]);
        assert_eq!(seed.chain_key, [2u8; 32]);

        assert!(matches!(
            initialize_ratchet(&secret[..32]),
            Err(CryptoError::InvalidKeyLength { expected: 64, actual: 32 })
        ));
    }

    #[test]
    fn test_in_order_delivery() {
        let (mut alice, mut bob) = pair();

        for i in 0..3u32 {
            let (next, msg) = alice.encrypt(format!("msg {}", i).as_bytes(), AD).unwrap();
            assert_eq!(msg.counter, i);
            alice = next;

            let (next, pt) = bob.decrypt(&msg, AD).unwrap();
            assert_eq!(pt.as_slice(), format!("msg {}", i).as_bytes());
            bob = next;
        }

        assert_eq!(alice.send_counter(), 3);
        assert_eq!(bob.receive_counter(), 3);
        assert_eq!(bob.skipped_len(), 0);
    }

    #[test]
    fn test_out_of_order_delivery() {
        let (mut alice, mut bob) = pair();

        let mut messages = Vec::new();
        for i in 0..4u32 {
            let (next, msg) = alice.encrypt(format!("msg {}", i).as_bytes(), AD).unwrap();
            alice = next;
            messages.push(msg);
        }

        let (next, pt) = bob.decrypt(&messages[3], AD).unwrap();
        assert_eq!(pt.as_slice(), b"msg 3");
        assert_eq!(next.skipped_len(), 3);
        bob = next;

        for i in 0..3 {
            let (next, pt) = bob.decrypt(&messages[i], AD).unwrap();
            assert_eq!(pt.as_slice(), format!("msg {}", i).as_bytes());
            bob = next;
        }
        assert_eq!(bob.skipped_len(), 0);
        assert_eq!(bob.receive_counter(), 4);
    }

    #[test]
    fn test_ping_pong_ratchets() {
        let (mut alice, mut bob) = pair();
        let mut alice_keys = vec![alice.own_ratchet_key()];

        for round in 0..5 {
            let text = format!("alice {}", round);
            let (next, msg) = alice.encrypt(text.as_bytes(), AD).unwrap();
            alice = next;
            let (next, pt) = bob.decrypt(&msg, AD).unwrap();
            bob = next;
            assert_eq!(pt.as_slice(), text.as_bytes());

            let text = format!("bob {}", round);
            let (next, msg) = bob.encrypt(text.as_bytes(), AD).unwrap();
            bob = next;
            let (next, pt) = alice.decrypt(&msg, AD).unwrap();
            alice = next;
            assert_eq!(pt.as_slice(), text.as_bytes());

            alice_keys.push(alice.own_ratchet_key());
        }

        alice_keys.dedup();
        assert_eq!(alice_keys.len(), 6);
    }

    #[test]
    fn test_previous_chain_messages_after_step() {
        let (mut alice, mut bob) = pair();

        let (next, first) = alice.encrypt(b"first", AD).unwrap();
        alice = next;
        let (next, late) = alice.encrypt(b"late", AD).unwrap();
        alice = next;

        let (next, _) = bob.decrypt(&first, AD).unwrap();
        bob = next;
        let (next, reply) = bob.encrypt(b"reply", AD).unwrap();
        bob = next;
        let (next, _) = alice.decrypt(&reply, AD).unwrap();
        alice = next;

        let (next, after) = alice.encrypt(b"after step", AD).unwrap();
        alice = next;
        assert_eq!(after.previous_counter, 2);

        let (next, pt) = bob.decrypt(&after, AD).unwrap();
        bob = next;
        assert_eq!(pt.as_slice(), b"after step");
        assert_eq!(bob.skipped_len(), 1);

        let (_, pt) = bob.decrypt(&late, AD).unwrap();
        assert_eq!(pt.as_slice(), b"late");
        let _ = alice;
    }

    #[test]
    fn test_failed_decrypt_leaves_state() {
        let (alice, bob) = pair();
        let (_, mut msg) = alice.encrypt(b"hello", AD).unwrap();
        let before = bob.to_bytes().unwrap();

        msg.ciphertext[0] ^= 0xFF;
        let result = bob.decrypt(&msg, AD);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { counter: 0 })));
        assert_eq!(bob.to_bytes().unwrap(), before);

        msg.ciphertext[0] ^= 0xFF;
        assert!(bob.decrypt(&msg, b"other-ad").is_err());
        assert!(bob.decrypt(&msg, AD).is_ok());
    }

    #[test]
    fn test_counter_is_authenticated() {
        let (alice, bob) = pair();
        let (alice, _) = alice.encrypt(b"zero", AD).unwrap();
        let (_, mut msg) = alice.encrypt(b"one", AD).unwrap();

        msg.counter = 0;
        assert!(bob.decrypt(&msg, AD).is_err());
    }

    #[test]
    fn test_replay_rejected() {
        let (alice, bob) = pair();
        let (_, msg) = alice.encrypt(b"once", AD).unwrap();

        let (bob, _) = bob.decrypt(&msg, AD).unwrap();
        let result = bob.decrypt(&msg, AD);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { counter: 0 })));
    }

    #[test]
    fn test_gap_limit() {
        let limits = RatchetLimits {
            max_skip: 2,
            ..RatchetLimits::default()
        };
        let (mut alice, bob, _) = pair_with(limits);

        let mut last = None;
        for _ in 0..4 {
            let (next, msg) = alice.encrypt(b"x", AD).unwrap();
            alice = next;
            last = Some(msg);
        }

        let result = bob.decrypt(&last.unwrap(), AD);
        assert!(matches!(
            result,
            Err(CryptoError::MessageGapTooLarge { gap: 3, max: 2 })
        ));
    }

    #[test]
    fn test_message_keys_not_retained() {
        let (mut alice, mut bob, seed) = pair_with(RatchetLimits::default());
        let (_, first_message_key) = chain_step(&seed.chain_key);

        for _ in 0..5 {
            let (next, msg) = alice.encrypt(b"forward secret", AD).unwrap();
            alice = next;
            let (next, _) = bob.decrypt(&msg, AD).unwrap();
            bob = next;
        }

        for state in [&alice, &bob] {
            let bytes = state.to_bytes().unwrap();
            assert!(!contains(&bytes, &first_message_key));
            assert!(!contains(&bytes, &seed.chain_key));
        }
    }

    #[test]
    fn test_state_survives_serialization() {
        let (alice, bob) = pair();
        let (alice, msg) = alice.encrypt(b"one", AD).unwrap();
        let (bob, _) = bob.decrypt(&msg, AD).unwrap();

        let alice = RatchetState::from_bytes(&alice.to_bytes().unwrap()).unwrap();
        let bob = RatchetState::from_bytes(&bob.to_bytes().unwrap()).unwrap();

        let (_, msg) = alice.encrypt(b"two", AD).unwrap();
        let (bob, pt) = bob.decrypt(&msg, AD).unwrap();
        assert_eq!(pt.as_slice(), b"two");
        assert_eq!(bob.receive_counter(), 2);
    }

    #[test]
    fn test_empty_and_large_messages() {
        let (alice, bob) = pair();

        let (alice, msg) = alice.encrypt(b"", AD).unwrap();
        let (bob, pt) = bob.decrypt(&msg, AD).unwrap();
        assert!(pt.is_empty());

        let large = vec![0x42u8; 10_000];
        let (_, msg) = alice.encrypt(&large, AD).unwrap();
        let (_, pt) = bob.decrypt(&msg, AD).unwrap();
        assert_eq!(pt.as_slice(), large.as_slice());
    }

    #[test]
    fn test_xchacha_sessions() {
        let limits = RatchetLimits {
            aead: AeadAlgorithm::XChaCha20Poly1305,
            ..RatchetLimits::default()
        };
        let (alice, bob, _) = pair_with(limits);

        let (_, msg) = alice.encrypt(b"hi", AD).unwrap();
        assert_eq!(msg.nonce.algorithm(), AeadAlgorithm::XChaCha20Poly1305);
        let (_, pt) = bob.decrypt(&msg, AD).unwrap();
        assert_eq!(pt.as_slice(), b"hi");
    }
}
