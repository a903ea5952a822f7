//! Persisted session records
//!
//! A record holds the current ratchet session with a peer plus a few
//! archived ones. Archived sessions only decrypt; they cover messages
//! still in flight after a newer handshake took over and the crossed
//! handshakes of two peers that started talking at the same time.

use std::collections::VecDeque;

use ailydian_core::Timestamp;
use ailydian_crypto::{
    identity::IdentityPublicKey,
    keys::PublicKeyBytes,
    ratchet::{EncryptedMessage, RatchetState},
    x3dh::HandshakeHeader,
    CryptoError,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{ProtocolError, Result};

/// Archived sessions kept per peer
pub const MAX_ARCHIVED_STATES: usize = 8;

/// Handshake base keys remembered per peer
pub const MAX_SEEN_BASE_KEYS: usize = 128;

/// One ratchet session with a peer
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Identity key the session was established with
    pub remote_identity: IdentityPublicKey,
    /// Handshake associated data bound into every message
    pub associated_data: Vec<u8>,
    /// Ratchet state
    pub ratchet: RatchetState,
    /// Attached to outgoing messages until the peer replies
    pub pending_handshake: Option<HandshakeHeader>,
    /// Initiator ephemeral key, set when this side responded
    pub remote_base_key: Option<PublicKeyBytes>,
    /// Establishment time
    pub created_at: Timestamp,
}

impl SessionState {
    /// Whether this session survives a crossed handshake carrying `header`
    ///
    /// Both peers started a session and neither has heard back yet. Each
    /// side keeps the session with the lower base key, so they settle on
    /// the same one.
    pub fn outranks(&self, header: &HandshakeHeader) -> bool {
        match &self.pending_handshake {
            Some(own) => {
                self.remote_identity == header.identity_key
                    && own.ephemeral_key < header.ephemeral_key
            }
            None => false,
        }
    }
}

/// Everything needed to continue a conversation with one peer
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Peer id
    pub peer: String,
    /// Session used for sending
    pub current: SessionState,
    /// Older sessions, most recent first
    pub archived: VecDeque<SessionState>,
    /// Base keys of every handshake accepted from this peer, oldest first
    pub seen_base_keys: VecDeque<PublicKeyBytes>,
    /// Last successful send or receive
    pub last_used: Timestamp,
}

impl SessionRecord {
    /// Start a record from its first session
    pub fn new(peer: impl Into<String>, state: SessionState) -> Self {
        let mut record = Self {
            peer: peer.into(),
            current: state,
            archived: VecDeque::new(),
            seen_base_keys: VecDeque::new(),
            last_used: Timestamp::now(),
        };
        if let Some(base_key) = record.current.remote_base_key {
            record.remember_base_key(base_key);
        }
        record
    }

    /// Identity of the current session
    pub fn remote_identity(&self) -> &IdentityPublicKey {
        &self.current.remote_identity
    }

    /// Make `state` current, archiving the previous session
    pub fn replace_current(&mut self, state: SessionState) {
        if let Some(base_key) = state.remote_base_key {
            self.remember_base_key(base_key);
        }
        let previous = std::mem::replace(&mut self.current, state);
        self.archive(previous);
    }

    /// Keep `state` for decryption only
    pub fn archive(&mut self, state: SessionState) {
        if let Some(base_key) = state.remote_base_key {
            self.remember_base_key(base_key);
        }
        self.archived.push_front(state);
        self.archived.truncate(MAX_ARCHIVED_STATES);
    }

    /// Remember a handshake base key, forgetting the oldest past the limit
    pub fn remember_base_key(&mut self, base_key: PublicKeyBytes) {
        if self.seen_base_keys.contains(&base_key) {
            return;
        }
        self.seen_base_keys.push_back(base_key);
        while self.seen_base_keys.len() > MAX_SEEN_BASE_KEYS {
            self.seen_base_keys.pop_front();
        }
    }

    /// Whether a handshake with this base key was accepted before
    pub fn has_seen_base_key(&self, base_key: &PublicKeyBytes) -> bool {
        self.seen_base_keys.contains(base_key)
    }

    /// Index of the session a handshake with this base key opened
    ///
    /// Index 0 is the current session, `i + 1` the archived session `i`.
    pub fn state_for_base_key(&self, base_key: &PublicKeyBytes) -> Option<usize> {
        self.states()
            .position(|state| state.remote_base_key.as_ref() == Some(base_key))
    }

    /// Current session followed by the archived ones
    pub fn states(&self) -> impl Iterator<Item = &SessionState> {
        std::iter::once(&self.current).chain(self.archived.iter())
    }

    /// Decrypt with the session at `index`
    ///
    /// Returns the updated record; `self` is untouched.
    pub fn decrypt_with(
        &self,
        index: usize,
        message: &EncryptedMessage,
    ) -> std::result::Result<(SessionRecord, Zeroizing<Vec<u8>>), CryptoError> {
        let state = self.states().nth(index).ok_or(CryptoError::DecryptionFailed {
            counter: message.counter,
        })?;
        let (ratchet, plaintext) = state.ratchet.decrypt(message, &state.associated_data)?;

        let mut next = self.clone();
        let target = if index == 0 {
            &mut next.current
        } else {
            &mut next.archived[index - 1]
        };
        target.ratchet = ratchet;
        target.pending_handshake = None;
        Ok((next, plaintext))
    }

    /// Decrypt with the first session that accepts the message
    ///
    /// Fails with the current session's error when none does.
    pub fn decrypt(
        &self,
        message: &EncryptedMessage,
    ) -> std::result::Result<(SessionRecord, Zeroizing<Vec<u8>>), CryptoError> {
        let mut first_error = None;
        for index in 0..=self.archived.len() {
            match self.decrypt_with(index, message) {
                Ok(decrypted) => return Ok(decrypted),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or(CryptoError::DecryptionFailed {
            counter: message.counter,
        }))
    }

    /// Serialize for storage
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        bincode::serialize(self)
            .map(Zeroizing::new)
            .map_err(|e| ProtocolError::malformed(format!("session encode: {}", e)))
    }

    /// Restore from storage
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ProtocolError::malformed(format!("session decode: {}", e)))
    }

    /// Whether this side opened the session and is still waiting for a reply
    pub fn is_awaiting_reply(&self) -> bool {
        self.current.pending_handshake.is_some()
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("peer", &self.peer)
            .field("send_counter", &self.current.ratchet.send_counter())
            .field("receive_counter", &self.current.ratchet.receive_counter())
            .field("awaiting_reply", &self.is_awaiting_reply())
            .field("archived", &self.archived.len())
            .finish_non_exhaustive()
    }
}
