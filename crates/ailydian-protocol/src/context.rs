//! Session orchestration
//!
//! [`SignalContext`] ties the local device, the key store and the bundle
//! directory together. Every encrypt or decrypt for a peer runs under that
//! peer's lock. The ratchet hands back a new state, the context persists it,
//! and only then replaces the cached one, so a failed decrypt or a failed
//! write leaves the session exactly as it was.

use std::sync::Arc;

use ailydian_core::{
    provision_device,
    storage::{namespace, KeyValueStore},
    DeviceId, DeviceStore, DeviceType, ProtocolConfig, Timestamp,
};
use ailydian_crypto::{
    identity::{IdentityKeyPair, IdentityPublicKey},
    kdf::{constant_time_eq, expand_ratchet_seed},
    keys::KeyPair,
    ratchet::{initialize_ratchet, EncryptedMessage, RatchetSeed, RatchetState},
    safety::{generate_safety_number_with_scheme, SafetyNumber},
    x3dh::{initiate_x3dh, respond_x3dh, HandshakeHeader, X3dhBundle, X3dhResult},
    CryptoError,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::directory::BundleDirectory;
use crate::error::{ProtocolError, Result};
use crate::session::{SessionRecord, SessionState};
use crate::wire::Envelope;

type SessionSlot = Arc<Mutex<Option<SessionRecord>>>;
type SessionGuard = OwnedMutexGuard<Option<SessionRecord>>;

struct LocalIdentity {
    device_id: DeviceId,
    identity: IdentityKeyPair,
}

/// Outcome of an accepted message before it is persisted
struct Received {
    record: SessionRecord,
    plaintext: Zeroizing<Vec<u8>>,
    /// Set when the message opened a session, with its one-time pre-key id
    opened: Option<Option<u32>>,
}

/// Per-application protocol context
pub struct SignalContext {
    config: ProtocolConfig,
    user_id: String,
    store: Arc<dyn KeyValueStore>,
    devices: DeviceStore,
    directory: Arc<dyn BundleDirectory>,
    local: OnceCell<LocalIdentity>,
    sessions: DashMap<String, SessionSlot>,
}

impl SignalContext {
    /// Create a context for `user_id`
    ///
    /// Nothing is read or generated until [`initialize`](Self::initialize).
    pub fn new(
        config: ProtocolConfig,
        user_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        directory: Arc<dyn BundleDirectory>,
    ) -> Result<Self> {
        config.validate().map_err(ProtocolError::Configuration)?;

        Ok(Self {
            config,
            user_id: user_id.into(),
            devices: DeviceStore::new(store.clone()),
            store,
            directory,
            local: OnceCell::new(),
            sessions: DashMap::new(),
        })
    }

    /// Load the local device, provisioning it on first run
    ///
    /// Idempotent; concurrent callers share one provisioning.
    pub async fn initialize(&self) -> Result<DeviceId> {
        let local = self
            .local
            .get_or_try_init(|| self.load_or_provision())
            .await?;
        Ok(local.device_id.clone())
    }

    async fn load_or_provision(&self) -> Result<LocalIdentity> {
        let existing = self
            .devices
            .local_device_id()
            .await
            .map_err(ProtocolError::storage("load local device"))?;

        let device = match existing {
            Some(id) => self
                .devices
                .load_record(&id)
                .await
                .map_err(ProtocolError::storage("load local device"))?,
            None => {
                let device = provision_device(
                    self.user_id.clone(),
                    DeviceType::Primary,
                    &self.config.pre_key_policy(),
                )
                .map_err(ProtocolError::provision)?;
                self.devices
                    .store(&device)
                    .await
                    .map_err(ProtocolError::storage("store device"))?;
                self.devices
                    .set_local_device(&device.id)
                    .await
                    .map_err(ProtocolError::storage("store device"))?;
                device
            }
        };

        info!(user = %self.user_id, device = %device.id, "context initialized");
        Ok(LocalIdentity {
            device_id: device.id.clone(),
            identity: device.identity_key.clone(),
        })
    }

    fn local(&self) -> Result<&LocalIdentity> {
        self.local.get().ok_or(ProtocolError::NotInitialized)
    }

    fn info(&self) -> &[u8] {
        self.config.hkdf_info.as_bytes()
    }

    fn slot(&self, peer: &str) -> SessionSlot {
        self.sessions
            .entry(peer.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop the slot of a peer left without a session
    fn release_if_empty(&self, peer: &str, guard: SessionGuard) {
        if guard.is_none() {
            self.sessions.remove(peer);
        }
    }

    /// Lock the session slot of `peer`
    ///
    /// A slot removed by `destroy_session` while we waited is stale; retry
    /// on the live one.
    async fn lock_session(&self, peer: &str) -> SessionGuard {
        loop {
            let slot = self.slot(peer);
            let guard = slot.clone().lock_owned().await;
            let live = self
                .sessions
                .get(peer)
                .map_or(false, |entry| Arc::ptr_eq(entry.value(), &slot));
            if live {
                return guard;
            }
        }
    }

    /// Local user id
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Active configuration
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Id of the local device
    pub fn local_device_id(&self) -> Result<DeviceId> {
        Ok(self.local()?.device_id.clone())
    }

    /// Encrypt text for `recipient_id`; returns the base64 envelope
    pub async fn encrypt_message(&self, recipient_id: &str, plaintext: &str) -> Result<String> {
        let envelope = self.encrypt_bytes(recipient_id, plaintext.as_bytes()).await?;
        Ok(BASE64.encode(envelope))
    }

    /// Decrypt a base64 envelope from `sender_id` into text
    pub async fn decrypt_message(&self, sender_id: &str, encoded: &str) -> Result<String> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ProtocolError::malformed(format!("base64: {}", e)))?;
        let plaintext = self.decrypt_bytes(sender_id, &bytes).await?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| ProtocolError::malformed("plaintext is not UTF-8"))
    }

    /// Encrypt bytes for `recipient_id`; returns the wire envelope
    ///
    /// Starts a session from the recipient's published bundle when none
    /// exists.
    pub async fn encrypt_bytes(&self, recipient_id: &str, plaintext: &[u8]) -> Result<Bytes> {
        let local = self.local()?;
        let mut guard = self.lock_session(recipient_id).await;
        let result = self.encrypt_locked(local, recipient_id, &mut guard, plaintext).await;
        self.release_if_empty(recipient_id, guard);
        result
    }

    async fn encrypt_locked(
        &self,
        local: &LocalIdentity,
        recipient_id: &str,
        guard: &mut SessionGuard,
        plaintext: &[u8],
    ) -> Result<Bytes> {
        if guard.is_none() {
            **guard = self.load_session(recipient_id).await?;
        }

        let (mut record, new_session) = match guard.as_ref() {
            Some(existing) => (existing.clone(), false),
            None => (self.initiate_session(local, recipient_id).await?, true),
        };

        let (ratchet, message) = record
            .current
            .ratchet
            .encrypt(plaintext, &record.current.associated_data)
            .map_err(ProtocolError::crypto(recipient_id))?;
        record.current.ratchet = ratchet;
        record.last_used = Timestamp::now();

        let envelope = Envelope {
            handshake: record.current.pending_handshake,
            message,
        };
        self.persist_session(&record, new_session).await?;

        debug!(
            peer = recipient_id,
            counter = envelope.message.counter,
            handshake = envelope.handshake.is_some(),
            "encrypted message"
        );
        **guard = Some(record);
        Ok(envelope.encode())
    }

    /// Decrypt a wire envelope from `sender_id`
    ///
    /// A handshake header opens a responder session when none exists.
    pub async fn decrypt_bytes(
        &self,
        sender_id: &str,
        envelope: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let envelope = Envelope::decode(envelope)?;
        let local = self.local()?;
        let mut guard = self.lock_session(sender_id).await;
        let result = self.decrypt_locked(local, sender_id, &mut guard, &envelope).await;
        self.release_if_empty(sender_id, guard);
        result
    }

    async fn decrypt_locked(
        &self,
        local: &LocalIdentity,
        sender_id: &str,
        guard: &mut SessionGuard,
        envelope: &Envelope,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if guard.is_none() {
            **guard = self.load_session(sender_id).await?;
        }

        let Received {
            mut record,
            plaintext,
            opened,
        } = match (guard.as_ref(), envelope.handshake.as_ref()) {
            (existing, Some(header)) => {
                self.receive_handshake(local, sender_id, existing, header, &envelope.message)
                    .await?
            }
            (Some(existing), None) => {
                let (record, plaintext) = existing
                    .decrypt(&envelope.message)
                    .map_err(ProtocolError::crypto(sender_id))?;
                Received {
                    record,
                    plaintext,
                    opened: None,
                }
            }
            (None, None) => {
                return Err(ProtocolError::SessionNotFound {
                    peer: sender_id.to_string(),
                })
            }
        };
        record.last_used = Timestamp::now();

        self.persist_session(&record, opened.is_some()).await?;
        if let Some(Some(pre_key_id)) = opened {
            // the session is committed; a lingering claimed key only costs space
            if let Err(e) = self
                .devices
                .take_claimed_pre_key(&local.device_id, pre_key_id)
                .await
            {
                warn!(peer = sender_id, pre_key_id, error = %e, "failed to consume one-time pre-key");
            }
        }

        debug!(
            peer = sender_id,
            counter = envelope.message.counter,
            "decrypted message"
        );
        **guard = Some(record);
        Ok(plaintext)
    }

    async fn initiate_session(&self, local: &LocalIdentity, peer: &str) -> Result<SessionRecord> {
        let bundle = self
            .directory
            .fetch_bundle(peer)
            .await?
            .ok_or_else(|| ProtocolError::BundleUnavailable {
                peer: peer.to_string(),
            })?;
        self.verify_identity(peer, &bundle.identity_key, None).await?;

        let ephemeral = KeyPair::generate().map_err(ProtocolError::crypto(peer))?;
        let x3dh = initiate_x3dh(&local.identity, &bundle, &ephemeral, self.info())
            .map_err(ProtocolError::crypto(peer))?;
        let seed = self.seed(&x3dh, peer)?;

        let header = HandshakeHeader {
            identity_key: local.identity.public_key(),
            ephemeral_key: *x3dh.ephemeral_key(),
            signed_pre_key_id: bundle.signed_pre_key_id,
            one_time_pre_key_id: bundle.one_time_pre_key.as_ref().map(|k| k.id),
        };
        info!(
            peer,
            signed_pre_key_id = header.signed_pre_key_id,
            pre_key_id = header.one_time_pre_key_id,
            "starting session"
        );

        let state = SessionState {
            remote_identity: bundle.identity_key,
            associated_data: x3dh.associated_data().to_vec(),
            ratchet: RatchetState::initiator(&seed, ephemeral, self.config.ratchet_limits()),
            pending_handshake: Some(header),
            remote_base_key: None,
            created_at: Timestamp::now(),
        };
        Ok(SessionRecord::new(peer, state))
    }

    /// Route a message carrying a handshake header
    ///
    /// A base key seen before goes to the session it opened, or is refused
    /// once that session has left the archive. An unseen one opens a new
    /// responder session, which becomes current unless our own unanswered
    /// handshake outranks it.
    async fn receive_handshake(
        &self,
        local: &LocalIdentity,
        peer: &str,
        existing: Option<&SessionRecord>,
        header: &HandshakeHeader,
        message: &EncryptedMessage,
    ) -> Result<Received> {
        if let Some(record) = existing {
            if let Some(index) = record.state_for_base_key(&header.ephemeral_key) {
                let (record, plaintext) = record
                    .decrypt_with(index, message)
                    .map_err(ProtocolError::crypto(peer))?;
                return Ok(Received {
                    record,
                    plaintext,
                    opened: None,
                });
            }
            if record.has_seen_base_key(&header.ephemeral_key) {
                warn!(
                    target: "ailydian::security",
                    peer,
                    counter = message.counter,
                    "handshake replayed after its session was retired"
                );
                return Err(ProtocolError::crypto(peer)(CryptoError::DecryptionFailed {
                    counter: message.counter,
                }));
            }
        }

        let known = existing.map(SessionRecord::remote_identity);
        let (mut state, one_time_pre_key_id) = self.respond_session(local, peer, header, known).await?;
        let (ratchet, plaintext) = state
            .ratchet
            .decrypt(message, &state.associated_data)
            .map_err(ProtocolError::crypto(peer))?;
        state.ratchet = ratchet;

        let record = match existing {
            None => SessionRecord::new(peer, state),
            Some(record) => {
                let mut record = record.clone();
                if record.current.outranks(header) {
                    debug!(peer, "crossed handshake; keeping our session");
                    record.archive(state);
                } else {
                    record.replace_current(state);
                }
                record
            }
        };
        Ok(Received {
            record,
            plaintext,
            opened: Some(one_time_pre_key_id),
        })
    }

    async fn respond_session(
        &self,
        local: &LocalIdentity,
        peer: &str,
        header: &HandshakeHeader,
        known: Option<&IdentityPublicKey>,
    ) -> Result<(SessionState, Option<u32>)> {
        self.verify_identity(peer, &header.identity_key, known).await?;

        let device = self
            .devices
            .load_record(&local.device_id)
            .await
            .map_err(ProtocolError::storage("load local device"))?;
        let signed = device
            .signed_pre_key_by_id(header.signed_pre_key_id)
            .ok_or_else(|| ProtocolError::UnknownPreKey {
                peer: peer.to_string(),
                kind: "signed",
                id: header.signed_pre_key_id,
            })?;

        let one_time = match header.one_time_pre_key_id {
            Some(id) => {
                let key = self
                    .devices
                    .claimed_pre_key(&local.device_id, id)
                    .await
                    .map_err(ProtocolError::storage("load one-time pre-key"))?;
                match key {
                    Some(key) => Some(key),
                    None => {
                        warn!(
                            target: "ailydian::security",
                            peer,
                            pre_key_id = id,
                            "handshake references a missing one-time pre-key"
                        );
                        return Err(ProtocolError::UnknownPreKey {
                            peer: peer.to_string(),
                            kind: "one-time",
                            id,
                        });
                    }
                }
            }
            None => None,
        };

        let x3dh = respond_x3dh(
            &local.identity,
            &signed.key_pair,
            one_time.as_ref().map(|k| &k.key_pair),
            &header.identity_key,
            &header.ephemeral_key,
            self.info(),
        )
        .map_err(ProtocolError::crypto(peer))?;
        let seed = self.seed(&x3dh, peer)?;

        let ratchet = RatchetState::responder(
            &seed,
            signed.key_pair.clone(),
            header.ephemeral_key,
            self.config.ratchet_limits(),
        );

        info!(
            peer,
            signed_pre_key_id = header.signed_pre_key_id,
            pre_key_id = header.one_time_pre_key_id,
            "accepting session"
        );

        let state = SessionState {
            remote_identity: header.identity_key,
            associated_data: x3dh.associated_data().to_vec(),
            ratchet,
            pending_handshake: None,
            remote_base_key: Some(header.ephemeral_key),
            created_at: Timestamp::now(),
        };
        Ok((state, header.one_time_pre_key_id))
    }

    fn seed(&self, x3dh: &X3dhResult, peer: &str) -> Result<RatchetSeed> {
        let expanded =
            expand_ratchet_seed(x3dh.shared_secret(), self.info()).map_err(ProtocolError::crypto(peer))?;
        initialize_ratchet(expanded.as_bytes()).map_err(ProtocolError::crypto(peer))
    }

    /// Check a presented identity against the pin, or against the
    /// identity of an existing session when no pin was written
    async fn verify_identity(
        &self,
        peer: &str,
        identity: &IdentityPublicKey,
        known: Option<&IdentityPublicKey>,
    ) -> Result<()> {
        let pinned = self
            .store
            .get(namespace::IDENTITIES, peer)
            .await
            .map_err(ProtocolError::storage("load trusted identity"))?;
        let trusted = match pinned {
            Some(pinned) => Some(pinned.to_vec()),
            None => known.map(|k| k.to_bytes().to_vec()),
        };

        match trusted {
            Some(trusted) if !constant_time_eq(&trusted, &identity.to_bytes()) => {
                warn!(
                    target: "ailydian::security",
                    peer,
                    "identity key changed since first contact; rejecting"
                );
                Err(ProtocolError::UntrustedIdentity {
                    peer: peer.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn load_session(&self, peer: &str) -> Result<Option<SessionRecord>> {
        let bytes = self
            .store
            .get(namespace::SESSIONS, peer)
            .await
            .map_err(ProtocolError::storage("load session"))?;
        bytes.map(|b| SessionRecord::from_bytes(&b)).transpose()
    }

    /// Write the record, then pin the identity of a newly opened session
    ///
    /// The pin follows the session so a failed session write leaves no pin
    /// behind. A failed pin only logs; the session's own identity keeps
    /// guarding later handshakes.
    async fn persist_session(&self, record: &SessionRecord, pin: bool) -> Result<()> {
        let bytes = record.to_bytes()?;
        self.store
            .put(namespace::SESSIONS, &record.peer, &bytes)
            .await
            .map_err(ProtocolError::storage("persist session"))?;

        if pin {
            if let Err(e) = self
                .store
                .put(
                    namespace::IDENTITIES,
                    &record.peer,
                    &record.remote_identity().to_bytes(),
                )
                .await
            {
                warn!(
                    target: "ailydian::security",
                    peer = %record.peer,
                    error = %e,
                    "failed to pin identity"
                );
            }
        }

        self.store
            .flush()
            .await
            .map_err(ProtocolError::storage("flush"))
    }

    /// Provision and store an additional device
    pub async fn provision_device(&self, name: &str, device_type: DeviceType) -> Result<DeviceId> {
        let device = provision_device(name, device_type, &self.config.pre_key_policy())
            .map_err(ProtocolError::provision)?;
        self.devices
            .store(&device)
            .await
            .map_err(ProtocolError::storage("store device"))?;
        Ok(device.id.clone())
    }

    /// Claim a bundle from any stored device
    pub async fn device_bundle(&self, device_id: &DeviceId) -> Result<X3dhBundle> {
        self.devices
            .claim_bundle(device_id)
            .await
            .map_err(ProtocolError::storage("claim bundle"))
    }

    /// Claim a bundle from the local device for publishing
    ///
    /// Tops up the pool afterwards if it fell below the low-water mark.
    pub async fn publish_bundle(&self) -> Result<X3dhBundle> {
        let device_id = self.local()?.device_id.clone();
        let bundle = self.device_bundle(&device_id).await?;

        let generated = self.replenish_pre_keys().await?;
        if generated > 0 {
            debug!(device = %device_id, generated, "pool replenished after publish");
        }
        Ok(bundle)
    }

    /// Top up the local pool; returns keys generated
    pub async fn replenish_pre_keys(&self) -> Result<u32> {
        let device_id = &self.local()?.device_id;
        self.devices
            .replenish_pre_keys(device_id, &self.config.pre_key_policy())
            .await
            .map_err(ProtocolError::storage("replenish pre-keys"))
    }

    /// Rotate the local signed pre-key if the interval elapsed
    pub async fn rotate_signed_pre_key_if_due(&self) -> Result<bool> {
        let device_id = &self.local()?.device_id;
        self.devices
            .rotate_signed_pre_key_if_due(device_id, Timestamp::now(), &self.config.pre_key_policy())
            .await
            .map_err(ProtocolError::storage("rotate signed pre-key"))
    }

    /// Safety number between the local identity and a peer's
    pub fn safety_number(
        &self,
        peer_id: &str,
        peer_identity: &IdentityPublicKey,
    ) -> Result<SafetyNumber> {
        let local = self.local()?.identity.public_key();
        Ok(generate_safety_number_with_scheme(
            &local.to_bytes(),
            &peer_identity.to_bytes(),
            &self.user_id,
            peer_id,
            &self.config.qr_scheme,
        ))
    }

    /// Base64 of the local 64-byte public identity
    pub fn public_identity_key(&self) -> Result<String> {
        Ok(self.local()?.identity.public_key().to_base64())
    }

    /// Identity pinned for a peer on first contact
    pub async fn peer_identity(&self, peer: &str) -> Result<Option<IdentityPublicKey>> {
        let pinned = self
            .store
            .get(namespace::IDENTITIES, peer)
            .await
            .map_err(ProtocolError::storage("load trusted identity"))?;
        pinned
            .map(|bytes| {
                IdentityPublicKey::from_bytes(&bytes).map_err(|e| ProtocolError::Storage {
                    operation: "load trusted identity",
                    source: e.into(),
                })
            })
            .transpose()
    }

    /// Replace the pinned identity after out-of-band verification
    ///
    /// Existing sessions are kept; destroy them to force a new handshake.
    pub async fn trust_identity(&self, peer: &str, identity: &IdentityPublicKey) -> Result<()> {
        self.store
            .put(namespace::IDENTITIES, peer, &identity.to_bytes())
            .await
            .map_err(ProtocolError::storage("pin identity"))?;
        warn!(target: "ailydian::security", peer, "trusted identity replaced");
        Ok(())
    }

    /// Whether a session with `peer` exists
    pub async fn has_session(&self, peer: &str) -> Result<bool> {
        let slot = self.sessions.get(peer).map(|entry| entry.value().clone());
        if let Some(slot) = slot {
            if slot.lock().await.is_some() {
                return Ok(true);
            }
        }
        Ok(self
            .store
            .get(namespace::SESSIONS, peer)
            .await
            .map_err(ProtocolError::storage("load session"))?
            .is_some())
    }

    /// Drop the session with `peer`; returns whether one existed
    pub async fn destroy_session(&self, peer: &str) -> Result<bool> {
        let mut guard = self.lock_session(peer).await;

        let existed = self
            .store
            .delete(namespace::SESSIONS, peer)
            .await
            .map_err(ProtocolError::storage("delete session"))?;
        let cached = guard.take().is_some();
        self.sessions.remove(peer);
        drop(guard);

        if existed || cached {
            info!(peer, "session destroyed");
        }
        Ok(existed || cached)
    }

    /// Drop every session; returns how many were removed
    pub async fn clear_all_sessions(&self) -> Result<usize> {
        let mut peers = self
            .store
            .keys(namespace::SESSIONS, "")
            .await
            .map_err(ProtocolError::storage("list sessions"))?;
        peers.extend(self.sessions.iter().map(|entry| entry.key().clone()));
        peers.sort();
        peers.dedup();

        let mut removed = 0;
        for peer in &peers {
            if self.destroy_session(peer).await? {
                removed += 1;
            }
        }

        info!(removed, "cleared all sessions");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use ailydian_core::storage::MemoryStore;

    async fn context(name: &str, directory: &Arc<MemoryDirectory>) -> SignalContext {
        let ctx = SignalContext::new(
            ProtocolConfig::default(),
            name,
            Arc::new(MemoryStore::new()),
            directory.clone(),
        )
        .unwrap();
        ctx.initialize().await.unwrap();
        directory.publish(name, ctx.publish_bundle().await.unwrap());
        ctx
    }

    #[tokio::test]
    async fn test_session_slots_are_released() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = context("alice", &directory).await;
        let bob = context("bob", &directory).await;
        let _carol = context("carol", &directory).await;

        alice.encrypt_message("bob", "hi").await.unwrap();
        alice.encrypt_message("carol", "hi").await.unwrap();
        assert_eq!(alice.sessions.len(), 2);

        assert!(alice.destroy_session("bob").await.unwrap());
        assert_eq!(alice.sessions.len(), 1);
        assert_eq!(alice.clear_all_sessions().await.unwrap(), 1);
        assert!(alice.sessions.is_empty());

        // failed attempts for unknown peers leave nothing behind
        assert!(alice.encrypt_message("nobody", "hi").await.is_err());
        let reply = bob.encrypt_bytes("carol", b"x").await.unwrap();
        assert!(alice.decrypt_bytes("mallory", &reply).await.is_err());
        assert!(!alice.has_session("dave").await.unwrap());
        assert!(alice.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_while_sending_keeps_one_slot() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = Arc::new(context("alice", &directory).await);
        let _bob = context("bob", &directory).await;

        alice.encrypt_bytes("bob", b"first").await.unwrap();
        let sender = {
            let alice = alice.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    alice.encrypt_bytes("bob", b"more").await.unwrap();
                }
            })
        };
        alice.destroy_session("bob").await.unwrap();
        sender.await.unwrap();

        assert!(alice.sessions.len() <= 1);
        assert!(alice.has_session("bob").await.unwrap());
    }
}
