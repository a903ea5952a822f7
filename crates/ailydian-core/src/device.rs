//! Device provisioning and pre-key pool lifecycle
//!
//! A [`Device`] owns one identity key, one current signed pre-key (plus
//! recently retired ones still inside their grace period) and a pool of
//! one-time pre-keys. One-time keys move from `pool` to `claimed` when they
//! are handed out in a bundle, and leave `claimed` once a handshake
//! consumes them; a key id is never issued twice.

use ailydian_crypto::{
    identity::IdentityKeyPair,
    keys::{generate_one_time_pre_keys, generate_signed_pre_key, OneTimePreKey, PreKey, SignedPreKey},
    x3dh::X3dhBundle,
    CryptoError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PreKeyPolicy;
use crate::error::Result;
use crate::types::{DeviceId, Timestamp};

/// Device type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// The user's primary device
    Primary,
    /// A linked secondary device
    Secondary,
}

/// A signed pre-key kept after rotation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredSignedPreKey {
    /// The retired key
    pub key: SignedPreKey,
    /// When it stopped being current
    pub retired_at: Timestamp,
}

/// A provisioned device and its key material
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device ID
    pub id: DeviceId,
    /// Human-readable name
    pub name: String,
    /// Device type
    pub device_type: DeviceType,
    /// Long-term identity key
    pub identity_key: IdentityKeyPair,
    /// Current signed pre-key
    pub signed_pre_key: SignedPreKey,
    /// Retired signed pre-keys within their grace period
    pub retired_signed_pre_keys: Vec<RetiredSignedPreKey>,
    /// Unclaimed one-time pre-keys, ascending by id
    pub pool: Vec<PreKey>,
    /// One-time pre-keys handed out and awaiting a handshake
    pub claimed: Vec<PreKey>,
    /// Next one-time pre-key id to issue
    pub next_pre_key_id: u32,
    /// Provisioning time
    pub created_at: Timestamp,
    /// Last activity
    pub last_seen: Timestamp,
    /// Whether the user marked this device trusted
    pub trusted: bool,
}

/// Create a device with a fresh identity, signed pre-key and pre-key pool
pub fn provision_device(
    name: impl Into<String>,
    device_type: DeviceType,
    policy: &PreKeyPolicy,
) -> Result<Device> {
    let identity_key = IdentityKeyPair::generate()?;
    let signed_pre_key = generate_signed_pre_key(&identity_key, policy.initial_signed_pre_key_id)?;
    let pool = generate_one_time_pre_keys(1, policy.batch_size)?;
    let now = Timestamp::now();

    let device = Device {
        id: DeviceId::new(),
        name: name.into(),
        device_type,
        identity_key,
        signed_pre_key,
        retired_signed_pre_keys: Vec::new(),
        pool,
        claimed: Vec::new(),
        next_pre_key_id: policy.batch_size + 1,
        created_at: now,
        last_seen: now,
        trusted: device_type == DeviceType::Primary,
    };

    info!(
        device = %device.id,
        pre_keys = device.pool.len(),
        "provisioned device"
    );
    Ok(device)
}

impl Device {
    /// Publish a bundle, claiming the lowest-id one-time pre-key
    ///
    /// The claimed key leaves the pool and is never published again. When
    /// the pool is empty the bundle carries no one-time key.
    pub fn claim_bundle(&mut self) -> X3dhBundle {
        let one_time_pre_key = if self.pool.is_empty() {
            None
        } else {
            let key = self.pool.remove(0);
            let public = key.to_public();
            self.claimed.push(key);
            Some(public)
        };

        debug!(
            device = %self.id,
            pre_key_id = one_time_pre_key.as_ref().map(|k| k.id),
            remaining = self.pool.len(),
            "claimed bundle"
        );
        self.bundle_with(one_time_pre_key)
    }

    /// Bundle without touching the pool
    pub fn public_bundle(&self) -> X3dhBundle {
        self.bundle_with(None)
    }

    fn bundle_with(&self, one_time_pre_key: Option<OneTimePreKey>) -> X3dhBundle {
        X3dhBundle {
            identity_key: self.identity_key.public_key(),
            signed_pre_key_id: self.signed_pre_key.id,
            signed_pre_key: self.signed_pre_key.key_pair.public_key(),
            signed_pre_key_signature: self.signed_pre_key.signature,
            one_time_pre_key,
        }
    }

    /// Top up the pool when it falls below the low-water mark
    ///
    /// Returns the number of keys generated (zero when no top-up was due).
    pub fn replenish_pre_keys(&mut self, policy: &PreKeyPolicy) -> Result<u32> {
        if self.pool.len() >= policy.low_water_mark as usize {
            return Ok(0);
        }

        let highest = self
            .pool
            .iter()
            .chain(self.claimed.iter())
            .map(|k| k.id)
            .max()
            .unwrap_or(0);
        let start = self
            .next_pre_key_id
            .max(highest.checked_add(1).ok_or(CryptoError::CounterOverflow)?);

        let fresh = generate_one_time_pre_keys(start, policy.replenish_count)?;
        self.pool.extend(fresh);
        self.next_pre_key_id = start + policy.replenish_count;

        info!(
            device = %self.id,
            first_id = start,
            count = policy.replenish_count,
            "replenished one-time pre-keys"
        );
        Ok(policy.replenish_count)
    }

    /// Whether the signed pre-key is older than the rotation interval
    pub fn needs_signed_pre_key_rotation(&self, now: Timestamp, policy: &PreKeyPolicy) -> bool {
        now.is_at_least_secs_after(
            Timestamp::from_millis(self.signed_pre_key.timestamp),
            policy.rotation_interval_secs,
        )
    }

    /// Replace the signed pre-key with a new one at `id + 1`
    ///
    /// The old key is retired and keeps answering handshakes until its grace
    /// period elapses.
    pub fn rotate_signed_pre_key(&mut self, now: Timestamp, policy: &PreKeyPolicy) -> Result<()> {
        let next_id = self
            .signed_pre_key
            .id
            .checked_add(1)
            .ok_or(CryptoError::CounterOverflow)?;
        let fresh = generate_signed_pre_key(&self.identity_key, next_id)?;
        let old = std::mem::replace(&mut self.signed_pre_key, fresh);

        self.retired_signed_pre_keys.push(RetiredSignedPreKey {
            key: old,
            retired_at: now,
        });
        self.prune_retired_signed_pre_keys(now, policy);

        info!(device = %self.id, signed_pre_key_id = next_id, "rotated signed pre-key");
        Ok(())
    }

    /// Drop retired signed pre-keys past their grace period
    pub fn prune_retired_signed_pre_keys(&mut self, now: Timestamp, policy: &PreKeyPolicy) {
        let before = self.retired_signed_pre_keys.len();
        self.retired_signed_pre_keys
            .retain(|r| !now.is_at_least_secs_after(r.retired_at, policy.grace_period_secs));

        let dropped = before - self.retired_signed_pre_keys.len();
        if dropped > 0 {
            debug!(device = %self.id, dropped, "discarded expired signed pre-keys");
        }
    }

    /// Current or retired signed pre-key by id
    pub fn signed_pre_key_by_id(&self, id: u32) -> Option<&SignedPreKey> {
        if self.signed_pre_key.id == id {
            return Some(&self.signed_pre_key);
        }
        self.retired_signed_pre_keys
            .iter()
            .map(|r| &r.key)
            .find(|k| k.id == id)
    }

    /// Remove and return a claimed one-time pre-key
    pub fn take_claimed_pre_key(&mut self, id: u32) -> Option<PreKey> {
        let index = self.claimed.iter().position(|k| k.id == id)?;
        Some(self.claimed.remove(index))
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.last_seen = Timestamp::now();
    }
}
