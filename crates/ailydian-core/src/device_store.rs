//! Device persistence
//!
//! A device is split across three namespaces: the record itself (without
//! one-time keys) in `devices`, each unclaimed one-time pre-key in `prekeys`
//! and each claimed key in `claimed`. Keeping pre-keys as separate entries
//! lets a claim be a single atomic `take` rather than a read-modify-write of
//! the whole device.

use std::sync::Arc;

use ailydian_crypto::{keys::PreKey, x3dh::X3dhBundle};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::PreKeyPolicy;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::storage::{device_key, namespace, parse_device_key, KeyValueStore};
use crate::types::{DeviceId, Timestamp};

const LOCAL_DEVICE_KEY: &str = "current";

/// Persistent device registry over a [`KeyValueStore`]
pub struct DeviceStore {
    store: Arc<dyn KeyValueStore>,
    maintenance: Mutex<()>,
}

impl DeviceStore {
    /// Create a registry over a backend
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            maintenance: Mutex::new(()),
        }
    }

    /// The backing store
    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Persist a device, replacing any stored pre-keys
    pub async fn store(&self, device: &Device) -> Result<()> {
        let id = device.id.as_str();

        self.put_record(device).await?;
        self.replace_pre_keys(namespace::PRE_KEYS, id, &device.pool).await?;
        self.replace_pre_keys(namespace::CLAIMED, id, &device.claimed).await?;
        self.store.flush().await?;

        debug!(device = %device.id, pool = device.pool.len(), "stored device");
        Ok(())
    }

    /// Load a device with its pre-key pool
    pub async fn load(&self, id: &DeviceId) -> Result<Device> {
        let mut device = self.load_record(id).await?;
        device.pool = self.load_pre_keys(namespace::PRE_KEYS, id.as_str()).await?;
        device.claimed = self.load_pre_keys(namespace::CLAIMED, id.as_str()).await?;
        Ok(device)
    }

    /// Whether a device record exists
    pub async fn contains(&self, id: &DeviceId) -> Result<bool> {
        Ok(self.store.get(namespace::DEVICES, id.as_str()).await?.is_some())
    }

    /// All stored device ids
    pub async fn list(&self) -> Result<Vec<DeviceId>> {
        let keys = self.store.keys(namespace::DEVICES, "").await?;
        Ok(keys.into_iter().map(DeviceId::from_string).collect())
    }

    /// Remove a device and every pre-key it owns
    pub async fn delete(&self, id: &DeviceId) -> Result<bool> {
        let existed = self.store.delete(namespace::DEVICES, id.as_str()).await?;
        self.replace_pre_keys(namespace::PRE_KEYS, id.as_str(), &[]).await?;
        self.replace_pre_keys(namespace::CLAIMED, id.as_str(), &[]).await?;

        if self.local_device_id().await?.as_ref() == Some(id) {
            self.store.delete(namespace::IDENTITY, LOCAL_DEVICE_KEY).await?;
        }
        self.store.flush().await?;

        if existed {
            info!(device = %id, "deleted device");
        }
        Ok(existed)
    }

    /// Mark a stored device as the local one
    pub async fn set_local_device(&self, id: &DeviceId) -> Result<()> {
        self.store
            .put(namespace::IDENTITY, LOCAL_DEVICE_KEY, id.as_str().as_bytes())
            .await?;
        self.store.flush().await
    }

    /// Id of the local device, if one was set
    pub async fn local_device_id(&self) -> Result<Option<DeviceId>> {
        match self.store.get(namespace::IDENTITY, LOCAL_DEVICE_KEY).await? {
            Some(bytes) => {
                let id = std::str::from_utf8(&bytes)
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(Some(DeviceId::from_string(id)))
            }
            None => Ok(None),
        }
    }

    /// Publish a bundle, atomically claiming the lowest-id one-time pre-key
    ///
    /// Concurrent callers never receive the same one-time key. The bundle
    /// omits the one-time key once the pool is exhausted.
    pub async fn claim_bundle(&self, id: &DeviceId) -> Result<X3dhBundle> {
        let device = self.load_record(id).await?;
        let prefix = format!("{}/", id.as_str());

        let mut one_time_pre_key = None;
        for key in self.store.keys(namespace::PRE_KEYS, &prefix).await? {
            // another caller may have claimed this key since the scan
            let Some(bytes) = self.store.take(namespace::PRE_KEYS, &key).await? else {
                continue;
            };
            let pre_key: PreKey = bincode::deserialize(&bytes)?;
            self.store.put(namespace::CLAIMED, &key, &bytes).await?;
            one_time_pre_key = Some(pre_key.to_public());
            break;
        }
        self.store.flush().await?;

        if one_time_pre_key.is_none() {
            warn!(device = %id, "one-time pre-key pool exhausted");
        }
        debug!(
            device = %id,
            pre_key_id = one_time_pre_key.as_ref().map(|k| k.id),
            "claimed bundle"
        );

        let mut bundle = device.public_bundle();
        bundle.one_time_pre_key = one_time_pre_key;
        Ok(bundle)
    }

    /// Read a claimed one-time pre-key without consuming it
    pub async fn claimed_pre_key(&self, id: &DeviceId, pre_key_id: u32) -> Result<Option<PreKey>> {
        let key = device_key(id.as_str(), pre_key_id);
        match self.store.get(namespace::CLAIMED, &key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Consume a claimed one-time pre-key
    pub async fn take_claimed_pre_key(
        &self,
        id: &DeviceId,
        pre_key_id: u32,
    ) -> Result<Option<PreKey>> {
        let key = device_key(id.as_str(), pre_key_id);
        let taken = match self.store.take(namespace::CLAIMED, &key).await? {
            Some(bytes) => Some(bincode::deserialize(&bytes)?),
            None => None,
        };
        self.store.flush().await?;

        if taken.is_some() {
            debug!(device = %id, pre_key_id, "consumed one-time pre-key");
        }
        Ok(taken)
    }

    /// Number of unclaimed one-time pre-keys
    pub async fn pool_size(&self, id: &DeviceId) -> Result<usize> {
        let prefix = format!("{}/", id.as_str());
        Ok(self.store.keys(namespace::PRE_KEYS, &prefix).await?.len())
    }

    /// Top up the pool below the low-water mark; returns keys generated
    ///
    /// Only new keys are written, so claims running concurrently are never
    /// undone.
    pub async fn replenish_pre_keys(&self, id: &DeviceId, policy: &PreKeyPolicy) -> Result<u32> {
        let _guard = self.maintenance.lock().await;

        let mut device = self.load(id).await?;
        let known = device.pool.len();
        let generated = device.replenish_pre_keys(policy)?;
        if generated == 0 {
            return Ok(0);
        }

        for pre_key in &device.pool[known..] {
            self.put_pre_key(namespace::PRE_KEYS, id.as_str(), pre_key).await?;
        }
        self.put_record(&device).await?;
        self.store.flush().await?;
        Ok(generated)
    }

    /// Rotate the signed pre-key when the rotation interval has elapsed
    ///
    /// Also discards retired keys past their grace period. Returns whether
    /// a rotation happened.
    pub async fn rotate_signed_pre_key_if_due(
        &self,
        id: &DeviceId,
        now: Timestamp,
        policy: &PreKeyPolicy,
    ) -> Result<bool> {
        let _guard = self.maintenance.lock().await;

        let mut device = self.load_record(id).await?;
        let rotated = if device.needs_signed_pre_key_rotation(now, policy) {
            device.rotate_signed_pre_key(now, policy)?;
            true
        } else {
            device.prune_retired_signed_pre_keys(now, policy);
            false
        };

        self.put_record(&device).await?;
        self.store.flush().await?;
        Ok(rotated)
    }

    async fn put_record(&self, device: &Device) -> Result<()> {
        let mut record = device.clone();
        record.pool.clear();
        record.claimed.clear();

        let bytes = Zeroizing::new(bincode::serialize(&record)?);
        self.store
            .put(namespace::DEVICES, device.id.as_str(), &bytes)
            .await
    }

    /// Load a device without reading its one-time pre-keys
    pub async fn load_record(&self, id: &DeviceId) -> Result<Device> {
        let bytes = self
            .store
            .get(namespace::DEVICES, id.as_str())
            .await?
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    async fn put_pre_key(&self, ns: &str, device: &str, pre_key: &PreKey) -> Result<()> {
        let bytes = Zeroizing::new(bincode::serialize(pre_key)?);
        self.store
            .put(ns, &device_key(device, pre_key.id), &bytes)
            .await
    }

    async fn load_pre_keys(&self, ns: &str, device: &str) -> Result<Vec<PreKey>> {
        let prefix = format!("{}/", device);
        let mut keys = Vec::new();
        for key in self.store.keys(ns, &prefix).await? {
            if let Some(bytes) = self.store.get(ns, &key).await? {
                keys.push(bincode::deserialize(&bytes)?);
            }
        }
        Ok(keys)
    }

    async fn replace_pre_keys(&self, ns: &str, device: &str, keep: &[PreKey]) -> Result<()> {
        let prefix = format!("{}/", device);
        for key in self.store.keys(ns, &prefix).await? {
            let stale = parse_device_key(&key).map_or(true, |id| !keep.iter().any(|k| k.id == id));
            if stale {
                self.store.delete(ns, &key).await?;
            }
        }
        for pre_key in keep {
            self.put_pre_key(ns, device, pre_key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{provision_device, DeviceType};
    use crate::storage::MemoryStore;

    fn registry() -> DeviceStore {
        DeviceStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_store_load_roundtrip() {
        let store = registry();
        let mut device = provision_device("laptop", DeviceType::Secondary, &PreKeyPolicy::default()).unwrap();
        device.claim_bundle();

        store.store(&device).await.unwrap();
        let loaded = store.load(&device.id).await.unwrap();

        assert_eq!(loaded, device);
        assert_eq!(store.list().await.unwrap(), vec![device.id.clone()]);
    }

    #[tokio::test]
    async fn test_load_missing_device() {
        let err = registry().load(&DeviceId::from("nope")).await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_claims_move_keys() {
        let store = registry();
        let device = provision_device("phone", DeviceType::Primary, &PreKeyPolicy::default()).unwrap();
        store.store(&device).await.unwrap();

        let bundle = store.claim_bundle(&device.id).await.unwrap();
        assert!(bundle.verify_signature());
        let opk = bundle.one_time_pre_key.unwrap();
        assert_eq!(opk.id, 1);
        assert_eq!(store.pool_size(&device.id).await.unwrap(), 99);

        let claimed = store.claimed_pre_key(&device.id, 1).await.unwrap().unwrap();
        assert_eq!(claimed.key_pair.public_key(), opk.public_key);

        assert!(store.take_claimed_pre_key(&device.id, 1).await.unwrap().is_some());
        assert!(store.take_claimed_pre_key(&device.id, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let store = registry();
        let device = provision_device("phone", DeviceType::Primary, &PreKeyPolicy::default()).unwrap();
        store.store(&device).await.unwrap();
        store.set_local_device(&device.id).await.unwrap();
        store.claim_bundle(&device.id).await.unwrap();

        assert!(store.delete(&device.id).await.unwrap());
        assert!(!store.contains(&device.id).await.unwrap());
        assert_eq!(store.pool_size(&device.id).await.unwrap(), 0);
        assert!(store.claimed_pre_key(&device.id, 1).await.unwrap().is_none());
        assert!(store.local_device_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotation_only_when_due() {
        let store = registry();
        let policy = PreKeyPolicy::default();
        let device = provision_device("phone", DeviceType::Primary, &policy).unwrap();
        store.store(&device).await.unwrap();

        let created = Timestamp::from_millis(device.signed_pre_key.timestamp);
        assert!(!store
            .rotate_signed_pre_key_if_due(&device.id, created, &policy)
            .await
            .unwrap());

        let later = created.plus_secs(policy.rotation_interval_secs);
        assert!(store
            .rotate_signed_pre_key_if_due(&device.id, later, &policy)
            .await
            .unwrap());

        let loaded = store.load(&device.id).await.unwrap();
        assert_eq!(loaded.signed_pre_key.id, 2);
        assert!(loaded.signed_pre_key_by_id(1).is_some());
        assert_eq!(loaded.pool.len(), 100);
    }
}
