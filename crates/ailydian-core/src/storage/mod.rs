//! Pluggable key-value storage
//!
//! Records live in flat namespaces keyed by UTF-8 strings. Values are opaque
//! bytes; callers serialize with bincode. Every backend must make [`take`]
//! atomic, since one-time pre-key claims rely on it.
//!
//! [`take`]: KeyValueStore::take

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::Result;

pub mod memory;
pub mod sealed;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sealed::SealedStore;
pub use sled_store::SledStore;

/// Well-known namespaces
pub mod namespace {
    /// Device records without their one-time pre-keys
    pub const DEVICES: &str = "devices";
    /// Unclaimed one-time pre-keys, keyed `<device>/<id>`
    pub const PRE_KEYS: &str = "prekeys";
    /// Claimed one-time pre-keys awaiting a handshake
    pub const CLAIMED: &str = "claimed";
    /// Local identity pointer
    pub const IDENTITY: &str = "identity";
    /// Ratchet sessions keyed by peer
    pub const SESSIONS: &str = "sessions";
    /// Pinned remote identity keys keyed by peer
    pub const IDENTITIES: &str = "identities";
}

/// Async key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Write a value, replacing any previous one
    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a value; returns whether it existed
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Atomically remove and return a value
    ///
    /// When several callers race on the same key, exactly one receives it.
    async fn take(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Keys in a namespace starting with `prefix`, in ascending order
    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>>;

    /// Make previous writes durable
    async fn flush(&self) -> Result<()>;
}

/// Composite key for per-device records
pub fn device_key(device: &str, id: u32) -> String {
    format!("{}/{:010}", device, id)
}

/// Parse the numeric suffix of a [`device_key`]
pub fn parse_device_key(key: &str) -> Option<u32> {
    key.rsplit_once('/').and_then(|(_, id)| id.parse().ok())
}
