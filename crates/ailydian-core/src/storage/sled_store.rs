//! Sled-based persistent storage
//!
//! Each namespace maps to a sled tree. Sled cannot guarantee that removed
//! values are erased from disk; wrap it in [`SealedStore`](super::SealedStore)
//! so that only ciphertext ever reaches the log.

use std::path::Path;

use async_trait::async_trait;
use sled::{Db, Tree};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::KeyValueStore;
use crate::error::{Error, Result};

/// Sled-backed store
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a store at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| Error::storage("open", e))?;
        let db = sled::open(path).map_err(|e| Error::storage("open", e))?;

        info!(path = %path.display(), "opened sled store");
        Ok(Self { db })
    }

    /// Temporary store removed when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::storage("open", e))?;
        Ok(Self { db })
    }

    fn tree(&self, namespace: &str) -> Result<Tree> {
        self.db
            .open_tree(namespace)
            .map_err(|e| Error::storage("open tree", e))
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let value = self
            .tree(namespace)?
            .get(key)
            .map_err(|e| Error::storage("get", e))?;
        Ok(value.map(|v| Zeroizing::new(v.to_vec())))
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        self.tree(namespace)?
            .insert(key, value)
            .map_err(|e| Error::storage("put", e))?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let removed = self
            .tree(namespace)?
            .remove(key)
            .map_err(|e| Error::storage("delete", e))?;
        Ok(removed.is_some())
    }

    async fn take(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let removed = self
            .tree(namespace)?
            .remove(key)
            .map_err(|e| Error::storage("take", e))?;
        Ok(removed.map(|v| Zeroizing::new(v.to_vec())))
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in self.tree(namespace)?.scan_prefix(prefix) {
            let (key, _) = entry.map_err(|e| Error::storage("scan", e))?;
            if let Ok(key) = std::str::from_utf8(&key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        let bytes = self
            .db
            .flush_async()
            .await
            .map_err(|e| Error::storage("flush", e))?;
        debug!(bytes, "flushed sled store");
        Ok(())
    }
}
