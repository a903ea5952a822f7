//! In-memory storage

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;
use zeroize::{Zeroize, Zeroizing};

use super::KeyValueStore;
use crate::error::Result;

type Namespace = BTreeMap<String, Zeroizing<Vec<u8>>>;

/// Process-local store for tests and single-run tools
///
/// Buffers are zeroized when overwritten or removed.
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a namespace
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .get(namespace)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Whether a namespace holds no records
    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        trace!(namespace, key, len = value.len(), "memory put");
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let removed = self
            .namespaces
            .write()
            .get_mut(namespace)
            .and_then(|ns| ns.remove(key));
        Ok(match removed {
            Some(mut value) => {
                value.zeroize();
                true
            }
            None => false,
        })
    }

    async fn take(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self
            .namespaces
            .write()
            .get_mut(namespace)
            .and_then(|ns| ns.remove(key)))
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .map(|ns| {
                ns.range(prefix.to_string()..)
                    .map(|(k, _)| k)
                    .take_while(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
