#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ailydian_core::{
    storage::{KeyValueStore, MemoryStore},
    Error, ProtocolConfig,
};
use ailydian_protocol::{MemoryDirectory, SignalContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use zeroize::Zeroizing;

/// Context plus a handle on its backing store
pub struct Party {
    pub ctx: SignalContext,
    pub store: Arc<MemoryStore>,
}

pub async fn party(name: &str, directory: &Arc<MemoryDirectory>) -> Party {
    party_with(name, directory, ProtocolConfig::default()).await
}

pub async fn party_with(
    name: &str,
    directory: &Arc<MemoryDirectory>,
    config: ProtocolConfig,
) -> Party {
    let store = Arc::new(MemoryStore::new());
    let ctx = SignalContext::new(config, name, store.clone(), directory.clone()).unwrap();
    ctx.initialize().await.unwrap();
    directory.publish(name, ctx.publish_bundle().await.unwrap());
    Party { ctx, store }
}

/// Store whose writes can be made to fail on demand
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    failing_namespace: Mutex<Option<&'static str>>,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Fail writes to one namespace only
    pub fn fail_writes_to(&self, namespace: Option<&'static str>) {
        *self.failing_namespace.lock() = namespace;
    }

    fn check(&self, operation: &'static str, namespace: &str) -> ailydian_core::Result<()> {
        let targeted = *self.failing_namespace.lock() == Some(namespace);
        if self.failing.load(Ordering::SeqCst) || targeted {
            Err(Error::storage(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, namespace: &str, key: &str) -> ailydian_core::Result<Option<Zeroizing<Vec<u8>>>> {
        self.inner.get(namespace, key).await
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> ailydian_core::Result<()> {
        self.check("put", namespace)?;
        self.inner.put(namespace, key, value).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> ailydian_core::Result<bool> {
        self.check("delete", namespace)?;
        self.inner.delete(namespace, key).await
    }

    async fn take(&self, namespace: &str, key: &str) -> ailydian_core::Result<Option<Zeroizing<Vec<u8>>>> {
        self.check("take", namespace)?;
        self.inner.take(namespace, key).await
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> ailydian_core::Result<Vec<String>> {
        self.inner.keys(namespace, prefix).await
    }

    async fn flush(&self) -> ailydian_core::Result<()> {
        self.check("flush", "")?;
        self.inner.flush().await
    }
}
