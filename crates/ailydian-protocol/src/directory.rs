//! Pre-key bundle directory
//!
//! Bundles are hosted by an external service. The context only needs to
//! fetch one bundle per new session; [`MemoryDirectory`] plays the server
//! for tests and single-process use.

use std::collections::{HashMap, VecDeque};

use ailydian_crypto::{keys::OneTimePreKey, x3dh::X3dhBundle};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;

/// Source of peers' pre-key bundles
#[async_trait]
pub trait BundleDirectory: Send + Sync {
    /// Fetch a bundle for `user_id`, consuming one one-time pre-key if any
    async fn fetch_bundle(&self, user_id: &str) -> Result<Option<X3dhBundle>>;
}

struct Published {
    base: X3dhBundle,
    one_time: VecDeque<OneTimePreKey>,
}

/// In-process directory
///
/// Each published one-time key is handed out once; after that, fetches
/// return the bundle without a one-time key.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, Published>>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a bundle for a user
    ///
    /// The identity and signed pre-key replace any earlier ones; a one-time
    /// key in the bundle is queued behind those already published.
    pub fn publish(&self, user_id: &str, bundle: X3dhBundle) {
        let mut users = self.users.write();
        let mut base = bundle;
        let one_time = base.one_time_pre_key.take();

        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| Published {
                base: base.clone(),
                one_time: VecDeque::new(),
            });
        entry.base = base;
        if let Some(key) = one_time {
            entry.one_time.push_back(key);
        }
        debug!(user = user_id, queued = entry.one_time.len(), "published bundle");
    }

    /// Replace a user's published bundle outright
    pub fn replace(&self, user_id: &str, bundle: X3dhBundle) {
        self.users.write().remove(user_id);
        self.publish(user_id, bundle);
    }

    /// One-time keys still queued for a user
    pub fn available_one_time_keys(&self, user_id: &str) -> usize {
        self.users
            .read()
            .get(user_id)
            .map(|p| p.one_time.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BundleDirectory for MemoryDirectory {
    async fn fetch_bundle(&self, user_id: &str) -> Result<Option<X3dhBundle>> {
        let mut users = self.users.write();
        Ok(users.get_mut(user_id).map(|published| {
            let mut bundle = published.base.clone();
            bundle.one_time_pre_key = published.one_time.pop_front();
            bundle
        }))
    }
}
