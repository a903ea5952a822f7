//! Encryption at rest
//!
//! [`SealedStore`] wraps any [`KeyValueStore`] and seals every value with
//! AES-256-GCM before it reaches the backend. The namespace and key are bound
//! into the associated data, so a record moved to a different slot fails to
//! open. Stored layout: `algorithm u8 | nonce | ciphertext`.

use async_trait::async_trait;
use zeroize::Zeroizing;

use ailydian_crypto::{
    aead::{Aead, AeadAlgorithm, AeadKey, Nonce},
    kdf::{domain, KeyDerivationContext},
};
use tracing::warn;

use super::KeyValueStore;
use crate::error::{Error, Result};

/// A store that encrypts values before delegating to `S`
pub struct SealedStore<S> {
    inner: S,
    key: AeadKey,
    cipher: Aead,
}

impl<S: KeyValueStore> SealedStore<S> {
    /// Wrap `inner` using a 32-byte storage key
    pub fn new(inner: S, key: AeadKey) -> Self {
        Self {
            inner,
            key,
            cipher: Aead::new(AeadAlgorithm::Aes256Gcm).with_max_message_size(usize::MAX),
        }
    }

    /// Wrap `inner` using a key derived from high-entropy secret material
    pub fn from_secret(inner: S, secret: &[u8]) -> Result<Self> {
        let derived = KeyDerivationContext::new(None, secret).derive::<32>(domain::STORAGE_KEY)?;
        Ok(Self::new(inner, AeadKey::from_bytes(*derived.as_bytes())))
    }

    /// The wrapped backend
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn seal(&self, namespace: &str, key: &str, value: &[u8]) -> Result<Vec<u8>> {
        let aad = record_aad(namespace, key);
        let (nonce, ciphertext) = self.cipher.seal(&self.key, value, &aad)?;

        let mut out = Vec::with_capacity(1 + nonce.as_bytes().len() + ciphertext.len());
        out.push(nonce.algorithm().to_byte());
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, namespace: &str, key: &str, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let corrupt = || {
            warn!(target: "ailydian::security", namespace, key, "sealed record failed to open");
            Error::SealedRecordCorrupt {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }
        };

        let (&tag, rest) = sealed.split_first().ok_or_else(corrupt)?;
        let algorithm = AeadAlgorithm::from_byte(tag).ok_or_else(corrupt)?;
        if rest.len() < algorithm.nonce_len() {
            return Err(corrupt());
        }
        let (nonce, ciphertext) = rest.split_at(algorithm.nonce_len());
        let nonce = Nonce::from_parts(algorithm, nonce).map_err(|_| corrupt())?;

        let aad = record_aad(namespace, key);
        Aead::new(algorithm)
            .open(&self.key, &nonce, ciphertext, &aad)
            .map(Zeroizing::new)
            .ok_or_else(corrupt)
    }
}

fn record_aad(namespace: &str, key: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(namespace.len() + 1 + key.len());
    aad.extend_from_slice(namespace.as_bytes());
    aad.push(0);
    aad.extend_from_slice(key.as_bytes());
    aad
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for SealedStore<S> {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.inner.get(namespace, key).await? {
            Some(sealed) => self.open(namespace, key, &sealed).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let sealed = self.seal(namespace, key, value)?;
        self.inner.put(namespace, key, &sealed).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        self.inner.delete(namespace, key).await
    }

    async fn take(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.inner.take(namespace, key).await? {
            Some(sealed) => self.open(namespace, key, &sealed).map(Some),
            None => Ok(None),
        }
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys(namespace, prefix).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}
