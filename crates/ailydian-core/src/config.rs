//! Protocol configuration

use std::path::Path;

use ailydian_crypto::{aead::AeadAlgorithm, ratchet::RatchetLimits, safety::DEFAULT_QR_SCHEME};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Curve suite for agreement and signatures
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CurveSuite {
    /// X25519 for Diffie-Hellman, Ed25519 for signatures
    #[default]
    X25519Ed25519,
}

/// Protocol configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Id of the first signed pre-key of a new device
    pub initial_signed_pre_key_id: u32,
    /// Curve suite
    pub curve: CurveSuite,
    /// HKDF info string for the handshake secret
    pub hkdf_info: String,
    /// One-time pre-keys generated at provisioning
    pub pre_key_batch_size: u32,
    /// Replenish when the pool drops below this many keys
    pub pre_key_low_water_mark: u32,
    /// Keys generated per replenish
    pub pre_key_replenish_count: u32,
    /// Signed pre-key rotation interval (seconds)
    pub signed_pre_key_rotation_interval_secs: u64,
    /// How long a retired signed pre-key still answers handshakes (seconds)
    pub signed_pre_key_grace_period_secs: u64,
    /// Skipped message keys kept per session
    pub max_skip: u32,
    /// Maximum plaintext size
    pub max_plaintext_len: usize,
    /// Message cipher
    pub aead: AeadAlgorithm,
    /// URI scheme of safety-number QR payloads
    pub qr_scheme: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            initial_signed_pre_key_id: 1,
            curve: CurveSuite::default(),
            hkdf_info: ailydian_crypto::DEFAULT_HKDF_INFO.to_string(),
            pre_key_batch_size: 100,
            pre_key_low_water_mark: 20,
            pre_key_replenish_count: 50,
            signed_pre_key_rotation_interval_secs: 7 * 24 * 3600, // weekly
            signed_pre_key_grace_period_secs: 48 * 3600,
            max_skip: ailydian_crypto::DEFAULT_MAX_SKIP,
            max_plaintext_len: ailydian_crypto::MAX_MESSAGE_SIZE,
            aead: AeadAlgorithm::default(),
            qr_scheme: DEFAULT_QR_SCHEME.to_string(),
        }
    }
}

impl ProtocolConfig {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.hkdf_info.is_empty() {
            return Err("hkdf_info must not be empty".to_string());
        }
        if self.pre_key_batch_size == 0 {
            return Err("pre_key_batch_size must be greater than 0".to_string());
        }
        if self.pre_key_low_water_mark >= self.pre_key_batch_size {
            return Err("pre_key_low_water_mark must be less than pre_key_batch_size".to_string());
        }
        if self.pre_key_replenish_count == 0 {
            return Err("pre_key_replenish_count must be greater than 0".to_string());
        }
        if self.max_skip == 0 {
            return Err("max_skip must be greater than 0".to_string());
        }
        if self.max_plaintext_len == 0 {
            return Err("max_plaintext_len must be greater than 0".to_string());
        }
        if self.qr_scheme.is_empty() || !self.qr_scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err("qr_scheme must be a non-empty alphanumeric string".to_string());
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProtocolConfig =
            toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(config)
    }

    /// Load from a TOML file, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Pre-key lifecycle parameters
    pub fn pre_key_policy(&self) -> PreKeyPolicy {
        PreKeyPolicy {
            initial_signed_pre_key_id: self.initial_signed_pre_key_id,
            batch_size: self.pre_key_batch_size,
            low_water_mark: self.pre_key_low_water_mark,
            replenish_count: self.pre_key_replenish_count,
            rotation_interval_secs: self.signed_pre_key_rotation_interval_secs,
            grace_period_secs: self.signed_pre_key_grace_period_secs,
        }
    }

    /// Ratchet limits for new sessions
    pub fn ratchet_limits(&self) -> RatchetLimits {
        RatchetLimits {
            max_skip: self.max_skip,
            max_message_size: self.max_plaintext_len,
            aead: self.aead,
        }
    }
}

/// Pre-key lifecycle parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreKeyPolicy {
    /// Id of the first signed pre-key
    pub initial_signed_pre_key_id: u32,
    /// One-time pre-keys generated at provisioning
    pub batch_size: u32,
    /// Replenish threshold
    pub low_water_mark: u32,
    /// Keys generated per replenish
    pub replenish_count: u32,
    /// Signed pre-key rotation interval (seconds)
    pub rotation_interval_secs: u64,
    /// Retired signed pre-key lifetime (seconds)
    pub grace_period_secs: u64,
}

impl Default for PreKeyPolicy {
    fn default() -> Self {
        ProtocolConfig::default().pre_key_policy()
    }
}
