//! CLI configuration

use std::path::{Path, PathBuf};

use ailydian_core::ProtocolConfig;
use serde::{Deserialize, Serialize};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// CLI configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Local user id used in safety numbers
    pub user_id: String,
    /// Sled database directory
    pub storage_path: PathBuf,
    /// Log output format
    pub log_format: LogFormat,
    /// Protocol parameters
    pub protocol: ProtocolConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        let storage_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ailydian")
            .join("keys");

        Self {
            user_id: "local".to_string(),
            storage_path,
            log_format: LogFormat::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl CliConfig {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ailydian")
            .join("keytool.toml")
    }

    /// Load config from file, writing the defaults when it is missing
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: CliConfig = toml::from_str(&content)?;
            config
                .protocol
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid protocol config in {}: {}", path.display(), e))?;
            Ok(config)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, toml::to_string_pretty(&config)?)?;

            Ok(config)
        }
    }
}
