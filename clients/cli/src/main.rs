//! Ailydian Keytool
//!
//! Operator CLI for provisioning a device and maintaining its pre-keys.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use ailydian_core::{
    storage::{KeyValueStore, SealedStore, SledStore},
    DeviceStore, DeviceType,
};
use ailydian_crypto::{identity::IdentityPublicKey, safety::emoji_fingerprint};
use ailydian_protocol::{MemoryDirectory, SignalContext};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{CliConfig, LogFormat};

/// Environment variable holding the hex storage secret
const STORAGE_SECRET_ENV: &str = "AILYDIAN_STORAGE_SECRET";

#[derive(Parser, Debug)]
#[command(name = "ailydian-keytool")]
#[command(about = "Ailydian E2EE device key management")]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the storage directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the local device if needed
    Init,
    /// Show the local public identity
    Identity,
    /// Claim and print the bundle to publish
    Bundle,
    /// Top up the one-time pre-key pool
    Replenish,
    /// Rotate the signed pre-key when due
    Rotate,
    /// List stored devices
    Devices,
    /// Provision an additional device
    AddDevice {
        /// Device name
        name: String,
    },
    /// Compute the safety number with a peer
    SafetyNumber {
        /// Peer user id
        peer: String,
        /// Peer identity key, base64
        identity: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(CliConfig::default_path);
    let mut config = CliConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(dir) = args.data_dir.clone() {
        config.storage_path = dir;
    }

    let json = args.json_logs || config.log_format == LogFormat::Json;
    init_logging(&args.log_level, json);
    debug!(config = %config_path.display(), storage = %config.storage_path.display(), "configuration loaded");

    let store = open_store(&config)?;
    let ctx = SignalContext::new(
        config.protocol.clone(),
        config.user_id.clone(),
        store.clone(),
        Arc::new(MemoryDirectory::new()),
    )?;
    let device_id = ctx.initialize().await?;

    match args.command {
        Command::Init => {
            info!(device = %device_id, "device ready");
            println!("{}", device_id);
        }
        Command::Identity => {
            let encoded = ctx.public_identity_key()?;
            let identity = IdentityPublicKey::from_base64(&encoded)?;
            println!("identity:    {}", encoded);
            println!("fingerprint: {}", identity.fingerprint_hex());
            println!("emoji:       {}", emoji_fingerprint(&identity.to_bytes()));
        }
        Command::Bundle => {
            let bundle = ctx.publish_bundle().await?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Command::Replenish => {
            let added = ctx.replenish_pre_keys().await?;
            println!("added {} one-time pre-keys", added);
        }
        Command::Rotate => {
            if ctx.rotate_signed_pre_key_if_due().await? {
                println!("signed pre-key rotated");
            } else {
                println!("signed pre-key is current");
            }
        }
        Command::Devices => {
            let devices = DeviceStore::new(store);
            for id in devices.list().await? {
                let device = devices.load(&id).await?;
                let marker = if id == device_id { "*" } else { " " };
                println!(
                    "{} {} {:<16} {:?} pool={} signed_pre_key={}",
                    marker,
                    device.id,
                    device.name,
                    device.device_type,
                    device.pool.len(),
                    device.signed_pre_key.id,
                );
            }
        }
        Command::AddDevice { name } => {
            let id = ctx.provision_device(&name, DeviceType::Secondary).await?;
            println!("{}", id);
        }
        Command::SafetyNumber { peer, identity } => {
            let identity = IdentityPublicKey::from_base64(&identity)
                .context("peer identity must be a base64 64-byte public identity")?;
            let number = ctx.safety_number(&peer, &identity)?;
            println!("{}", number.display());
            println!("{}", number.qr_payload());
        }
    }

    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn open_store(config: &CliConfig) -> Result<Arc<dyn KeyValueStore>> {
    let sled = SledStore::open(&config.storage_path)
        .with_context(|| format!("opening {}", config.storage_path.display()))?;

    match std::env::var(STORAGE_SECRET_ENV) {
        Ok(secret) => {
            let secret = hex::decode(secret.trim())
                .with_context(|| format!("{} must be hex", STORAGE_SECRET_ENV))?;
            Ok(Arc::new(SealedStore::from_secret(sled, &secret)?))
        }
        Err(_) => Ok(Arc::new(sled)),
    }
}
