//! # Ailydian Core
//!
//! Shared types, configuration, device provisioning and key storage for the
//! Ailydian E2EE protocol.
//!
//! This crate provides:
//! - Device and pre-key pool lifecycle (provision, claim, replenish, rotate)
//! - The [`KeyValueStore`](storage::KeyValueStore) abstraction with memory,
//!   sled and sealed (encrypted at rest) backends
//! - [`DeviceStore`](device_store::DeviceStore) persistence with atomic
//!   one-time pre-key claims
//! - Protocol configuration and common error types

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod device;
pub mod device_store;
pub mod error;
pub mod storage;
pub mod types;

pub use config::{CurveSuite, PreKeyPolicy, ProtocolConfig};
pub use device::{provision_device, Device, DeviceType};
pub use device_store::DeviceStore;
pub use error::{Error, Result};
pub use types::{DeviceId, Timestamp};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{PreKeyPolicy, ProtocolConfig};
    pub use crate::device::{provision_device, Device, DeviceType};
    pub use crate::device_store::DeviceStore;
    pub use crate::error::{Error, Result};
    pub use crate::storage::{memory::MemoryStore, KeyValueStore};
    pub use crate::types::{DeviceId, Timestamp};
}
