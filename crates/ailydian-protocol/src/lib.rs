//! # Ailydian Protocol
//!
//! Session orchestration for Ailydian one-to-one end-to-end encryption.
//!
//! A [`SignalContext`] owns the local device, creates sessions lazily from
//! published pre-key bundles (X3DH) and drives each session's Double Ratchet.
//! Messages travel as a compact binary [`Envelope`](wire::Envelope), base64
//! encoded for text transports.
//!
//! ```no_run
//! # async fn demo() -> ailydian_protocol::Result<()> {
//! use std::sync::Arc;
//! use ailydian_core::{storage::MemoryStore, ProtocolConfig};
//! use ailydian_protocol::{MemoryDirectory, SignalContext};
//!
//! let directory = Arc::new(MemoryDirectory::new());
//! let alice = SignalContext::new(
//!     ProtocolConfig::default(),
//!     "alice",
//!     Arc::new(MemoryStore::new()),
//!     directory.clone(),
//! )?;
//! alice.initialize().await?;
//! directory.publish("alice", alice.publish_bundle().await?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod context;
pub mod directory;
pub mod error;
pub mod session;
pub mod wire;

pub use context::SignalContext;
pub use directory::{BundleDirectory, MemoryDirectory};
pub use error::{ErrorKind, ProtocolError, Result};
pub use session::SessionRecord;
pub use wire::Envelope;
