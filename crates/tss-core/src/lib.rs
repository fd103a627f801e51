//! # TSS Core
//!
//! Round engine and ranked secret-sharing primitives for threshold ECDSA.
//!
//! This crate provides:
//! - A protocol-agnostic [`RoundEngine`](engine::RoundEngine) that turns
//!   concurrently delivered peer messages into ordered round transitions
//! - Birkhoff (ranked) secret sharing and fail-closed key recovery
//! - Feldman DKG and key refresh over ranked shares, built on the engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{keygen::{Dkg, DkgConfig}, mpc::MemoryNetwork};
//!
//! let network = MemoryNetwork::new();
//! let dkg = Dkg::new(config, Arc::new(network.peer_manager(id, &parties)))?;
//! network.register(id, dkg.sink());
//! let result = dkg.run().await?;
//! ```

pub mod birkhoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod recovery;
pub mod types;

pub use error::{Error, Result};
pub use types::{Message, MessageType, PartyId, RunState, SessionId};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default threshold for a 3-party setup
pub const DEFAULT_THRESHOLD: usize = 2;

/// Default number of parties
pub const DEFAULT_PARTIES: usize = 3;
