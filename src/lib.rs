//! Moves native USDC between EVM chains over Circle's CCTP V2.
//!
//! [`relay::Relay`] drives each transfer through burn, attestation and mint,
//! recording progress in an in-memory [`tracker::TransferTracker`] so an
//! interrupted transfer can be resumed. The protocol itself lives in the
//! `xusdc-bridge` crate.

pub mod cli;
pub mod config;
pub mod relay;
pub mod tracker;
pub mod transfer;

pub use config::{ConfigError, Ctx, LogLevel, setup_tracing};
pub use relay::{Relay, RelayError, TransferRequest};
pub use tracker::{TrackerError, TransferTracker};
pub use transfer::{Transfer, TransferError, TransferId, TransferStatus};
