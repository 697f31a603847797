//! Cross-chain USDC transfers over Circle's CCTP V2.
//!
//! The [`Bridge`] trait models the three-step flow (burn -> attestation ->
//! mint) for any pair of chains in a [`ChainRegistry`]; [`CctpBridge`] is
//! the implementation over [`xusdc_evm::Wallet`] signers. Enable the `mock`
//! feature for an in-memory CCTP network usable in downstream tests.

use alloy::primitives::{Address, B256, Bytes, ChainId, TxHash, U256};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod balance;
pub mod bindings;
pub mod cctp;
pub mod message;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod registry;
pub mod usdc;

pub use cctp::attestation::{
    AttestationClient, AttestationError, AttestationMessage, AttestationQuery, AttestationStatus,
    Backoff, PollPolicy, PollStatus,
};
pub use cctp::{CctpBridge, CctpCtx, CctpError, TransferSpeed};
pub use message::CctpMessage;
pub use registry::{ChainConfig, ChainRegistry, Domain, KnownChain, RegistryError};
pub use usdc::Usdc;

/// Source and destination chain of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub source: ChainId,
    pub destination: ChainId,
}

/// Receipt from burning USDC on the source chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnReceipt {
    pub tx: TxHash,
    /// Amount sent to the contract (micro-USDC), not the amount received on
    /// the destination chain, which is net of any fast-transfer fee.
    pub amount: U256,
    /// `MessageSent` payload. Its nonce is a zero placeholder.
    pub message: Bytes,
    /// Approval submitted ahead of the burn, if the allowance was short.
    pub approval_tx: Option<TxHash>,
    /// Signer's USDC balance read before approving and burning.
    pub balance_before: U256,
    /// Signer's USDC balance read after the burn confirmed.
    pub balance_after: U256,
}

/// Receipt from minting USDC on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub tx: TxHash,
    pub nonce: B256,
    /// USDC minted to the recipient, net of fees.
    pub amount: U256,
    pub fee: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    Minted(MintReceipt),
    /// The destination transmitter had already consumed this nonce; no
    /// transaction was sent.
    AlreadyReceived { nonce: B256 },
}

/// Bridge for cross-chain USDC transfers.
///
/// Implementations handle the three-step flow: burn -> poll attestation ->
/// mint. Steps are independent so a caller can resume from any of them.
#[async_trait]
pub trait Bridge: Send + Sync + 'static {
    /// Error type for bridge operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Address that signs on `chain_id`.
    fn owner(&self, chain_id: ChainId) -> Result<Address, Self::Error>;

    /// USDC balance of `owner` on `chain_id`, in micro-USDC.
    async fn balance(&self, chain_id: ChainId, owner: Address) -> Result<U256, Self::Error>;

    /// Burns `amount` micro-USDC on the route's source chain for `recipient`
    /// on the destination chain.
    async fn burn(
        &self,
        route: Route,
        amount: U256,
        recipient: Address,
    ) -> Result<BurnReceipt, Self::Error>;

    /// One attestation lookup for a burn on `source_chain`.
    async fn attestation_status(
        &self,
        source_chain: ChainId,
        query: AttestationQuery,
    ) -> Result<PollStatus, Self::Error>;

    /// Polls until the burn on `source_chain` is attested.
    async fn poll_attestation(
        &self,
        source_chain: ChainId,
        query: AttestationQuery,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<AttestationMessage, Self::Error>;

    /// Submits the attested message on `destination_chain`.
    async fn mint(
        &self,
        destination_chain: ChainId,
        attestation: &AttestationMessage,
    ) -> Result<MintOutcome, Self::Error>;
}
