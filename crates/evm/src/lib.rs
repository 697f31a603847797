//! EVM chain interaction abstraction.
//!
//! This crate provides two traits for interacting with EVM chains:
//!
//! - [`Evm`]: read-only chain access (`eth_call`, gas estimation and the
//!   current gas price). A typed [`call`](Evm::call) helper encodes a
//!   `SolCall` and decodes its return value.
//!
//! - [`Wallet`]: extends `Evm` with a signing identity and transaction
//!   submission. Every submission is a single awaited future that resolves
//!   once the transaction is confirmed, reverts, or exceeds its
//!   confirmation deadline.
//!
//! Receipts are reduced to [`TxReceipt`] so callers (and test doubles)
//! do not depend on the RPC receipt envelope.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, Log, TxHash};
use alloy::sol_types::SolCall;
use async_trait::async_trait;

pub mod local;

pub use local::LocalWallet;

/// Errors that can occur during EVM operations.
#[derive(Debug, thiserror::Error)]
pub enum EvmError {
    #[error("transaction error: {0}")]
    Transaction(#[from] alloy::providers::PendingTransactionError),
    #[error("transport error: {0}")]
    Transport(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),
    #[error("ABI decoding failed: {0}")]
    AbiDecode(#[from] alloy::sol_types::Error),
    #[error("transaction reverted: {tx_hash}")]
    Reverted { tx_hash: TxHash },
    #[error("transaction {tx_hash} not confirmed within {timeout:?}")]
    ConfirmationTimeout { tx_hash: TxHash, timeout: Duration },
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[from] alloy::signers::local::LocalSignerError),
}

impl EvmError {
    /// True when the transaction was mined with a failing status.
    pub const fn is_revert(&self) -> bool {
        matches!(self, Self::Reverted { .. })
    }
}

/// Confirmed transaction, reduced to what the bridge inspects.
///
/// Only successful transactions produce a `TxReceipt`; reverts surface as
/// [`EvmError::Reverted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Per-transaction submission parameters.
///
/// `None` leaves the value to the node / provider fillers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub gas_limit: Option<u64>,
    /// Legacy gas price in wei.
    pub gas_price: Option<u128>,
    /// Upper bound on waiting for the receipt after submission.
    pub confirmation_timeout: Option<Duration>,
}

impl TxOptions {
    #[must_use]
    pub const fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    #[must_use]
    pub const fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    #[must_use]
    pub const fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = Some(timeout);
        self
    }
}

/// Read-only EVM chain access.
#[async_trait]
pub trait Evm: Send + Sync + 'static {
    /// Executes `eth_call` against `contract` and returns the raw output.
    async fn call_raw(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError>;

    /// Estimates gas for a call sent from `from`.
    async fn estimate_gas(
        &self,
        from: Address,
        contract: Address,
        calldata: Bytes,
    ) -> Result<u64, EvmError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, EvmError>;

    /// Executes a typed view call and decodes its return value.
    async fn call<C>(&self, contract: Address, call: C) -> Result<C::Return, EvmError>
    where
        C: SolCall + Send + 'static,
    {
        let output = self
            .call_raw(contract, Bytes::from(call.abi_encode()))
            .await?;

        Ok(C::abi_decode_returns(&output)?)
    }
}

/// Signing wallet on an EVM chain.
///
/// The `send` method submits a signed transaction and waits for a receipt
/// within `options.confirmation_timeout`. Implementations handle key
/// management; [`LocalWallet`] signs with a raw private key.
#[async_trait]
pub trait Wallet: Evm {
    /// Returns the address this wallet signs transactions from.
    fn address(&self) -> Address;

    /// Submit a signed contract call transaction.
    ///
    /// - `contract`: target contract address
    /// - `calldata`: ABI-encoded function call
    /// - `options`: explicit gas parameters and confirmation deadline
    /// - `note`: human-readable operation description for logs
    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        options: TxOptions,
        note: &str,
    ) -> Result<TxReceipt, EvmError>;

    /// Encodes `call` and submits it via [`send`](Wallet::send).
    async fn submit<C>(
        &self,
        contract: Address,
        call: C,
        options: TxOptions,
        note: &str,
    ) -> Result<TxReceipt, EvmError>
    where
        C: SolCall + Send + 'static,
    {
        self.send(contract, Bytes::from(call.abi_encode()), options, note)
            .await
    }
}

#[async_trait]
impl<T: Evm> Evm for Arc<T> {
    async fn call_raw(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        (**self).call_raw(contract, calldata).await
    }

    async fn estimate_gas(
        &self,
        from: Address,
        contract: Address,
        calldata: Bytes,
    ) -> Result<u64, EvmError> {
        (**self).estimate_gas(from, contract, calldata).await
    }

    async fn gas_price(&self) -> Result<u128, EvmError> {
        (**self).gas_price().await
    }
}

#[async_trait]
impl<T: Wallet> Wallet for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        options: TxOptions,
        note: &str,
    ) -> Result<TxReceipt, EvmError> {
        (**self).send(contract, calldata, options, note).await
    }
}
