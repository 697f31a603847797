//! Private-key signer implementation.
//!
//! `LocalWallet` wraps an alloy provider with an embedded `EthereumWallet`
//! and submits transactions directly, waiting for the configured number of
//! confirmations within the caller's deadline.

use std::str::FromStr;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes};
use alloy::providers::{
    DynProvider, PendingTransactionError, Provider, ProviderBuilder, WatchTxError,
};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

use crate::{Evm, EvmError, TxOptions, TxReceipt, Wallet};

/// Wallet that signs locally and submits through a wallet-filled provider.
#[derive(Debug)]
pub struct LocalWallet<P = DynProvider> {
    provider: P,
    address: Address,
    required_confirmations: u64,
}

impl LocalWallet<DynProvider> {
    /// Builds an HTTP provider for `rpc_url` that signs with `private_key`
    /// (hex, with or without `0x`).
    ///
    /// No network I/O happens until the first call.
    pub fn connect(
        rpc_url: &Url,
        private_key: &str,
        required_confirmations: u64,
    ) -> Result<Self, EvmError> {
        let signer = PrivateKeySigner::from_str(private_key.trim())?;
        let address = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.clone())
            .erased();

        Ok(Self::new(provider, address, required_confirmations))
    }
}

impl<P> LocalWallet<P> {
    /// Wraps a provider that already carries a wallet filler for `address`.
    pub const fn new(provider: P, address: Address, required_confirmations: u64) -> Self {
        Self {
            provider,
            address,
            required_confirmations,
        }
    }
}

fn request(contract: Address, calldata: Bytes) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(contract)
        .with_input(calldata)
}

#[async_trait]
impl<P> Evm for LocalWallet<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn call_raw(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        Ok(self.provider.call(request(contract, calldata)).await?)
    }

    async fn estimate_gas(
        &self,
        from: Address,
        contract: Address,
        calldata: Bytes,
    ) -> Result<u64, EvmError> {
        let tx = request(contract, calldata).with_from(from);
        Ok(self.provider.estimate_gas(tx).await?)
    }

    async fn gas_price(&self) -> Result<u128, EvmError> {
        Ok(self.provider.get_gas_price().await?)
    }
}

#[async_trait]
impl<P> Wallet for LocalWallet<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    fn address(&self) -> Address {
        self.address
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        options: TxOptions,
        note: &str,
    ) -> Result<TxReceipt, EvmError> {
        info!(%contract, note, ?options, "Submitting contract call");

        let mut tx = request(contract, calldata).with_from(self.address);
        if let Some(gas_limit) = options.gas_limit {
            tx = tx.with_gas_limit(gas_limit);
        }
        if let Some(gas_price) = options.gas_price {
            tx = tx.with_gas_price(gas_price);
        }

        let pending = self.provider.send_transaction(tx).await?;
        let tx_hash = *pending.tx_hash();

        info!(%tx_hash, note, "Transaction submitted");

        let receipt = pending
            .with_required_confirmations(self.required_confirmations)
            .with_timeout(options.confirmation_timeout)
            .get_receipt()
            .await
            .map_err(|error| match (error, options.confirmation_timeout) {
                (PendingTransactionError::TxWatcher(WatchTxError::Timeout), Some(timeout)) => {
                    warn!(%tx_hash, note, ?timeout, "Transaction not confirmed in time");
                    EvmError::ConfirmationTimeout { tx_hash, timeout }
                }
                (error, _) => EvmError::Transaction(error),
            })?;

        if !receipt.status() {
            warn!(%tx_hash, note, "Transaction reverted");
            return Err(EvmError::Reverted { tx_hash });
        }

        info!(%tx_hash, note, gas_used = receipt.gas_used, "Transaction confirmed");

        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        })
    }
}
