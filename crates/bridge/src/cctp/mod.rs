//! Circle CCTP V2 bridge for native USDC between any two registered chains.
//!
//! ## Flow
//!
//! 1. **Burn**: approve (if needed) and call `TokenMessengerV2.depositForBurn()`
//!    on the source chain.
//! 2. **Attest**: poll Circle's attestation API until the burn message is
//!    signed. The real nonce only exists in the attested message; the
//!    `MessageSent` event carries a zero placeholder.
//! 3. **Mint**: call `MessageTransmitterV2.receiveMessage()` on the
//!    destination chain.
//!
//! ## Transfer speed
//!
//! `Standard` waits for hard finality (threshold 2000) and is free.
//! `Fast` uses threshold 1000; the fee (basis points) is queried from
//! `/v2/burn/USDC/fees/{source}/{destination}` before each burn and passed
//! as `maxFee`.

pub mod attestation;
mod evm;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, ChainId, TxHash, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use xusdc_evm::{EvmError, Wallet};

use self::attestation::{
    AttestationClient, AttestationError, AttestationMessage, AttestationQuery, PollPolicy,
    PollStatus,
};
use self::evm::{BurnTerms, ChainClient};
use crate::message::{CctpMessage, MessageError};
use crate::registry::{ChainRegistry, Domain, RegistryError};
use crate::{Bridge, BurnReceipt, MintOutcome, Route};

pub use self::evm::{MINT_FALLBACK_GAS_LIMIT, MINT_GAS_BUFFER_PERCENT};

/// `minFinalityThreshold` for fast transfers (soft finality).
pub const FAST_TRANSFER_THRESHOLD: u32 = 1000;

/// `minFinalityThreshold` for standard transfers (hard finality).
pub const STANDARD_TRANSFER_THRESHOLD: u32 = 2000;

/// Default approval amount: 1,000,000 USDC.
pub const DEFAULT_APPROVAL_FLOOR: U256 = U256::from_limbs([1_000_000_000_000, 0, 0, 0]);

const BASIS_POINTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferSpeed {
    #[default]
    Standard,
    Fast,
}

impl TransferSpeed {
    pub const fn min_finality_threshold(self) -> u32 {
        match self {
            Self::Standard => STANDARD_TRANSFER_THRESHOLD,
            Self::Fast => FAST_TRANSFER_THRESHOLD,
        }
    }
}

/// Errors that can occur during CCTP bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum CctpError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("no wallet connected for chain {chain_id}")]
    ChainNotConnected { chain_id: ChainId },
    #[error("source and destination are both chain {chain_id}")]
    SameChain { chain_id: ChainId },
    #[error("transfer amount must be greater than zero")]
    InvalidAmount,
    #[error("insufficient USDC on chain {chain_id}: balance {balance}, required {required}")]
    InsufficientBalance {
        chain_id: ChainId,
        balance: U256,
        required: U256,
    },
    #[error("insufficient USDC allowance on chain {chain_id}: {allowance}, required {required}")]
    InsufficientAllowance {
        chain_id: ChainId,
        allowance: U256,
        required: U256,
    },
    #[error("USDC approval {tx} reverted on chain {chain_id}")]
    ApprovalFailed { chain_id: ChainId, tx: TxHash },
    #[error("USDC approval {tx} on chain {chain_id} not confirmed within {timeout:?}")]
    ApprovalNotConfirmed {
        chain_id: ChainId,
        tx: TxHash,
        timeout: Duration,
    },
    #[error("burn {tx} reverted on chain {chain_id}")]
    BurnFailed { chain_id: ChainId, tx: TxHash },
    #[error("burn {tx} on chain {chain_id} not confirmed within {timeout:?}")]
    BurnNotConfirmed {
        chain_id: ChainId,
        tx: TxHash,
        timeout: Duration,
    },
    #[error("mint {tx} reverted on chain {chain_id}")]
    MintFailed { chain_id: ChainId, tx: TxHash },
    #[error("mint {tx} on chain {chain_id} not confirmed within {timeout:?}")]
    MintNotConfirmed {
        chain_id: ChainId,
        tx: TxHash,
        timeout: Duration,
    },
    #[error("attestation for {query} on domain {domain} timed out: {source}")]
    AttestationTimeout {
        domain: Domain,
        query: AttestationQuery,
        source: AttestationError,
    },
    #[error("attestation polling for {query} cancelled")]
    AttestationCancelled { query: AttestationQuery },
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    #[error("MessageSent event not found in burn {tx}")]
    MessageSentEventNotFound { tx: TxHash },
    #[error("MintAndWithdraw event not found in mint {tx}")]
    MintAndWithdrawEventNotFound { tx: TxHash },
    #[error("attested message is for domain {actual}, chain expects domain {expected}")]
    DomainMismatch { expected: Domain, actual: Domain },
    #[error("attested message has no nonce assigned")]
    MissingNonce,
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("EVM error on chain {chain_id}: {source}")]
    Evm { chain_id: ChainId, source: EvmError },
    #[error("fast transfer fee not available for domain {source_domain} -> {destination_domain}")]
    FastTransferFeeNotAvailable {
        source_domain: Domain,
        destination_domain: Domain,
    },
    #[error("fee calculation overflow")]
    FeeCalculationOverflow,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Fee entry from Circle's `/v2/burn/USDC/fees/{source}/{dest}` API.
///
/// One entry per finality threshold level.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FeeEntry {
    finality_threshold: u32,
    /// Basis points (1 = 0.01%).
    minimum_fee: u64,
}

/// Everything needed to construct a [`CctpBridge`].
pub struct CctpCtx<W> {
    pub registry: Arc<ChainRegistry>,
    /// One signer per chain the bridge may act on.
    pub wallets: HashMap<ChainId, W>,
    pub attestation: AttestationClient,
    pub speed: TransferSpeed,
    /// Minimum approval amount in micro-USDC.
    pub approval_floor: U256,
}

/// CCTP V2 bridge over a set of registered chains.
pub struct CctpBridge<W> {
    registry: Arc<ChainRegistry>,
    chains: HashMap<ChainId, ChainClient<W>>,
    attestation: AttestationClient,
    speed: TransferSpeed,
    approval_floor: U256,
}

impl<W: Wallet> CctpBridge<W> {
    /// Every wallet must belong to a registered chain.
    pub fn try_from_ctx(ctx: CctpCtx<W>) -> Result<Self, CctpError> {
        let chains = ctx
            .wallets
            .into_iter()
            .map(|(chain_id, wallet)| {
                let config = ctx.registry.get(chain_id)?.clone();
                Ok((chain_id, ChainClient::new(config, wallet)))
            })
            .collect::<Result<HashMap<_, _>, CctpError>>()?;

        Ok(Self {
            registry: ctx.registry,
            chains,
            attestation: ctx.attestation,
            speed: ctx.speed,
            approval_floor: ctx.approval_floor,
        })
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    fn chain(&self, chain_id: ChainId) -> Result<&ChainClient<W>, CctpError> {
        self.registry.get(chain_id)?;
        self.chains
            .get(&chain_id)
            .ok_or(CctpError::ChainNotConnected { chain_id })
    }

    async fn query_fast_transfer_fee(
        &self,
        amount: U256,
        source_domain: Domain,
        destination_domain: Domain,
    ) -> Result<U256, CctpError> {
        let url = format!(
            "{}/v2/burn/USDC/fees/{source_domain}/{destination_domain}",
            self.attestation.base_url()
        );
        let response = self.attestation.http().get(&url).send().await?;

        let not_available = CctpError::FastTransferFeeNotAvailable {
            source_domain,
            destination_domain,
        };

        if !response.status().is_success() {
            warn!(
                url,
                status = response.status().as_u16(),
                "Fee endpoint failed"
            );
            return Err(not_available);
        }

        let fee_entries: Vec<FeeEntry> = response.json().await?;

        let fast_fee_bps = fee_entries
            .iter()
            .find(|entry| entry.finality_threshold == FAST_TRANSFER_THRESHOLD)
            .ok_or(not_available)?
            .minimum_fee;

        debug!(
            %source_domain,
            %destination_domain,
            fast_fee_bps,
            "Retrieved fast transfer fee"
        );

        max_fee_for(amount, fast_fee_bps)
    }

    async fn burn_terms(
        &self,
        amount: U256,
        source_domain: Domain,
        destination_domain: Domain,
    ) -> Result<BurnTerms, CctpError> {
        let max_fee = match self.speed {
            TransferSpeed::Standard => U256::ZERO,
            TransferSpeed::Fast => {
                self.query_fast_transfer_fee(amount, source_domain, destination_domain)
                    .await?
            }
        };

        Ok(BurnTerms {
            destination_domain,
            max_fee,
            min_finality_threshold: self.speed.min_finality_threshold(),
        })
    }
}

/// `amount * bps / 10000`, rounded up so the fee never falls short.
fn max_fee_for(amount: U256, fee_bps: u64) -> Result<U256, CctpError> {
    let scaled = amount
        .checked_mul(U256::from(fee_bps))
        .ok_or(CctpError::FeeCalculationOverflow)?;

    let (fee, remainder) = scaled.div_rem(U256::from(BASIS_POINTS));

    Ok(if remainder.is_zero() { fee } else { fee + U256::from(1) })
}

#[async_trait]
impl<W: Wallet> Bridge for CctpBridge<W> {
    type Error = CctpError;

    fn owner(&self, chain_id: ChainId) -> Result<Address, CctpError> {
        self.chain(chain_id).map(ChainClient::owner)
    }

    async fn balance(&self, chain_id: ChainId, owner: Address) -> Result<U256, CctpError> {
        self.chain(chain_id)?.balance_of(owner).await
    }

    #[instrument(skip(self), fields(source = route.source, destination = route.destination))]
    async fn burn(
        &self,
        route: Route,
        amount: U256,
        recipient: Address,
    ) -> Result<BurnReceipt, CctpError> {
        let source = self.chain(route.source)?;
        let destination_domain = self.registry.domain_of(route.destination)?;

        if route.source == route.destination {
            return Err(CctpError::SameChain {
                chain_id: route.source,
            });
        }

        if amount.is_zero() {
            return Err(CctpError::InvalidAmount);
        }

        let terms = self
            .burn_terms(amount, source.config().domain, destination_domain)
            .await?;

        let owner = source.owner();
        let _balance_guard = source.lock_balance().await;
        let balance_before = source.balance_of(owner).await?;
        if balance_before < amount {
            return Err(CctpError::InsufficientBalance {
                chain_id: route.source,
                balance: balance_before,
                required: amount,
            });
        }

        let approval_tx = source
            .ensure_approval(amount, self.approval_floor)
            .await?;

        let burned = source.deposit_for_burn(amount, recipient, terms).await?;

        let balance_after = source.balance_of(owner).await?;

        info!(
            tx = %burned.tx,
            %amount,
            %balance_before,
            %balance_after,
            "Burn confirmed"
        );

        Ok(BurnReceipt {
            tx: burned.tx,
            amount,
            message: burned.message,
            approval_tx,
            balance_before,
            balance_after,
        })
    }

    async fn attestation_status(
        &self,
        source_chain: ChainId,
        query: AttestationQuery,
    ) -> Result<PollStatus, CctpError> {
        let domain = self.registry.domain_of(source_chain)?;
        Ok(self.attestation.fetch(domain, query).await)
    }

    async fn poll_attestation(
        &self,
        source_chain: ChainId,
        query: AttestationQuery,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<AttestationMessage, CctpError> {
        let domain = self.registry.domain_of(source_chain)?;

        self.attestation
            .poll(domain, query, policy, cancel)
            .await
            .map_err(|error| match error {
                AttestationError::Cancelled { .. } => CctpError::AttestationCancelled { query },
                source => CctpError::AttestationTimeout {
                    domain,
                    query,
                    source,
                },
            })
    }

    #[instrument(skip(self, attestation), fields(destination = destination_chain))]
    async fn mint(
        &self,
        destination_chain: ChainId,
        attestation: &AttestationMessage,
    ) -> Result<MintOutcome, CctpError> {
        let destination = self.chain(destination_chain)?;
        let message = CctpMessage::decode(&attestation.message)?;

        if message.destination_domain != destination.config().domain {
            return Err(CctpError::DomainMismatch {
                expected: destination.config().domain,
                actual: message.destination_domain,
            });
        }

        if !message.has_nonce() {
            return Err(CctpError::MissingNonce);
        }

        let _balance_guard = destination.lock_balance().await;
        destination
            .receive_message(
                message.nonce,
                attestation.message.clone(),
                attestation.attestation.clone(),
            )
            .await
    }
}
