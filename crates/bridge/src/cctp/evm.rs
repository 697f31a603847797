//! Single-chain CCTP operations.

use alloy::primitives::{Address, B256, Bytes, ChainId, TxHash, U256};
use alloy::sol_types::{SolCall, SolEvent};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, trace, warn};
use xusdc_evm::{EvmError, TxOptions, TxReceipt, Wallet};

use super::CctpError;
use crate::balance::UsdcReader;
use crate::bindings::{IERC20, MessageTransmitterV2, TokenMessengerV2};
use crate::message::address_to_word;
use crate::registry::{ChainConfig, Domain};
use crate::{MintOutcome, MintReceipt};

/// Gas limit used for `receiveMessage` when estimation fails.
pub const MINT_FALLBACK_GAS_LIMIT: u64 = 300_000;

/// Headroom added to a successful `receiveMessage` estimate.
pub const MINT_GAS_BUFFER_PERCENT: u64 = 20;

pub(crate) fn buffered_gas(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(MINT_GAS_BUFFER_PERCENT) / 100)
}

/// Burn parameters besides amount and recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BurnTerms {
    pub(crate) destination_domain: Domain,
    pub(crate) max_fee: U256,
    pub(crate) min_finality_threshold: u32,
}

/// Confirmed burn as seen on the source chain.
#[derive(Debug)]
pub(crate) struct Burned {
    pub(crate) tx: TxHash,
    pub(crate) message: Bytes,
}

/// A configured chain together with the wallet that acts on it.
pub(crate) struct ChainClient<W> {
    config: ChainConfig,
    wallet: W,
    /// Held by every operation that moves the signer's USDC on this chain.
    balance_lock: Mutex<()>,
}

impl<W: Wallet> ChainClient<W> {
    pub(crate) fn new(config: ChainConfig, wallet: W) -> Self {
        Self {
            config,
            wallet,
            balance_lock: Mutex::new(()),
        }
    }

    /// Excludes other burns and mints by this bridge on this chain, so
    /// balance reads taken under the guard only see the holder's writes.
    pub(crate) async fn lock_balance(&self) -> MutexGuard<'_, ()> {
        self.balance_lock.lock().await
    }

    pub(crate) const fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub(crate) fn owner(&self) -> Address {
        self.wallet.address()
    }

    fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    fn reader(&self) -> UsdcReader<'_, W> {
        UsdcReader::new(&self.wallet, self.config.usdc)
    }

    pub(crate) async fn balance_of(&self, owner: Address) -> Result<U256, CctpError> {
        self.reader()
            .balance_of(owner)
            .await
            .map_err(evm_error(self.chain_id()))
    }

    async fn allowance(&self) -> Result<U256, CctpError> {
        self.reader()
            .allowance(self.owner(), self.config.token_messenger)
            .await
            .map_err(evm_error(self.chain_id()))
    }

    /// Gas options for source-chain writes: live price plus the configured
    /// overpay, falling back to the static price if the node cannot say.
    async fn write_options(&self, gas_limit: Option<u64>) -> Result<TxOptions, CctpError> {
        let mut options =
            TxOptions::default().with_confirmation_timeout(self.config.confirmation_timeout);

        if let Some(gas_limit) = gas_limit {
            options = options.with_gas_limit(gas_limit);
        }

        let gas_price = match self.wallet.gas_price().await {
            Ok(live) => self.config.bumped_gas_price(live),
            Err(error) => match self.config.default_gas_price {
                Some(fallback) => {
                    warn!(chain_id = self.chain_id(), %error, fallback, "Gas price lookup failed, using configured price");
                    fallback
                }
                None => return Err(evm_error(self.chain_id())(error)),
            },
        };

        Ok(options.with_gas_price(gas_price))
    }

    /// Approves the token messenger if the current allowance does not cover
    /// `amount`. Approves at least `floor` to avoid re-approving every burn.
    ///
    /// Returns the approval transaction if one was sent.
    #[instrument(skip(self), fields(chain_id = self.config.chain_id), level = "debug")]
    pub(crate) async fn ensure_approval(
        &self,
        amount: U256,
        floor: U256,
    ) -> Result<Option<TxHash>, CctpError> {
        let allowance = self.allowance().await?;

        trace!(%allowance, %amount, "Checking USDC allowance");

        if allowance >= amount {
            return Ok(None);
        }

        let approve = IERC20::approveCall {
            spender: self.config.token_messenger,
            amount: amount.max(floor),
        };
        let options = self.write_options(None).await?;

        let receipt = self
            .submit(
                self.config.usdc,
                approve,
                options,
                "USDC approve for CCTP",
                |chain_id, tx| CctpError::ApprovalFailed { chain_id, tx },
                |chain_id, tx, timeout| CctpError::ApprovalNotConfirmed {
                    chain_id,
                    tx,
                    timeout,
                },
            )
            .await?;

        let allowance = self.allowance().await?;
        if allowance < amount {
            return Err(CctpError::InsufficientAllowance {
                chain_id: self.chain_id(),
                allowance,
                required: amount,
            });
        }

        info!(tx = %receipt.tx_hash, %allowance, "USDC approval confirmed");

        Ok(Some(receipt.tx_hash))
    }

    #[instrument(skip(self), fields(chain_id = self.config.chain_id), level = "debug")]
    pub(crate) async fn deposit_for_burn(
        &self,
        amount: U256,
        recipient: Address,
        terms: BurnTerms,
    ) -> Result<Burned, CctpError> {
        info!(
            %amount,
            %recipient,
            destination_domain = %terms.destination_domain,
            max_fee = %terms.max_fee,
            min_finality_threshold = terms.min_finality_threshold,
            "Depositing for burn"
        );

        let call = TokenMessengerV2::depositForBurnCall {
            amount,
            destinationDomain: terms.destination_domain.0,
            mintRecipient: address_to_word(recipient),
            burnToken: self.config.usdc,
            // bytes32(0) lets any address call receiveMessage on the destination.
            destinationCaller: B256::ZERO,
            maxFee: terms.max_fee,
            minFinalityThreshold: terms.min_finality_threshold,
        };
        let options = self
            .write_options(Some(self.config.default_gas_limit))
            .await?;

        let receipt = self
            .submit(
                self.config.token_messenger,
                call,
                options,
                "depositForBurn",
                |chain_id, tx| CctpError::BurnFailed { chain_id, tx },
                |chain_id, tx, timeout| CctpError::BurnNotConfirmed {
                    chain_id,
                    tx,
                    timeout,
                },
            )
            .await?;

        let message = receipt
            .logs
            .iter()
            .filter(|log| log.address == self.config.message_transmitter)
            .find_map(|log| MessageTransmitterV2::MessageSent::decode_log(log).ok())
            .map(|event| event.data.message)
            .ok_or(CctpError::MessageSentEventNotFound {
                tx: receipt.tx_hash,
            })?;

        Ok(Burned {
            tx: receipt.tx_hash,
            message,
        })
    }

    /// Whether the destination transmitter already consumed `nonce`.
    async fn nonce_used(&self, nonce: B256) -> Result<bool, CctpError> {
        let used = self
            .wallet
            .call(
                self.config.message_transmitter,
                MessageTransmitterV2::usedNoncesCall { nonce },
            )
            .await
            .map_err(evm_error(self.chain_id()))?;

        Ok(!used.is_zero())
    }

    async fn mint_gas_limit(&self, calldata: &Bytes) -> u64 {
        match self
            .wallet
            .estimate_gas(
                self.owner(),
                self.config.message_transmitter,
                calldata.clone(),
            )
            .await
        {
            Ok(estimate) => {
                let gas_limit = buffered_gas(estimate);
                debug!(estimate, gas_limit, "Estimated receiveMessage gas");
                gas_limit
            }
            Err(error) => {
                warn!(
                    chain_id = self.chain_id(),
                    %error,
                    fallback = MINT_FALLBACK_GAS_LIMIT,
                    "Gas estimation failed, using fallback limit"
                );
                MINT_FALLBACK_GAS_LIMIT
            }
        }
    }

    /// Submits `receiveMessage` on this chain.
    ///
    /// Parses the `MintAndWithdraw` event to report what the recipient
    /// actually received.
    #[instrument(skip(self, message, attestation), fields(chain_id = self.config.chain_id), level = "debug")]
    pub(crate) async fn receive_message(
        &self,
        nonce: B256,
        message: Bytes,
        attestation: Bytes,
    ) -> Result<MintOutcome, CctpError> {
        if self.nonce_used(nonce).await? {
            info!(%nonce, "Message already received, skipping mint");
            return Ok(MintOutcome::AlreadyReceived { nonce });
        }

        let call = MessageTransmitterV2::receiveMessageCall {
            message,
            attestation,
        };
        let calldata = Bytes::from(call.abi_encode());
        let gas_limit = self.mint_gas_limit(&calldata).await;

        let options = TxOptions::default()
            .with_gas_limit(gas_limit)
            .with_confirmation_timeout(self.config.confirmation_timeout);

        let receipt = classify_write(
            self.wallet
                .send(
                    self.config.message_transmitter,
                    calldata,
                    options,
                    "receiveMessage",
                )
                .await,
            self.chain_id(),
            |chain_id, tx| CctpError::MintFailed { chain_id, tx },
            |chain_id, tx, timeout| CctpError::MintNotConfirmed {
                chain_id,
                tx,
                timeout,
            },
        )?;

        let mint_event = receipt
            .logs
            .iter()
            .filter(|log| log.address == self.config.token_messenger)
            .find_map(|log| TokenMessengerV2::MintAndWithdraw::decode_log(log).ok())
            .ok_or(CctpError::MintAndWithdrawEventNotFound {
                tx: receipt.tx_hash,
            })?;

        info!(
            tx = %receipt.tx_hash,
            amount = %mint_event.data.amount,
            fee_collected = %mint_event.data.feeCollected,
            "Parsed MintAndWithdraw event"
        );

        Ok(MintOutcome::Minted(MintReceipt {
            tx: receipt.tx_hash,
            nonce,
            amount: mint_event.data.amount,
            fee: mint_event.data.feeCollected,
        }))
    }

    async fn submit<C>(
        &self,
        contract: Address,
        call: C,
        options: TxOptions,
        note: &str,
        reverted: fn(ChainId, TxHash) -> CctpError,
        unconfirmed: fn(ChainId, TxHash, std::time::Duration) -> CctpError,
    ) -> Result<TxReceipt, CctpError>
    where
        C: SolCall + Send + 'static,
    {
        classify_write(
            self.wallet.submit(contract, call, options, note).await,
            self.chain_id(),
            reverted,
            unconfirmed,
        )
    }
}

fn evm_error(chain_id: ChainId) -> impl FnOnce(EvmError) -> CctpError {
    move |source| CctpError::Evm { chain_id, source }
}

fn classify_write(
    result: Result<TxReceipt, EvmError>,
    chain_id: ChainId,
    reverted: fn(ChainId, TxHash) -> CctpError,
    unconfirmed: fn(ChainId, TxHash, std::time::Duration) -> CctpError,
) -> Result<TxReceipt, CctpError> {
    match result {
        Ok(receipt) => Ok(receipt),
        Err(EvmError::Reverted { tx_hash }) => Err(reverted(chain_id, tx_hash)),
        Err(EvmError::ConfirmationTimeout { tx_hash, timeout }) => {
            Err(unconfirmed(chain_id, tx_hash, timeout))
        }
        Err(source) => Err(CctpError::Evm { chain_id, source }),
    }
}
