//! [`Relay`] drives a transfer from burn to mint and resumes interrupted
//! transfers from whatever state they were left in.
//!
//! After the burn has confirmed, failures never trigger compensating
//! actions: the transfer stays in its last good state and can be resumed.

use std::sync::Arc;

use alloy::primitives::{Address, B256, ChainId, TxHash, U256};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use xusdc_bridge::usdc::{UsdcConversionError, VERIFICATION_TOLERANCE};
use xusdc_bridge::{
    AttestationMessage, AttestationQuery, Bridge, CctpError, ChainRegistry, MintOutcome,
    PollPolicy, RegistryError, Route, Usdc,
};

use crate::tracker::{TrackerError, TransferTracker};
use crate::transfer::{Transfer, TransferError, TransferId, TransferStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: ChainId,
    pub destination: ChainId,
    pub amount: Usdc,
    pub recipient: Address,
}

/// Relay failure. `E` is the bridge's error type.
#[derive(Debug, thiserror::Error)]
pub enum RelayError<E = CctpError>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Conversion(#[from] UsdcConversionError),
    #[error("burn on chain {chain_id} failed: {source}")]
    Burn { chain_id: ChainId, source: E },
    #[error(
        "transfer {id}: burn {burn_tx} debited {observed} USDC from chain {chain_id}, expected {expected}"
    )]
    AmountMismatch {
        id: TransferId,
        chain_id: ChainId,
        burn_tx: TxHash,
        expected: Usdc,
        observed: Usdc,
    },
    #[error("transfer {id}: attestation for burn {burn_tx} on chain {chain_id} failed: {source}")]
    Attestation {
        id: TransferId,
        chain_id: ChainId,
        burn_tx: TxHash,
        source: E,
    },
    #[error("transfer {id}: attested message for burn {burn_tx} does not match: {reason}")]
    AttestationMismatch {
        id: TransferId,
        burn_tx: TxHash,
        reason: String,
    },
    #[error("transfer {id}: no attestation recorded")]
    MissingAttestation { id: TransferId },
    #[error("transfer {id}: mint on chain {chain_id} failed: {source}")]
    Mint {
        id: TransferId,
        chain_id: ChainId,
        source: E,
    },
    #[error("transfer {id} failed: {reason}")]
    TransferFailed { id: TransferId, reason: String },
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Orchestrates burn -> attestation -> mint over a [`Bridge`], recording
/// every transition in a [`TransferTracker`].
pub struct Relay<B> {
    registry: Arc<ChainRegistry>,
    bridge: Arc<B>,
    tracker: TransferTracker,
    policy: PollPolicy,
}

impl<B: Bridge> Relay<B> {
    pub fn new(
        registry: Arc<ChainRegistry>,
        bridge: Arc<B>,
        tracker: TransferTracker,
        policy: PollPolicy,
    ) -> Self {
        Self {
            registry,
            bridge,
            tracker,
            policy,
        }
    }

    pub fn tracker(&self) -> &TransferTracker {
        &self.tracker
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    /// Burns on the source chain, then attests and mints.
    ///
    /// Returns the completed transfer. If attestation or mint fails the
    /// error is returned and the transfer remains resumable in the tracker.
    #[instrument(
        skip(self, cancel),
        fields(source = request.source, destination = request.destination, amount = %request.amount)
    )]
    pub async fn transfer(
        &self,
        request: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<Transfer, RelayError<B::Error>> {
        self.registry.get(request.source)?;
        self.registry.get(request.destination)?;
        let amount = request.amount.to_micro()?;

        let receipt = self
            .bridge
            .burn(
                Route {
                    source: request.source,
                    destination: request.destination,
                },
                amount,
                request.recipient,
            )
            .await
            .map_err(|source| RelayError::Burn {
                chain_id: request.source,
                source,
            })?;

        let transfer = Transfer::burned(
            request.source,
            request.destination,
            request.amount,
            request.recipient,
            receipt.tx,
        );
        let id = transfer.id();
        self.tracker.insert(transfer);

        info!(%id, burn_tx = %receipt.tx, "Transfer burned");

        let observed = Usdc::from_micro(
            receipt
                .balance_before
                .saturating_sub(receipt.balance_after),
        )?;

        if !observed.abs_diff_within(request.amount, VERIFICATION_TOLERANCE) {
            warn!(
                %id,
                expected = %request.amount,
                %observed,
                "Source balance change does not match burned amount"
            );
            self.tracker.update(id, |transfer| {
                transfer.mark_failed(format!(
                    "source balance dropped by {observed}, expected {}",
                    request.amount
                ))
            })?;

            return Err(RelayError::AmountMismatch {
                id,
                chain_id: request.source,
                burn_tx: receipt.tx,
                expected: request.amount,
                observed,
            });
        }

        self.resume(id, cancel).await
    }

    /// Continues a tracked transfer from its current state.
    ///
    /// A completed transfer is returned as is, without touching the
    /// destination chain.
    #[instrument(skip(self, cancel), fields(%id))]
    pub async fn resume(
        &self,
        id: TransferId,
        cancel: &CancellationToken,
    ) -> Result<Transfer, RelayError<B::Error>> {
        let mut transfer = self
            .tracker
            .get(id)
            .ok_or(RelayError::UnknownTransfer(id))?;

        loop {
            match transfer.status() {
                TransferStatus::Burned => self.attest(&mut transfer, cancel).await?,
                TransferStatus::ReadyToMint => self.mint(&mut transfer).await?,
                TransferStatus::Completed => return Ok(transfer),
                TransferStatus::Failed { reason } => {
                    return Err(RelayError::TransferFailed {
                        id,
                        reason: reason.clone(),
                    });
                }
            }
        }
    }

    /// Rebuilds a transfer from a burn that already confirmed and resumes it.
    /// A burn that is already tracked is resumed as is.
    ///
    /// The burn itself is not re-verified; the attested message is checked
    /// against the given route, amount and recipient before minting.
    #[instrument(skip(self, cancel), fields(%burn_tx, %amount))]
    pub async fn recover(
        &self,
        route: Route,
        burn_tx: TxHash,
        amount: Usdc,
        recipient: Address,
        cancel: &CancellationToken,
    ) -> Result<Transfer, RelayError<B::Error>> {
        self.registry.get(route.source)?;
        self.registry.get(route.destination)?;
        amount.to_micro()?;

        let candidate = Transfer::burned(
            route.source,
            route.destination,
            amount,
            recipient,
            burn_tx,
        );
        let candidate_id = candidate.id();
        let transfer = self.tracker.insert_for_burn(candidate);
        let id = transfer.id();

        if id == candidate_id {
            info!(%id, "Recovering transfer from burn");
        } else {
            info!(%id, status = %transfer.status(), "Burn already tracked, resuming it");
        }

        self.resume(id, cancel).await
    }

    /// `Burned -> ReadyToMint`: waits for the attestation of the burn.
    ///
    /// On timeout or cancellation the transfer stays `Burned`.
    #[instrument(skip(self, transfer, cancel), fields(id = %transfer.id(), burn_tx = %transfer.burn_tx()))]
    pub async fn attest(
        &self,
        transfer: &mut Transfer,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError<B::Error>> {
        transfer.require(&TransferStatus::Burned, "ReadyToMint")?;

        let attestation = self
            .bridge
            .poll_attestation(
                transfer.source_chain(),
                AttestationQuery::TransactionHash(transfer.burn_tx()),
                &self.policy,
                cancel,
            )
            .await
            .map_err(|source| RelayError::Attestation {
                id: transfer.id(),
                chain_id: transfer.source_chain(),
                burn_tx: transfer.burn_tx(),
                source,
            })?;

        let nonce = match self.check_attested(transfer, &attestation) {
            Ok(nonce) => nonce,
            Err(reason) => {
                warn!(%reason, "Attested message does not match transfer");
                *transfer = self
                    .tracker
                    .update(transfer.id(), |stored| stored.mark_failed(reason.clone()))?;

                return Err(RelayError::AttestationMismatch {
                    id: transfer.id(),
                    burn_tx: transfer.burn_tx(),
                    reason,
                });
            }
        };

        *transfer = self
            .tracker
            .update(transfer.id(), |stored| stored.mark_attested(nonce, attestation))?;

        info!(%nonce, "Attestation received");
        Ok(())
    }

    /// `ReadyToMint -> Completed`: submits the attested message.
    ///
    /// A message the destination already consumed completes the transfer
    /// without sending a transaction. On failure the transfer stays
    /// `ReadyToMint`.
    #[instrument(skip(self, transfer), fields(id = %transfer.id(), destination = transfer.destination_chain()))]
    pub async fn mint(&self, transfer: &mut Transfer) -> Result<(), RelayError<B::Error>> {
        transfer.require(&TransferStatus::ReadyToMint, "Completed")?;

        let attestation = transfer
            .attestation()
            .cloned()
            .ok_or(RelayError::MissingAttestation { id: transfer.id() })?;

        let outcome = self
            .bridge
            .mint(transfer.destination_chain(), &attestation)
            .await
            .map_err(|source| RelayError::Mint {
                id: transfer.id(),
                chain_id: transfer.destination_chain(),
                source,
            })?;

        let mint_tx = match outcome {
            MintOutcome::Minted(receipt) => {
                info!(
                    mint_tx = %receipt.tx,
                    amount = %receipt.amount,
                    fee = %receipt.fee,
                    "Mint confirmed"
                );
                Some(receipt.tx)
            }
            MintOutcome::AlreadyReceived { nonce } => {
                info!(%nonce, "Message already received on destination");
                None
            }
        };

        *transfer = self
            .tracker
            .update(transfer.id(), |stored| stored.mark_completed(mint_tx))?;

        Ok(())
    }

    /// Structural checks on untrusted attested content. Returns the nonce.
    fn check_attested(
        &self,
        transfer: &Transfer,
        attestation: &AttestationMessage,
    ) -> Result<B256, String> {
        let message = attestation.decode().map_err(|error| error.to_string())?;

        let source_domain = self
            .registry
            .domain_of(transfer.source_chain())
            .map_err(|error| error.to_string())?;
        let destination_domain = self
            .registry
            .domain_of(transfer.destination_chain())
            .map_err(|error| error.to_string())?;

        if message.source_domain != source_domain {
            return Err(format!(
                "source domain {}, expected {source_domain}",
                message.source_domain
            ));
        }

        if message.destination_domain != destination_domain {
            return Err(format!(
                "destination domain {}, expected {destination_domain}",
                message.destination_domain
            ));
        }

        if message.mint_recipient_address() != Some(transfer.recipient()) {
            return Err(format!("mint recipient is not {}", transfer.recipient()));
        }

        let expected: U256 = transfer.amount().to_micro().map_err(|error| error.to_string())?;
        if message.body.amount != expected {
            return Err(format!(
                "amount {} micro-USDC, expected {expected}",
                message.body.amount
            ));
        }

        if !message.has_nonce() {
            return Err("no nonce assigned".to_string());
        }

        Ok(message.nonce)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use alloy::sol_types::SolCall;
    use std::time::Duration;

    use alloy::primitives::{Bytes, address};
    use rust_decimal_macros::dec;
    use url::Url;

    use xusdc_bridge::bindings::{IERC20, MessageTransmitterV2};
    use xusdc_bridge::cctp::DEFAULT_APPROVAL_FLOOR;
    use xusdc_bridge::mock::{
        AttestationMode, MockAttestationService, MockChain, MockNetwork, mock_chain_config,
    };
    use xusdc_bridge::registry::Domain;
    use xusdc_bridge::{AttestationClient, AttestationError, CctpBridge, CctpCtx, TransferSpeed};

    use super::*;

    const OWNER: Address = address!("0x00000000000000000000000000000000000000aa");
    const RECIPIENT: Address = address!("0x00000000000000000000000000000000000000bb");

    const ETHEREUM: ChainId = 1;
    const BASE: ChainId = 8_453;
    const ETHEREUM_DOMAIN: Domain = Domain(0);
    const BASE_DOMAIN: Domain = Domain(6);

    struct Harness {
        network: MockNetwork,
        relay: Relay<CctpBridge<MockChain>>,
        _service: MockAttestationService,
    }

    async fn harness_with_policy(policy: PollPolicy) -> Harness {
        let network = MockNetwork::new();
        let ethereum = mock_chain_config("ethereum", ETHEREUM, 0);
        let base = mock_chain_config("base", BASE, 6);
        let registry = Arc::new(ChainRegistry::new([ethereum.clone(), base.clone()]).unwrap());

        let service = network.start_attestation_service().await;
        let bridge = CctpBridge::try_from_ctx(CctpCtx {
            registry: Arc::clone(&registry),
            wallets: HashMap::from([
                (ETHEREUM, network.chain(&ethereum, OWNER)),
                (BASE, network.chain(&base, OWNER)),
            ]),
            attestation: AttestationClient::new(&Url::parse(&service.base_url()).unwrap())
                .unwrap(),
            speed: TransferSpeed::Standard,
            approval_floor: DEFAULT_APPROVAL_FLOOR,
        })
        .unwrap();

        Harness {
            network,
            relay: Relay::new(registry, Arc::new(bridge), TransferTracker::new(), policy),
            _service: service,
        }
    }

    async fn harness() -> Harness {
        harness_with_policy(PollPolicy::constant(Duration::from_millis(5), 20)).await
    }

    /// Same registry and bridge with an empty tracker, as after a restart.
    fn restarted(relay: &Relay<CctpBridge<MockChain>>) -> Relay<CctpBridge<MockChain>> {
        Relay::new(
            Arc::clone(&relay.registry),
            Arc::clone(&relay.bridge),
            TransferTracker::new(),
            relay.policy,
        )
    }

    fn request(amount: Usdc) -> TransferRequest {
        TransferRequest {
            source: ETHEREUM,
            destination: BASE,
            amount,
            recipient: RECIPIENT,
        }
    }

    fn mints(network: &MockNetwork) -> usize {
        network
            .sent_calls(BASE_DOMAIN)
            .iter()
            .filter(|call| call.selector == MessageTransmitterV2::receiveMessageCall::SELECTOR)
            .count()
    }

    #[tokio::test]
    async fn transfer_moves_one_usdc_from_ethereum_to_base() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));

        let transfer = harness
            .relay
            .transfer(request(Usdc(dec!(1.0))), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.status(), &TransferStatus::Completed);
        assert!(transfer.mint_tx().is_some());
        assert!(transfer.nonce().is_some_and(|nonce| nonce != B256::ZERO));
        assert_eq!(
            harness.network.balance(ETHEREUM_DOMAIN, OWNER),
            U256::from(9_000_000)
        );
        assert_eq!(
            harness.network.balance(BASE_DOMAIN, RECIPIENT),
            U256::from(1_000_000)
        );
        assert_eq!(harness.relay.tracker().get(transfer.id()), Some(transfer));
    }

    #[tokio::test]
    async fn attestation_timeout_leaves_transfer_burned_and_source_debited() {
        let harness = harness_with_policy(PollPolicy::constant(Duration::from_millis(1), 3)).await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .set_attestation_mode(AttestationMode::Pending);

        let error = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
            .unwrap_err();

        let RelayError::Attestation { id, source, .. } = error else {
            panic!("expected attestation error, got {error:?}");
        };
        assert!(matches!(
            source,
            CctpError::AttestationTimeout {
                source: AttestationError::Timeout { attempts: 3, .. },
                ..
            }
        ));

        let transfer = harness.relay.tracker().get(id).unwrap();
        assert_eq!(transfer.status(), &TransferStatus::Burned);
        assert_eq!(
            harness.network.balance(ETHEREUM_DOMAIN, OWNER),
            U256::from(9_000_000)
        );
        assert_eq!(
            harness.network.balance(BASE_DOMAIN, RECIPIENT),
            U256::ZERO
        );
    }

    #[tokio::test]
    async fn timed_out_transfer_completes_on_resume() {
        let harness = harness_with_policy(PollPolicy::constant(Duration::from_millis(1), 2)).await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .set_attestation_mode(AttestationMode::NotFound);

        let Err(RelayError::Attestation { id, .. }) = harness
            .relay
            .transfer(request(Usdc(dec!(2.5))), &CancellationToken::new())
            .await
        else {
            panic!("expected attestation failure");
        };

        harness
            .network
            .set_attestation_mode(AttestationMode::Complete);
        let transfer = harness
            .relay
            .resume(id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.status(), &TransferStatus::Completed);
        assert_eq!(
            harness.network.balance(BASE_DOMAIN, RECIPIENT),
            U256::from(2_500_000)
        );
    }

    #[tokio::test]
    async fn resuming_completed_transfer_sends_no_mint() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        let completed = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
            .unwrap();
        let rpc_calls = harness.network.rpc_calls(BASE_DOMAIN);

        let resumed = harness
            .relay
            .resume(completed.id(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resumed, completed);
        assert_eq!(mints(&harness.network), 1);
        assert_eq!(harness.network.rpc_calls(BASE_DOMAIN), rpc_calls);
    }

    #[tokio::test]
    async fn failed_mint_stays_ready_and_retry_does_not_double_credit() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .inject(BASE_DOMAIN, |faults| faults.mint_confirmation_timeout = true);

        let Err(RelayError::Mint { id, chain_id, .. }) = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
        else {
            panic!("expected mint failure");
        };
        assert_eq!(chain_id, BASE);
        assert_eq!(
            harness.relay.tracker().get(id).unwrap().status(),
            &TransferStatus::ReadyToMint
        );

        // The unconfirmed mint landed anyway; the retry must notice.
        harness
            .network
            .inject(BASE_DOMAIN, |faults| faults.mint_confirmation_timeout = false);
        let transfer = harness
            .relay
            .resume(id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.status(), &TransferStatus::Completed);
        assert_eq!(transfer.mint_tx(), None);
        assert_eq!(mints(&harness.network), 1);
        assert_eq!(
            harness.network.balance(BASE_DOMAIN, RECIPIENT),
            U256::from(1_000_000)
        );
    }

    #[tokio::test]
    async fn reverted_mint_is_retried_on_resume() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .inject(BASE_DOMAIN, |faults| faults.revert_mint = true);

        let Err(RelayError::Mint { id, .. }) = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
        else {
            panic!("expected mint failure");
        };

        harness
            .network
            .inject(BASE_DOMAIN, |faults| faults.revert_mint = false);
        let transfer = harness
            .relay
            .resume(id, &CancellationToken::new())
            .await
            .unwrap();

        assert!(transfer.mint_tx().is_some());
        assert_eq!(
            harness.network.balance(BASE_DOMAIN, RECIPIENT),
            U256::from(1_000_000)
        );
    }

    #[tokio::test]
    async fn unexpected_balance_drop_fails_transfer_before_mint() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness.network.inject(ETHEREUM_DOMAIN, |faults| {
            faults.burn_surcharge = U256::from(5_000);
        });

        let error = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
            .unwrap_err();

        let RelayError::AmountMismatch {
            id,
            expected,
            observed,
            ..
        } = error
        else {
            panic!("expected amount mismatch, got {error:?}");
        };
        assert_eq!(expected, Usdc(dec!(1)));
        assert_eq!(observed, Usdc(dec!(1.005)));
        assert!(matches!(
            harness.relay.tracker().get(id).unwrap().status(),
            &TransferStatus::Failed { .. }
        ));
        assert_eq!(mints(&harness.network), 0);

        let resumed = harness
            .relay
            .resume(id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(resumed, RelayError::TransferFailed { .. }));
    }

    #[tokio::test]
    async fn balance_drift_within_tolerance_is_accepted() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness.network.inject(ETHEREUM_DOMAIN, |faults| {
            faults.burn_surcharge = U256::from(1_000);
        });

        let transfer = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.status(), &TransferStatus::Completed);
    }

    #[tokio::test]
    async fn unsupported_chain_fails_without_rpc_calls_or_tracking() {
        let harness = harness().await;

        let error = harness
            .relay
            .transfer(
                TransferRequest {
                    destination: 56,
                    ..request(Usdc(dec!(1)))
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RelayError::Registry(RegistryError::UnsupportedChain { chain_id: 56 })
        ));
        assert_eq!(harness.network.rpc_calls(ETHEREUM_DOMAIN), 0);
        assert!(harness.relay.tracker().list().is_empty());
    }

    #[tokio::test]
    async fn insufficient_balance_is_reported_without_tracking() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(500_000));

        let error = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RelayError::Burn {
                chain_id: ETHEREUM,
                source: CctpError::InsufficientBalance { .. }
            }
        ));
        assert!(harness.relay.tracker().list().is_empty());
    }

    #[tokio::test]
    async fn approval_is_sent_only_when_allowance_is_short() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));

        for _ in 0..2 {
            harness
                .relay
                .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
                .await
                .unwrap();
        }

        let approvals = harness
            .network
            .sent_calls(ETHEREUM_DOMAIN)
            .iter()
            .filter(|call| call.selector == IERC20::approveCall::SELECTOR)
            .count();
        assert_eq!(approvals, 1);
    }

    #[tokio::test]
    async fn recover_completes_transfer_from_burn_tx() {
        let harness = harness_with_policy(PollPolicy::constant(Duration::from_millis(1), 2)).await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .set_attestation_mode(AttestationMode::Pending);
        let Err(RelayError::Attestation { burn_tx, .. }) = harness
            .relay
            .transfer(request(Usdc(dec!(3))), &CancellationToken::new())
            .await
        else {
            panic!("expected attestation failure");
        };
        harness
            .network
            .set_attestation_mode(AttestationMode::Complete);

        let relay = restarted(&harness.relay);
        let recovered = relay
            .recover(
                Route {
                    source: ETHEREUM,
                    destination: BASE,
                },
                burn_tx,
                Usdc(dec!(3)),
                RECIPIENT,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(recovered.status(), &TransferStatus::Completed);
        assert_eq!(recovered.burn_tx(), burn_tx);
        assert_eq!(relay.tracker().list(), vec![recovered]);
        assert_eq!(
            harness.network.balance(BASE_DOMAIN, RECIPIENT),
            U256::from(3_000_000)
        );
    }

    #[tokio::test]
    async fn recover_with_wrong_amount_fails_on_attested_message() {
        let harness = harness_with_policy(PollPolicy::constant(Duration::from_millis(1), 2)).await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .set_attestation_mode(AttestationMode::Pending);
        let Err(RelayError::Attestation { burn_tx, .. }) = harness
            .relay
            .transfer(request(Usdc(dec!(3))), &CancellationToken::new())
            .await
        else {
            panic!("expected attestation failure");
        };
        harness
            .network
            .set_attestation_mode(AttestationMode::Complete);

        let error = restarted(&harness.relay)
            .recover(
                Route {
                    source: ETHEREUM,
                    destination: BASE,
                },
                burn_tx,
                Usdc(dec!(4)),
                RECIPIENT,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, RelayError::AttestationMismatch { .. }));
        assert_eq!(mints(&harness.network), 0);
    }

    #[tokio::test]
    async fn recovering_a_tracked_burn_resumes_it_instead_of_duplicating() {
        let harness = harness_with_policy(PollPolicy::constant(Duration::from_millis(1), 2)).await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .set_attestation_mode(AttestationMode::Pending);
        let Err(RelayError::Attestation { id, burn_tx, .. }) = harness
            .relay
            .transfer(request(Usdc(dec!(3))), &CancellationToken::new())
            .await
        else {
            panic!("expected attestation failure");
        };
        harness
            .network
            .set_attestation_mode(AttestationMode::Complete);

        let recovered = harness
            .relay
            .recover(
                Route {
                    source: ETHEREUM,
                    destination: BASE,
                },
                burn_tx,
                Usdc(dec!(3)),
                RECIPIENT,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(recovered.id(), id);
        assert_eq!(recovered.status(), &TransferStatus::Completed);
        assert_eq!(harness.relay.tracker().list(), vec![recovered]);
        assert_eq!(mints(&harness.network), 1);
    }

    #[tokio::test]
    async fn cancelled_poll_leaves_transfer_burned() {
        let harness = harness().await;
        harness
            .network
            .set_balance(ETHEREUM_DOMAIN, OWNER, U256::from(10_000_000));
        harness
            .network
            .set_attestation_mode(AttestationMode::Pending);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let Err(RelayError::Attestation { id, source, .. }) = harness
            .relay
            .transfer(request(Usdc(dec!(1))), &cancel)
            .await
        else {
            panic!("expected attestation failure");
        };

        assert!(matches!(source, CctpError::AttestationCancelled { .. }));
        assert_eq!(
            harness.relay.tracker().get(id).unwrap().status(),
            &TransferStatus::Burned
        );
    }

    #[tokio::test]
    async fn mint_before_attestation_is_rejected_without_rpc() {
        let harness = harness().await;
        let mut transfer = Transfer::burned(ETHEREUM, BASE, Usdc(dec!(1)), RECIPIENT, TxHash::ZERO);
        harness.relay.tracker().insert(transfer.clone());

        let error = harness.relay.mint(&mut transfer).await.unwrap_err();

        assert!(matches!(
            error,
            RelayError::Transfer(TransferError::InvalidTransition { from: "Burned", .. })
        ));
        assert_eq!(harness.network.rpc_calls(BASE_DOMAIN), 0);
        assert_eq!(transfer.status(), &TransferStatus::Burned);
    }

    #[tokio::test]
    async fn attest_rejects_transfer_that_is_not_burned() {
        let harness = harness().await;
        let mut transfer = Transfer::burned(ETHEREUM, BASE, Usdc(dec!(1)), RECIPIENT, TxHash::ZERO);
        transfer.mark_failed("manual").unwrap();

        let error = harness
            .relay
            .attest(&mut transfer, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RelayError::Transfer(TransferError::InvalidTransition { from: "Failed", .. })
        ));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("bridge offline")]
    struct Offline;

    /// Bridge whose every call fails.
    struct OfflineBridge;

    #[async_trait::async_trait]
    impl Bridge for OfflineBridge {
        type Error = Offline;

        fn owner(&self, _: ChainId) -> Result<Address, Offline> {
            Err(Offline)
        }

        async fn balance(&self, _: ChainId, _: Address) -> Result<U256, Offline> {
            Err(Offline)
        }

        async fn burn(
            &self,
            _: Route,
            _: U256,
            _: Address,
        ) -> Result<xusdc_bridge::BurnReceipt, Offline> {
            Err(Offline)
        }

        async fn attestation_status(
            &self,
            _: ChainId,
            _: AttestationQuery,
        ) -> Result<xusdc_bridge::PollStatus, Offline> {
            Err(Offline)
        }

        async fn poll_attestation(
            &self,
            _: ChainId,
            _: AttestationQuery,
            _: &PollPolicy,
            _: &CancellationToken,
        ) -> Result<AttestationMessage, Offline> {
            Err(Offline)
        }

        async fn mint(&self, _: ChainId, _: &AttestationMessage) -> Result<MintOutcome, Offline> {
            Err(Offline)
        }
    }

    #[tokio::test]
    async fn relay_carries_the_bridge_error_type() {
        let registry = Arc::new(
            ChainRegistry::new([
                mock_chain_config("ethereum", ETHEREUM, 0),
                mock_chain_config("base", BASE, 6),
            ])
            .unwrap(),
        );
        let relay = Relay::new(
            registry,
            Arc::new(OfflineBridge),
            TransferTracker::new(),
            PollPolicy::default(),
        );

        let error = relay
            .transfer(request(Usdc(dec!(1))), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            RelayError::Burn {
                chain_id: ETHEREUM,
                source: Offline
            }
        ));
        assert_eq!(error.to_string(), "burn on chain 1 failed: bridge offline");
        assert!(relay.tracker().list().is_empty());
    }

    #[test]
    fn mismatched_recipient_is_detected() {
        let network = MockNetwork::new();
        let ethereum = mock_chain_config("ethereum", ETHEREUM, 0);
        let base = mock_chain_config("base", BASE, 6);
        let registry = Arc::new(ChainRegistry::new([ethereum.clone(), base.clone()]).unwrap());
        let bridge = CctpBridge::try_from_ctx(CctpCtx {
            registry: Arc::clone(&registry),
            wallets: HashMap::from([(ETHEREUM, network.chain(&ethereum, OWNER))]),
            attestation: AttestationClient::new(&Url::parse("http://localhost:1").unwrap())
                .unwrap(),
            speed: TransferSpeed::Standard,
            approval_floor: DEFAULT_APPROVAL_FLOOR,
        })
        .unwrap();
        let relay = Relay::new(
            registry,
            Arc::new(bridge),
            TransferTracker::new(),
            PollPolicy::default(),
        );

        let mut message = xusdc_bridge::CctpMessage::decode(&[0u8; 376]).unwrap();
        message.source_domain = ETHEREUM_DOMAIN;
        message.destination_domain = BASE_DOMAIN;
        message.nonce = B256::with_last_byte(1);
        message.body.amount = U256::from(1_000_000);
        message.body.mint_recipient = xusdc_bridge::message::address_to_word(OWNER);
        let attestation = AttestationMessage {
            message: message.encode(),
            attestation: Bytes::from_static(&[0; 65]),
            status: xusdc_bridge::AttestationStatus::Complete,
        };
        let transfer = Transfer::burned(ETHEREUM, BASE, Usdc(dec!(1)), RECIPIENT, TxHash::ZERO);

        let reason = relay.check_attested(&transfer, &attestation).unwrap_err();

        assert!(reason.contains("mint recipient"), "{reason}");
    }
}
