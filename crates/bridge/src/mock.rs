//! In-memory CCTP network for tests.
//!
//! [`MockNetwork`] keeps one USDC ledger per CCTP domain. [`MockChain`]
//! implements [`Evm`] and [`Wallet`] against that ledger by decoding the
//! calldata of the few calls the bridge makes, and emits the same
//! `MessageSent` / `MintAndWithdraw` logs as the real contracts.
//! [`MockAttestationService`] serves Circle's attestation API over HTTP and
//! attests any burn the network has recorded, filling in the nonce the way
//! Circle does.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, ChainId, Log, TxHash, U256, keccak256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use alloy::transports::TransportError;
use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use url::Url;
use xusdc_evm::{Evm, EvmError, TxOptions, TxReceipt, Wallet};

use crate::bindings::{IERC20, MessageTransmitterV2, TokenMessengerV2};
use crate::cctp::attestation::{AttestationMessage, AttestationStatus};
use crate::message::{
    BURN_MESSAGE_VERSION, BurnMessage, CctpMessage, MESSAGE_VERSION, address_to_word,
    word_to_address,
};
use crate::registry::{ChainConfig, Domain, MESSAGE_TRANSMITTER_V2, TOKEN_MESSENGER_V2};

pub const MOCK_GAS_PRICE: u128 = 1_000_000_000;
pub const MOCK_GAS_ESTIMATE: u64 = 150_000;

const MOCK_RPC_URL: &str = "http://127.0.0.1:8545";

/// Chain configuration with a per-domain USDC address and the canonical
/// CCTP V2 contract addresses.
pub fn mock_chain_config(name: &str, chain_id: ChainId, domain: u32) -> ChainConfig {
    let mut usdc = [0u8; 20];
    usdc[0] = 0xc0;
    usdc[16..].copy_from_slice(&domain.to_be_bytes());

    ChainConfig {
        chain_id,
        name: name.to_string(),
        rpc_url: Url::parse(MOCK_RPC_URL).expect("static mock RPC URL"),
        usdc: Address::from(usdc),
        token_messenger: TOKEN_MESSENGER_V2,
        message_transmitter: MESSAGE_TRANSMITTER_V2,
        domain: Domain(domain),
        default_gas_limit: 300_000,
        default_gas_price: None,
        gas_price_bump_percent: 20,
        required_confirmations: 1,
        confirmation_timeout: Duration::from_secs(30),
    }
}

/// How the attestation service answers for recorded burns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationMode {
    Complete,
    Pending,
    NotFound,
    ServerError,
}

/// Failure injection for one chain.
#[derive(Debug, Clone)]
pub struct Faults {
    pub revert_approve: bool,
    pub revert_burn: bool,
    pub revert_mint: bool,
    pub burn_confirmation_timeout: bool,
    pub mint_confirmation_timeout: bool,
    /// `None` makes gas estimation fail.
    pub estimate_gas: Option<u64>,
    /// `None` makes the gas price lookup fail.
    pub gas_price: Option<u128>,
    /// Debited by every burn on top of the burned amount.
    pub burn_surcharge: U256,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            revert_approve: false,
            revert_burn: false,
            revert_mint: false,
            burn_confirmation_timeout: false,
            mint_confirmation_timeout: false,
            estimate_gas: Some(MOCK_GAS_ESTIMATE),
            gas_price: Some(MOCK_GAS_PRICE),
            burn_surcharge: U256::ZERO,
        }
    }
}

/// A transaction submitted through a [`MockChain`].
#[derive(Debug, Clone)]
pub struct SentCall {
    pub tx_hash: TxHash,
    pub contract: Address,
    pub selector: [u8; 4],
    pub options: TxOptions,
    pub note: String,
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    used_nonces: HashSet<B256>,
    sent: Vec<SentCall>,
    rpc_calls: usize,
    faults: Faults,
}

struct NetworkState {
    ledgers: HashMap<Domain, Ledger>,
    burns: HashMap<TxHash, CctpMessage>,
    nonces: HashMap<TxHash, B256>,
    attestation_mode: AttestationMode,
    next_nonce: u64,
    tx_count: u64,
}

impl NetworkState {
    fn ledger(&mut self, domain: Domain) -> &mut Ledger {
        self.ledgers.entry(domain).or_default()
    }

    fn next_tx_hash(&mut self, domain: Domain) -> TxHash {
        self.tx_count += 1;
        let mut seed = [0u8; 12];
        seed[..4].copy_from_slice(&domain.0.to_be_bytes());
        seed[4..].copy_from_slice(&self.tx_count.to_be_bytes());
        keccak256(seed)
    }

    /// Attested form of a recorded burn. The nonce is assigned on first
    /// request and stable afterwards.
    fn attest(&mut self, tx_hash: TxHash) -> Option<AttestationMessage> {
        let mut message = self.burns.get(&tx_hash)?.clone();

        let nonce = match self.nonces.get(&tx_hash) {
            Some(nonce) => *nonce,
            None => {
                self.next_nonce += 1;
                let nonce = B256::from(U256::from(self.next_nonce).to_be_bytes::<32>());
                self.nonces.insert(tx_hash, nonce);
                nonce
            }
        };

        message.nonce = nonce;
        message.finality_threshold_executed = message.min_finality_threshold;
        message.body.fee_executed = message.body.max_fee;

        let message = message.encode();
        Some(AttestationMessage {
            attestation: attestation_for(&message),
            message,
            status: AttestationStatus::Complete,
        })
    }
}

/// Deterministic 65-byte stand-in for Circle's attester signature.
pub fn attestation_for(message: &[u8]) -> Bytes {
    let digest = keccak256(message);
    let mut signature = Vec::with_capacity(65);
    signature.extend_from_slice(digest.as_slice());
    signature.extend_from_slice(keccak256(digest).as_slice());
    signature.push(0x1b);
    Bytes::from(signature)
}

/// Shared state behind every [`MockChain`] and the attestation service.
#[derive(Clone)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                ledgers: HashMap::new(),
                burns: HashMap::new(),
                nonces: HashMap::new(),
                attestation_mode: AttestationMode::Complete,
                next_nonce: 0,
                tx_count: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A wallet for `owner` on the chain described by `config`.
    pub fn chain(&self, config: &ChainConfig, owner: Address) -> MockChain {
        self.lock().ledger(config.domain);

        MockChain {
            network: self.clone(),
            config: config.clone(),
            owner,
        }
    }

    pub fn set_balance(&self, domain: Domain, owner: Address, amount: U256) {
        self.lock().ledger(domain).balances.insert(owner, amount);
    }

    pub fn balance(&self, domain: Domain, owner: Address) -> U256 {
        self.lock()
            .ledger(domain)
            .balances
            .get(&owner)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_allowance(&self, domain: Domain, owner: Address, spender: Address, amount: U256) {
        self.lock()
            .ledger(domain)
            .allowances
            .insert((owner, spender), amount);
    }

    pub fn allowance(&self, domain: Domain, owner: Address, spender: Address) -> U256 {
        self.lock()
            .ledger(domain)
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_gas_price(&self, domain: Domain, gas_price: u128) {
        self.lock().ledger(domain).faults.gas_price = Some(gas_price);
    }

    pub fn inject(&self, domain: Domain, configure: impl FnOnce(&mut Faults)) {
        configure(&mut self.lock().ledger(domain).faults);
    }

    /// Transactions submitted on `domain`, oldest first.
    pub fn sent_calls(&self, domain: Domain) -> Vec<SentCall> {
        self.lock().ledger(domain).sent.clone()
    }

    /// Reads, estimates and submissions made against `domain`.
    pub fn rpc_calls(&self, domain: Domain) -> usize {
        self.lock().ledger(domain).rpc_calls
    }

    pub fn set_attestation_mode(&self, mode: AttestationMode) {
        self.lock().attestation_mode = mode;
    }

    /// Attests a recorded burn regardless of the service mode.
    pub fn attest(&self, tx_hash: TxHash) -> Option<AttestationMessage> {
        self.lock().attest(tx_hash)
    }

    pub async fn start_attestation_service(&self) -> MockAttestationService {
        MockAttestationService::start(self.clone()).await
    }
}

/// Wallet on one mock chain.
#[derive(Clone)]
pub struct MockChain {
    network: MockNetwork,
    config: ChainConfig,
    owner: Address,
}

fn selector(calldata: &[u8]) -> Result<[u8; 4], EvmError> {
    calldata
        .get(..4)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .ok_or_else(|| EvmError::AbiDecode(alloy::sol_types::Error::custom("calldata too short")))
}

fn unknown_selector(selector: [u8; 4]) -> EvmError {
    EvmError::AbiDecode(alloy::sol_types::Error::custom(format!(
        "mock chain does not implement selector 0x{}",
        alloy::hex::encode(selector)
    )))
}

fn node_error(reason: &str) -> EvmError {
    EvmError::Transport(TransportError::local_usage_str(reason))
}

impl MockChain {
    pub const fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn domain(&self) -> Domain {
        self.config.domain
    }

    fn deposit_for_burn(
        &self,
        state: &mut NetworkState,
        tx_hash: TxHash,
        calldata: &[u8],
    ) -> Result<Vec<Log>, EvmError> {
        let call = TokenMessengerV2::depositForBurnCall::abi_decode(calldata)?;
        let ledger = state.ledger(self.domain());

        if ledger.faults.revert_burn || call.burnToken != self.config.usdc {
            return Err(EvmError::Reverted { tx_hash });
        }

        let debit = call.amount + ledger.faults.burn_surcharge;
        let balance = ledger.balances.entry(self.owner).or_default();
        let allowance = ledger
            .allowances
            .entry((self.owner, self.config.token_messenger))
            .or_default();

        if *balance < debit || *allowance < call.amount {
            return Err(EvmError::Reverted { tx_hash });
        }

        *balance -= debit;
        *allowance -= call.amount;

        let message = CctpMessage {
            version: MESSAGE_VERSION,
            source_domain: self.domain(),
            destination_domain: Domain(call.destinationDomain),
            nonce: B256::ZERO,
            sender: address_to_word(self.config.token_messenger),
            recipient: address_to_word(self.config.token_messenger),
            destination_caller: call.destinationCaller,
            min_finality_threshold: call.minFinalityThreshold,
            finality_threshold_executed: 0,
            body: BurnMessage {
                version: BURN_MESSAGE_VERSION,
                burn_token: address_to_word(call.burnToken),
                mint_recipient: call.mintRecipient,
                amount: call.amount,
                message_sender: address_to_word(self.owner),
                max_fee: call.maxFee,
                fee_executed: U256::ZERO,
                expiration_block: U256::ZERO,
                hook_data: Bytes::new(),
            },
        };

        let event = MessageTransmitterV2::MessageSent {
            message: message.encode(),
        };
        state.burns.insert(tx_hash, message);

        Ok(vec![Log {
            address: self.config.message_transmitter,
            data: event.encode_log_data(),
        }])
    }

    fn receive_message(
        &self,
        state: &mut NetworkState,
        tx_hash: TxHash,
        calldata: &[u8],
    ) -> Result<Vec<Log>, EvmError> {
        let call = MessageTransmitterV2::receiveMessageCall::abi_decode(calldata)?;
        let reverted = EvmError::Reverted { tx_hash };
        let ledger = state.ledger(self.domain());

        if ledger.faults.revert_mint || call.attestation != attestation_for(&call.message) {
            return Err(reverted);
        }

        let Ok(message) = CctpMessage::decode(&call.message) else {
            return Err(reverted);
        };
        let Some(recipient) = message.mint_recipient_address() else {
            return Err(reverted);
        };

        if message.destination_domain != self.domain()
            || !message.has_nonce()
            || !ledger.used_nonces.insert(message.nonce)
        {
            return Err(reverted);
        }

        let fee = message.body.fee_executed;
        let minted = message.body.amount.saturating_sub(fee);
        *ledger.balances.entry(recipient).or_default() += minted;

        let event = TokenMessengerV2::MintAndWithdraw {
            mintRecipient: recipient,
            amount: minted,
            mintToken: self.config.usdc,
            feeCollected: fee,
        };

        Ok(vec![Log {
            address: self.config.token_messenger,
            data: event.encode_log_data(),
        }])
    }
}

#[async_trait]
impl Evm for MockChain {
    async fn call_raw(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        let mut state = self.network.lock();
        let ledger = state.ledger(self.domain());
        ledger.rpc_calls += 1;

        let selector = selector(&calldata)?;

        let output = if selector == IERC20::balanceOfCall::SELECTOR && contract == self.config.usdc
        {
            let call = IERC20::balanceOfCall::abi_decode(&calldata)?;
            ledger
                .balances
                .get(&call.account)
                .copied()
                .unwrap_or_default()
        } else if selector == IERC20::allowanceCall::SELECTOR && contract == self.config.usdc {
            let call = IERC20::allowanceCall::abi_decode(&calldata)?;
            ledger
                .allowances
                .get(&(call.owner, call.spender))
                .copied()
                .unwrap_or_default()
        } else if selector == MessageTransmitterV2::usedNoncesCall::SELECTOR
            && contract == self.config.message_transmitter
        {
            let call = MessageTransmitterV2::usedNoncesCall::abi_decode(&calldata)?;
            U256::from(u8::from(ledger.used_nonces.contains(&call.nonce)))
        } else {
            return Err(unknown_selector(selector));
        };

        Ok(Bytes::from(output.abi_encode()))
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        _contract: Address,
        _calldata: Bytes,
    ) -> Result<u64, EvmError> {
        let mut state = self.network.lock();
        let ledger = state.ledger(self.domain());
        ledger.rpc_calls += 1;

        ledger
            .faults
            .estimate_gas
            .ok_or_else(|| node_error("execution reverted during estimation"))
    }

    async fn gas_price(&self) -> Result<u128, EvmError> {
        let mut state = self.network.lock();
        let ledger = state.ledger(self.domain());
        ledger.rpc_calls += 1;

        ledger
            .faults
            .gas_price
            .ok_or_else(|| node_error("gas price unavailable"))
    }
}

#[async_trait]
impl Wallet for MockChain {
    fn address(&self) -> Address {
        self.owner
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        options: TxOptions,
        note: &str,
    ) -> Result<TxReceipt, EvmError> {
        let mut state = self.network.lock();
        let tx_hash = state.next_tx_hash(self.domain());
        let selector = selector(&calldata)?;

        {
            let ledger = state.ledger(self.domain());
            ledger.rpc_calls += 1;
            ledger.sent.push(SentCall {
                tx_hash,
                contract,
                selector,
                options,
                note: note.to_string(),
            });
        }

        let faults = state.ledger(self.domain()).faults.clone();
        let timeout = options.confirmation_timeout.unwrap_or_default();

        let (logs, unconfirmed) = if selector == IERC20::approveCall::SELECTOR
            && contract == self.config.usdc
        {
            let call = IERC20::approveCall::abi_decode(&calldata)?;
            if faults.revert_approve {
                return Err(EvmError::Reverted { tx_hash });
            }
            state
                .ledger(self.domain())
                .allowances
                .insert((self.owner, call.spender), call.amount);
            (Vec::new(), false)
        } else if selector == TokenMessengerV2::depositForBurnCall::SELECTOR
            && contract == self.config.token_messenger
        {
            let logs = self.deposit_for_burn(&mut state, tx_hash, &calldata)?;
            (logs, faults.burn_confirmation_timeout)
        } else if selector == MessageTransmitterV2::receiveMessageCall::SELECTOR
            && contract == self.config.message_transmitter
        {
            let logs = self.receive_message(&mut state, tx_hash, &calldata)?;
            (logs, faults.mint_confirmation_timeout)
        } else {
            return Err(unknown_selector(selector));
        };

        if unconfirmed {
            return Err(EvmError::ConfirmationTimeout { tx_hash, timeout });
        }

        Ok(TxReceipt {
            tx_hash,
            block_number: Some(state.tx_count),
            gas_used: options.gas_limit.unwrap_or(MOCK_GAS_ESTIMATE),
            logs,
        })
    }
}

/// Circle attestation API backed by a [`MockNetwork`].
///
/// The fee schedule matches production: 1 bps for fast transfers, free for
/// standard.
pub struct MockAttestationService {
    server: MockServer,
}

impl MockAttestationService {
    async fn start(network: MockNetwork) -> Self {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path_includes("/v2/burn/USDC/fees/");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!([
                        {"finalityThreshold": 1000, "minimumFee": 1},
                        {"finalityThreshold": 2000, "minimumFee": 0}
                    ]));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(GET).path_includes("/v2/messages/");
                then.respond_with(move |request: &HttpMockRequest| {
                    let uri = request.uri();
                    let domain = uri
                        .path()
                        .rsplit('/')
                        .next()
                        .and_then(|segment| segment.parse::<u32>().ok())
                        .map(Domain);
                    let tx_hash = uri
                        .query()
                        .unwrap_or("")
                        .split('&')
                        .find_map(|param| param.strip_prefix("transactionHash="))
                        .and_then(|value| value.parse::<TxHash>().ok());

                    let (status, body) = match (domain, tx_hash) {
                        (Some(domain), Some(tx_hash)) => network.respond(domain, tx_hash),
                        _ => (400, None),
                    };

                    HttpMockResponse {
                        status: Some(status),
                        headers: Some(vec![(
                            "content-type".to_string(),
                            "application/json".to_string(),
                        )]),
                        body: body
                            .map(|body| serde_json::to_vec(&body).unwrap_or_default().into()),
                    }
                });
            })
            .await;

        Self { server }
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }
}

impl MockNetwork {
    fn respond(&self, domain: Domain, tx_hash: TxHash) -> (u16, Option<serde_json::Value>) {
        let mut state = self.lock();

        let recorded = state
            .burns
            .get(&tx_hash)
            .is_some_and(|message| message.source_domain == domain);
        if !recorded {
            return (404, None);
        }

        match state.attestation_mode {
            AttestationMode::NotFound => (404, None),
            AttestationMode::ServerError => (500, None),
            AttestationMode::Pending => (
                200,
                Some(json!({
                    "messages": [{
                        "status": "pending_confirmations",
                        "message": "0x",
                        "attestation": "PENDING"
                    }]
                })),
            ),
            AttestationMode::Complete => match state.attest(tx_hash) {
                Some(attested) => (
                    200,
                    Some(json!({
                        "messages": [{
                            "status": "complete",
                            "message": attested.message.to_string(),
                            "attestation": attested.attestation.to_string()
                        }]
                    })),
                ),
                None => (404, None),
            },
        }
    }
}
