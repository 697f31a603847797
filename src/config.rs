use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, ChainId, U256};
use serde::Deserialize;
use tracing::Level;
use url::Url;

use xusdc_bridge::cctp::DEFAULT_APPROVAL_FLOOR;
use xusdc_bridge::cctp::attestation::DEFAULT_ATTESTATION_API;
use xusdc_bridge::registry::RegistryError;
use xusdc_bridge::usdc::UsdcConversionError;
use xusdc_bridge::{
    AttestationClient, AttestationError, Backoff, CctpBridge, CctpCtx, CctpError, ChainConfig,
    ChainRegistry, Domain, KnownChain, PollPolicy, TransferSpeed, Usdc,
};
use xusdc_evm::{EvmError, LocalWallet, Wallet};

use crate::relay::Relay;
use crate::tracker::TransferTracker;

const DEFAULT_ATTESTATION_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings deserialized from the TOML config file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    log_level: Option<LogLevel>,
    #[serde(default)]
    attestation: AttestationConfig,
    #[serde(default)]
    transfer: TransferConfig,
    #[serde(default)]
    chains: BTreeMap<String, ChainSection>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AttestationConfig {
    base_url: Option<Url>,
    poll_interval_secs: Option<u64>,
    /// Switches to exponential backoff from `poll_interval_secs` up to this.
    max_delay_secs: Option<u64>,
    max_attempts: Option<usize>,
    jitter: Option<bool>,
    max_wait_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TransferConfig {
    speed: Option<TransferSpeed>,
    approval_floor: Option<Usdc>,
}

/// `[chains.<name>]`. Known chains only need `rpc_url`; anything else
/// needs `chain_id`, `domain` and `usdc`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ChainSection {
    rpc_url: Url,
    chain_id: Option<ChainId>,
    domain: Option<u32>,
    usdc: Option<Address>,
    token_messenger: Option<Address>,
    message_transmitter: Option<Address>,
    default_gas_limit: Option<u64>,
    default_gas_price: Option<u128>,
    gas_price_bump_percent: Option<u64>,
    required_confirmations: Option<u64>,
    confirmation_timeout_secs: Option<u64>,
}

#[derive(clap::ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        (*log_level).into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid URL")]
    InvalidUrl(#[from] url::ParseError),
    #[error("no chains configured")]
    NoChains,
    #[error("chain `{name}` is not a known CCTP chain; set chain_id, domain and usdc")]
    UnknownChain { name: String },
    #[error("chain `{name}` is missing `{field}`")]
    MissingChainField { name: String, field: &'static str },
    #[error("attestation max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("invalid approval floor")]
    ApprovalFloor(#[source] UsdcConversionError),
    #[error("PRIVATE_KEY is required for this command")]
    MissingPrivateKey,
    #[error("failed to set up wallet for chain {chain_id}")]
    Wallet {
        chain_id: ChainId,
        #[source]
        source: EvmError,
    },
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    #[error(transparent)]
    Bridge(#[from] CctpError),
}

/// Immutable runtime context assembled from the config file.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub log_level: LogLevel,
    pub registry: Arc<ChainRegistry>,
    pub attestation_url: Url,
    pub attestation_timeout: Duration,
    pub poll_policy: PollPolicy,
    pub speed: TransferSpeed,
    /// Minimum approval amount in micro-USDC.
    pub approval_floor: U256,
}

impl Ctx {
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let config = std::fs::read_to_string(path)?;
        Self::from_toml(&config)
    }

    pub fn from_toml(config_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;

        if config.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }

        let chains = config
            .chains
            .into_iter()
            .map(|(name, section)| resolve_chain(name, section))
            .collect::<Result<Vec<_>, _>>()?;
        let registry = Arc::new(ChainRegistry::new(chains)?);

        let attestation_url = match config.attestation.base_url.clone() {
            Some(url) => url,
            None => Url::parse(DEFAULT_ATTESTATION_API)?,
        };

        let attestation_timeout = config
            .attestation
            .request_timeout_secs
            .map_or(DEFAULT_ATTESTATION_REQUEST_TIMEOUT, Duration::from_secs);

        let approval_floor = config
            .transfer
            .approval_floor
            .map(Usdc::to_micro)
            .transpose()
            .map_err(ConfigError::ApprovalFloor)?
            .unwrap_or(DEFAULT_APPROVAL_FLOOR);

        Ok(Self {
            log_level: config.log_level.unwrap_or(LogLevel::Info),
            registry,
            attestation_url,
            attestation_timeout,
            poll_policy: poll_policy(&config.attestation)?,
            speed: config.transfer.speed.unwrap_or_default(),
            approval_floor,
        })
    }

    pub fn attestation_client(&self) -> Result<AttestationClient, ConfigError> {
        Ok(AttestationClient::with_timeout(
            &self.attestation_url,
            self.attestation_timeout,
        )?)
    }

    /// One signer per configured chain, all derived from `private_key`.
    pub fn connect_wallets(
        &self,
        private_key: &str,
    ) -> Result<HashMap<ChainId, LocalWallet>, ConfigError> {
        self.registry
            .iter()
            .map(|chain| {
                LocalWallet::connect(&chain.rpc_url, private_key, chain.required_confirmations)
                    .map(|wallet| (chain.chain_id, wallet))
                    .map_err(|source| ConfigError::Wallet {
                        chain_id: chain.chain_id,
                        source,
                    })
            })
            .collect()
    }

    pub fn bridge<W: Wallet>(
        &self,
        wallets: HashMap<ChainId, W>,
    ) -> Result<CctpBridge<W>, ConfigError> {
        Ok(CctpBridge::try_from_ctx(CctpCtx {
            registry: Arc::clone(&self.registry),
            wallets,
            attestation: self.attestation_client()?,
            speed: self.speed,
            approval_floor: self.approval_floor,
        })?)
    }

    pub fn relay<W: Wallet>(
        &self,
        wallets: HashMap<ChainId, W>,
    ) -> Result<Relay<CctpBridge<W>>, ConfigError> {
        Ok(Relay::new(
            Arc::clone(&self.registry),
            Arc::new(self.bridge(wallets)?),
            TransferTracker::new(),
            self.poll_policy,
        ))
    }
}

fn resolve_chain(name: String, section: ChainSection) -> Result<ChainConfig, ConfigError> {
    let known = match section.chain_id {
        Some(chain_id) => KnownChain::from_chain_id(chain_id),
        None => Some(
            name.parse::<KnownChain>()
                .map_err(|_| ConfigError::UnknownChain { name: name.clone() })?,
        ),
    };

    let mut chain = match known {
        Some(known) => ChainConfig::known(known, section.rpc_url),
        None => custom_chain(&name, &section)?,
    };

    if let Some(usdc) = section.usdc {
        chain.usdc = usdc;
    }
    if let Some(domain) = section.domain {
        chain.domain = Domain(domain);
    }
    if let Some(token_messenger) = section.token_messenger {
        chain.token_messenger = token_messenger;
    }
    if let Some(message_transmitter) = section.message_transmitter {
        chain.message_transmitter = message_transmitter;
    }
    if let Some(gas_limit) = section.default_gas_limit {
        chain.default_gas_limit = gas_limit;
    }
    if section.default_gas_price.is_some() {
        chain.default_gas_price = section.default_gas_price;
    }
    if let Some(bump) = section.gas_price_bump_percent {
        chain.gas_price_bump_percent = bump;
    }
    if let Some(confirmations) = section.required_confirmations {
        chain.required_confirmations = confirmations;
    }
    if let Some(timeout) = section.confirmation_timeout_secs {
        chain.confirmation_timeout = Duration::from_secs(timeout);
    }

    Ok(chain)
}

fn custom_chain(name: &str, section: &ChainSection) -> Result<ChainConfig, ConfigError> {
    let missing = |field| ConfigError::MissingChainField {
        name: name.to_string(),
        field,
    };

    let chain_id = section.chain_id.ok_or_else(|| missing("chain_id"))?;
    let domain = section.domain.ok_or_else(|| missing("domain"))?;
    let usdc = section.usdc.ok_or_else(|| missing("usdc"))?;

    // Ethereum's defaults stand in for everything the section can override.
    let mut chain = ChainConfig::known(KnownChain::Ethereum, section.rpc_url.clone());
    chain.chain_id = chain_id;
    chain.name = name.to_string();
    chain.domain = Domain(domain);
    chain.usdc = usdc;

    Ok(chain)
}

fn poll_policy(config: &AttestationConfig) -> Result<PollPolicy, ConfigError> {
    let defaults = PollPolicy::default();

    let max_attempts = config.max_attempts.unwrap_or(defaults.max_attempts);
    if max_attempts == 0 {
        return Err(ConfigError::ZeroAttempts);
    }

    let default_interval = match defaults.backoff {
        Backoff::Constant { interval, .. } => interval,
        Backoff::Exponential { min_delay, .. } => min_delay,
    };
    let interval = config
        .poll_interval_secs
        .map_or(default_interval, Duration::from_secs);
    let jitter = config.jitter.unwrap_or(false);

    let backoff = match config.max_delay_secs {
        Some(max_delay) => Backoff::Exponential {
            min_delay: interval,
            max_delay: Duration::from_secs(max_delay).max(interval),
            jitter,
        },
        None => Backoff::Constant { interval, jitter },
    };

    Ok(PollPolicy {
        backoff,
        max_attempts,
        max_wait: config.max_wait_secs.map(Duration::from_secs),
    })
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("xusdc={level},xusdc_bridge={level},xusdc_evm={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
