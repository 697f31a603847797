//! Per-chain CCTP configuration.
//!
//! Contract addresses come from a single verified table of mainnet
//! deployments ([`KnownChain`]); operators supply RPC endpoints and may
//! override gas settings or, for local networks, addresses. The resulting
//! [`ChainRegistry`] is built once at startup and never mutated.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, ChainId, address};
use serde::{Deserialize, Serialize};
use url::Url;

/// CCTP V2 `TokenMessengerV2`, deployed at the same address on every
/// supported EVM chain.
pub const TOKEN_MESSENGER_V2: Address = address!("0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d");

/// CCTP V2 `MessageTransmitterV2`, deployed at the same address on every
/// supported EVM chain.
pub const MESSAGE_TRANSMITTER_V2: Address =
    address!("0x81D40F21F12A8F0E3252Bccb954D722d4c464B64");

const DEFAULT_GAS_LIMIT: u64 = 300_000;
// Arbitrum gas units include the L1 calldata component.
const ARBITRUM_GAS_LIMIT: u64 = 1_500_000;
const DEFAULT_GAS_PRICE_BUMP_PERCENT: u64 = 20;
const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 1;
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Circle-assigned CCTP domain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(pub u32);

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mainnet chains with a verified CCTP V2 deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnownChain {
    Ethereum,
    Avalanche,
    Optimism,
    Arbitrum,
    Base,
    Polygon,
}

impl KnownChain {
    pub const ALL: [Self; 6] = [
        Self::Ethereum,
        Self::Avalanche,
        Self::Optimism,
        Self::Arbitrum,
        Self::Base,
        Self::Polygon,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Avalanche => "avalanche",
            Self::Optimism => "optimism",
            Self::Arbitrum => "arbitrum",
            Self::Base => "base",
            Self::Polygon => "polygon",
        }
    }

    pub const fn chain_id(self) -> ChainId {
        match self {
            Self::Ethereum => 1,
            Self::Avalanche => 43_114,
            Self::Optimism => 10,
            Self::Arbitrum => 42_161,
            Self::Base => 8_453,
            Self::Polygon => 137,
        }
    }

    pub const fn domain(self) -> Domain {
        match self {
            Self::Ethereum => Domain(0),
            Self::Avalanche => Domain(1),
            Self::Optimism => Domain(2),
            Self::Arbitrum => Domain(3),
            Self::Base => Domain(6),
            Self::Polygon => Domain(7),
        }
    }

    /// Native (Circle-issued) USDC, the CCTP burn token.
    pub const fn usdc(self) -> Address {
        match self {
            Self::Ethereum => address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            Self::Avalanche => address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
            Self::Optimism => address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
            Self::Arbitrum => address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
            Self::Base => address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            Self::Polygon => address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        }
    }

    pub const fn default_gas_limit(self) -> u64 {
        match self {
            Self::Arbitrum => ARBITRUM_GAS_LIMIT,
            _ => DEFAULT_GAS_LIMIT,
        }
    }

    pub fn from_chain_id(chain_id: ChainId) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|chain| chain.chain_id() == chain_id)
    }
}

impl fmt::Display for KnownChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KnownChain {
    type Err = RegistryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" | "eth" => Ok(Self::Ethereum),
            "avalanche" | "avax" => Ok(Self::Avalanche),
            "optimism" | "op" => Ok(Self::Optimism),
            "arbitrum" | "arbitrum-one" | "arb" => Ok(Self::Arbitrum),
            "base" => Ok(Self::Base),
            "polygon" | "polygon-pos" | "matic" => Ok(Self::Polygon),
            _ => Err(RegistryError::UnknownChainName {
                name: name.to_string(),
            }),
        }
    }
}

/// Static configuration for one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub rpc_url: Url,
    /// Burn token (USDC) contract.
    pub usdc: Address,
    pub token_messenger: Address,
    pub message_transmitter: Address,
    pub domain: Domain,
    pub default_gas_limit: u64,
    /// Fallback gas price in wei when the node cannot report one.
    pub default_gas_price: Option<u128>,
    /// Percentage added on top of the live gas price for burns.
    pub gas_price_bump_percent: u64,
    pub required_confirmations: u64,
    pub confirmation_timeout: Duration,
}

impl ChainConfig {
    /// Configuration for a verified mainnet deployment.
    pub fn known(chain: KnownChain, rpc_url: Url) -> Self {
        Self {
            chain_id: chain.chain_id(),
            name: chain.name().to_string(),
            rpc_url,
            usdc: chain.usdc(),
            token_messenger: TOKEN_MESSENGER_V2,
            message_transmitter: MESSAGE_TRANSMITTER_V2,
            domain: chain.domain(),
            default_gas_limit: chain.default_gas_limit(),
            default_gas_price: None,
            gas_price_bump_percent: DEFAULT_GAS_PRICE_BUMP_PERCENT,
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    /// Applies the configured overpay factor to a live gas price.
    pub fn bumped_gas_price(&self, live: u128) -> u128 {
        let factor = 100 + u128::from(self.gas_price_bump_percent);
        live.saturating_mul(factor) / 100
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unsupported chain: {chain_id}")]
    UnsupportedChain { chain_id: ChainId },
    #[error("unknown chain name: {name}")]
    UnknownChainName { name: String },
    #[error("chain {chain_id} configured more than once")]
    DuplicateChain { chain_id: ChainId },
    #[error("CCTP domain {domain} assigned to both chain {first} and chain {second}")]
    DuplicateDomain {
        domain: Domain,
        first: ChainId,
        second: ChainId,
    },
}

/// Immutable lookup table of configured chains.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainConfig>,
    by_id: HashMap<ChainId, usize>,
    by_domain: HashMap<Domain, usize>,
}

impl ChainRegistry {
    pub fn new(chains: impl IntoIterator<Item = ChainConfig>) -> Result<Self, RegistryError> {
        let chains: Vec<ChainConfig> = chains.into_iter().collect();
        let mut by_id = HashMap::with_capacity(chains.len());
        let mut by_domain = HashMap::with_capacity(chains.len());

        for (index, chain) in chains.iter().enumerate() {
            if by_id.insert(chain.chain_id, index).is_some() {
                return Err(RegistryError::DuplicateChain {
                    chain_id: chain.chain_id,
                });
            }

            if let Some(previous) = by_domain.insert(chain.domain, index) {
                return Err(RegistryError::DuplicateDomain {
                    domain: chain.domain,
                    first: chains[previous].chain_id,
                    second: chain.chain_id,
                });
            }
        }

        Ok(Self {
            chains,
            by_id,
            by_domain,
        })
    }

    pub fn get(&self, chain_id: ChainId) -> Result<&ChainConfig, RegistryError> {
        self.by_id
            .get(&chain_id)
            .map(|&index| &self.chains[index])
            .ok_or(RegistryError::UnsupportedChain { chain_id })
    }

    pub fn domain_of(&self, chain_id: ChainId) -> Result<Domain, RegistryError> {
        self.get(chain_id).map(|chain| chain.domain)
    }

    pub fn by_domain(&self, domain: Domain) -> Option<&ChainConfig> {
        self.by_domain.get(&domain).map(|&index| &self.chains[index])
    }

    /// Resolves a configured chain by name, known alias, or decimal chain id.
    pub fn by_name(&self, name: &str) -> Result<&ChainConfig, RegistryError> {
        let trimmed = name.trim();

        if let Some(chain) = self
            .chains
            .iter()
            .find(|chain| chain.name.eq_ignore_ascii_case(trimmed))
        {
            return Ok(chain);
        }

        if let Ok(known) = trimmed.parse::<KnownChain>() {
            return self.get(known.chain_id());
        }

        match trimmed.parse::<ChainId>() {
            Ok(chain_id) => self.get(chain_id),
            Err(_) => Err(RegistryError::UnknownChainName {
                name: name.to_string(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn rpc() -> Url {
        Url::parse("http://localhost:8545").unwrap()
    }

    fn mainnet() -> ChainRegistry {
        ChainRegistry::new(
            KnownChain::ALL
                .into_iter()
                .map(|chain| ChainConfig::known(chain, rpc())),
        )
        .unwrap()
    }

    #[test]
    fn known_chains_have_unique_ids_and_domains() {
        let ids: HashSet<_> = KnownChain::ALL.iter().map(|c| c.chain_id()).collect();
        let domains: HashSet<_> = KnownChain::ALL.iter().map(|c| c.domain()).collect();

        assert_eq!(ids.len(), KnownChain::ALL.len());
        assert_eq!(domains.len(), KnownChain::ALL.len());
    }

    #[test]
    fn domain_lookup_matches_circle_assignments() {
        let registry = mainnet();

        assert_eq!(registry.domain_of(1).unwrap(), Domain(0));
        assert_eq!(registry.domain_of(43_114).unwrap(), Domain(1));
        assert_eq!(registry.domain_of(10).unwrap(), Domain(2));
        assert_eq!(registry.domain_of(42_161).unwrap(), Domain(3));
        assert_eq!(registry.domain_of(8_453).unwrap(), Domain(6));
        assert_eq!(registry.domain_of(137).unwrap(), Domain(7));
    }

    #[test]
    fn unknown_chain_id_is_unsupported() {
        let registry = mainnet();

        assert_eq!(
            registry.get(56).unwrap_err(),
            RegistryError::UnsupportedChain { chain_id: 56 }
        );
        assert!(registry.by_domain(Domain(5)).is_none());
    }

    #[test]
    fn by_domain_returns_matching_chain() {
        let registry = mainnet();

        let base = registry.by_domain(Domain(6)).unwrap();

        assert_eq!(base.chain_id, 8_453);
        assert_eq!(base.usdc, KnownChain::Base.usdc());
        assert_eq!(base.token_messenger, TOKEN_MESSENGER_V2);
        assert_eq!(base.message_transmitter, MESSAGE_TRANSMITTER_V2);
    }

    #[test]
    fn rejects_duplicate_chain_id() {
        let error = ChainRegistry::new([
            ChainConfig::known(KnownChain::Base, rpc()),
            ChainConfig::known(KnownChain::Base, rpc()),
        ])
        .unwrap_err();

        assert_eq!(error, RegistryError::DuplicateChain { chain_id: 8_453 });
    }

    #[test]
    fn rejects_duplicate_domain() {
        let mut fork = ChainConfig::known(KnownChain::Ethereum, rpc());
        fork.chain_id = 31_337;
        fork.name = "local".to_string();

        let error =
            ChainRegistry::new([ChainConfig::known(KnownChain::Ethereum, rpc()), fork])
                .unwrap_err();

        assert_eq!(
            error,
            RegistryError::DuplicateDomain {
                domain: Domain(0),
                first: 1,
                second: 31_337,
            }
        );
    }

    #[test]
    fn by_name_accepts_names_aliases_and_ids() {
        let registry = mainnet();

        assert_eq!(registry.by_name("Base").unwrap().chain_id, 8_453);
        assert_eq!(registry.by_name("arbitrum-one").unwrap().chain_id, 42_161);
        assert_eq!(registry.by_name("137").unwrap().chain_id, 137);
        assert_eq!(
            registry.by_name("solana").unwrap_err(),
            RegistryError::UnknownChainName {
                name: "solana".to_string()
            }
        );
    }

    #[test]
    fn gas_price_bump_is_a_percentage_of_live_price() {
        let mut config = ChainConfig::known(KnownChain::Ethereum, rpc());

        assert_eq!(config.bumped_gas_price(10_000_000_000), 12_000_000_000);

        config.gas_price_bump_percent = 0;
        assert_eq!(config.bumped_gas_price(10_000_000_000), 10_000_000_000);
    }

    #[test]
    fn arbitrum_gets_a_larger_default_gas_limit() {
        assert!(
            KnownChain::Arbitrum.default_gas_limit() > KnownChain::Ethereum.default_gas_limit()
        );
    }
}
