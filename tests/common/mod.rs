//! Shared setup for relay scenarios against the in-memory CCTP network.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, ChainId, U256, address};

use xusdc::{Ctx, Relay};
use xusdc_bridge::mock::{MockAttestationService, MockChain, MockNetwork};
use xusdc_bridge::registry::Domain;
use xusdc_bridge::{Bridge, CctpBridge, TransferSpeed, Usdc};

pub const SIGNER: Address = address!("0x000000000000000000000000000000000000a11c");
pub const ETHEREUM: ChainId = 1;
pub const BASE: ChainId = 8_453;
pub const ARBITRUM: ChainId = 42_161;

pub struct Network {
    pub ctx: Ctx,
    pub chains: MockNetwork,
    pub relay: Arc<Relay<CctpBridge<MockChain>>>,
    _attestation: MockAttestationService,
}

impl Network {
    pub async fn start(speed: TransferSpeed) -> anyhow::Result<Self> {
        let chains = MockNetwork::new();
        let attestation = chains.start_attestation_service().await;

        let speed = match speed {
            TransferSpeed::Standard => "standard",
            TransferSpeed::Fast => "fast",
        };
        let ctx = Ctx::from_toml(&format!(
            r#"
            log_level = "debug"

            [attestation]
            base_url = "{}"
            poll_interval_secs = 1
            max_attempts = 3

            [transfer]
            speed = "{speed}"

            [chains.ethereum]
            rpc_url = "http://127.0.0.1:8545"

            [chains.base]
            rpc_url = "http://127.0.0.1:8546"

            [chains.arbitrum]
            rpc_url = "http://127.0.0.1:8547"
            "#,
            attestation.base_url()
        ))?;

        let wallets = ctx
            .registry
            .iter()
            .map(|chain| (chain.chain_id, chains.chain(chain, SIGNER)))
            .collect::<HashMap<_, _>>();
        let relay = Arc::new(ctx.relay(wallets)?);

        Ok(Self {
            ctx,
            chains,
            relay,
            _attestation: attestation,
        })
    }

    pub fn domain(&self, chain_id: ChainId) -> anyhow::Result<Domain> {
        Ok(self.ctx.registry.domain_of(chain_id)?)
    }

    pub fn fund(&self, chain_id: ChainId, amount: Usdc) -> anyhow::Result<()> {
        self.chains
            .set_balance(self.domain(chain_id)?, SIGNER, amount.to_micro()?);
        Ok(())
    }

    pub async fn balance(&self, chain_id: ChainId, owner: Address) -> anyhow::Result<Usdc> {
        let micro: U256 = self.relay.bridge().balance(chain_id, owner).await?;
        Ok(Usdc::from_micro(micro)?)
    }
}
