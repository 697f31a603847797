//! Read-only chain commands.

use std::io::Write;

use alloy::primitives::Address;

use xusdc_bridge::{Bridge, Usdc};

use crate::config::Ctx;

pub(super) fn chains_command<Writer: Write>(stdout: &mut Writer, ctx: &Ctx) -> anyhow::Result<()> {
    writeln!(stdout, "Configured chains:")?;

    for chain in ctx.registry.iter() {
        writeln!(
            stdout,
            "   {} (chain {}, domain {})",
            chain.name, chain.chain_id, chain.domain
        )?;
        writeln!(stdout, "      USDC: {}", chain.usdc)?;
        writeln!(stdout, "      RPC: {}", chain.rpc_url)?;
    }

    Ok(())
}

pub(super) async fn balance_command<B: Bridge, Writer: Write>(
    stdout: &mut Writer,
    ctx: &Ctx,
    bridge: &B,
    chain: &str,
    owner: Option<Address>,
) -> anyhow::Result<()> {
    let chain = ctx.registry.by_name(chain)?;
    let owner = match owner {
        Some(owner) => owner,
        None => bridge.owner(chain.chain_id)?,
    };

    let balance = Usdc::from_micro(bridge.balance(chain.chain_id, owner).await?)?;

    writeln!(stdout, "{} balance of {owner}: {balance} USDC", chain.name)?;
    Ok(())
}
