//! CCTP bridge, recovery and attestation lookup commands.

use std::io::Write;

use alloy::primitives::{Address, TxHash};
use tokio_util::sync::CancellationToken;

use xusdc_bridge::{AttestationMessage, AttestationQuery, Bridge, PollStatus, Route, Usdc};

use crate::config::Ctx;
use crate::relay::{Relay, TransferRequest};
use crate::transfer::Transfer;

fn route(ctx: &Ctx, from: &str, to: &str) -> anyhow::Result<Route> {
    Ok(Route {
        source: ctx.registry.by_name(from)?.chain_id,
        destination: ctx.registry.by_name(to)?.chain_id,
    })
}

fn write_completed<Writer: Write>(stdout: &mut Writer, transfer: &Transfer) -> anyhow::Result<()> {
    writeln!(stdout, "   Transfer id: {}", transfer.id())?;
    if let Some(nonce) = transfer.nonce() {
        writeln!(stdout, "   Nonce: {nonce}")?;
    }
    match transfer.mint_tx() {
        Some(mint_tx) => writeln!(stdout, "   Mint tx: {mint_tx}")?,
        None => writeln!(stdout, "   Message was already received on the destination chain")?,
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(super) async fn bridge_command<B: Bridge, Writer: Write>(
    stdout: &mut Writer,
    ctx: &Ctx,
    relay: &Relay<B>,
    from: &str,
    to: &str,
    amount: Usdc,
    recipient: Option<Address>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let route = route(ctx, from, to)?;
    let recipient = match recipient {
        Some(recipient) => recipient,
        None => relay.bridge().owner(route.destination)?,
    };

    writeln!(
        stdout,
        "CCTP Bridge: {from} -> {to}, Amount: {amount} USDC ({:?})",
        ctx.speed
    )?;
    writeln!(stdout, "   Source wallet: {}", relay.bridge().owner(route.source)?)?;
    writeln!(stdout, "   Recipient: {recipient}")?;

    let transfer = relay
        .transfer(
            TransferRequest {
                source: route.source,
                destination: route.destination,
                amount,
                recipient,
            },
            cancel,
        )
        .await?;

    writeln!(stdout, "Bridge complete! Burn tx: {}", transfer.burn_tx())?;
    write_completed(stdout, &transfer)
}

#[allow(clippy::too_many_arguments)]
pub(super) async fn recover_command<B: Bridge, Writer: Write>(
    stdout: &mut Writer,
    ctx: &Ctx,
    relay: &Relay<B>,
    from: &str,
    to: &str,
    burn_tx: TxHash,
    amount: Usdc,
    recipient: Option<Address>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let route = route(ctx, from, to)?;
    let recipient = match recipient {
        Some(recipient) => recipient,
        None => relay.bridge().owner(route.destination)?,
    };

    writeln!(stdout, "Recovering CCTP transfer")?;
    writeln!(stdout, "   Burn tx: {burn_tx}")?;
    writeln!(stdout, "   Route: {from} -> {to}, Amount: {amount} USDC")?;

    let transfer = relay
        .recover(route, burn_tx, amount, recipient, cancel)
        .await?;

    writeln!(stdout, "CCTP transfer recovered!")?;
    write_completed(stdout, &transfer)
}

fn write_attestation<Writer: Write>(
    stdout: &mut Writer,
    attestation: &AttestationMessage,
) -> anyhow::Result<()> {
    writeln!(stdout, "   Status: {}", attestation.status)?;
    writeln!(stdout, "   Nonce: {}", attestation.nonce()?)?;
    writeln!(stdout, "   Message: {}", attestation.message)?;
    writeln!(stdout, "   Attestation: {}", attestation.attestation)?;
    Ok(())
}

pub(super) async fn attestation_command<B: Bridge, Writer: Write>(
    stdout: &mut Writer,
    ctx: &Ctx,
    bridge: &B,
    from: &str,
    burn_tx: TxHash,
    wait: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let source = ctx.registry.by_name(from)?;
    let query = AttestationQuery::TransactionHash(burn_tx);

    writeln!(
        stdout,
        "Attestation for {burn_tx} on {} (domain {})",
        source.name, source.domain
    )?;

    if wait {
        let attestation = bridge
            .poll_attestation(source.chain_id, query, &ctx.poll_policy, cancel)
            .await?;
        return write_attestation(stdout, &attestation);
    }

    match bridge.attestation_status(source.chain_id, query).await? {
        PollStatus::Ready(attestation) => write_attestation(stdout, &attestation)?,
        PollStatus::Pending { status: Some(status) } => {
            writeln!(stdout, "   Status: {status}")?;
        }
        PollStatus::Pending { status: None } => {
            writeln!(stdout, "   Status: not found yet")?;
        }
        PollStatus::Failed { reason } => anyhow::bail!("attestation lookup failed: {reason}"),
    }

    Ok(())
}
