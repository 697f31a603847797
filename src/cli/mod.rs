//! CLI commands for inspecting chains and moving USDC between them.

mod cctp;
mod chains;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use alloy::primitives::{Address, ChainId, TxHash};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use xusdc_bridge::{Bridge, Usdc};
use xusdc_evm::LocalWallet;

use crate::config::{ConfigError, Ctx, LogLevel};
use crate::relay::Relay;

#[derive(Debug, Parser)]
#[command(name = "xusdc")]
#[command(about = "Move native USDC between chains with Circle CCTP V2")]
#[command(version)]
pub struct Cli {
    /// Path to TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
    /// Hex-encoded private key, used to sign on every configured chain
    #[clap(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,
    /// Overrides `log_level` from the configuration file
    #[clap(long)]
    pub log_level: Option<LogLevel>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List configured chains and their CCTP domains
    Chains,
    /// Show the USDC balance of an address
    Balance {
        /// Chain name, alias or chain id
        #[arg(long)]
        chain: String,
        /// Address to query (defaults to the signer)
        #[arg(long)]
        owner: Option<Address>,
    },
    /// Burn USDC on one chain and mint it on another
    Bridge {
        /// Source chain
        #[arg(long)]
        from: String,
        /// Destination chain
        #[arg(long)]
        to: String,
        /// Amount of USDC (e.g. 12.5)
        #[arg(long)]
        amount: Usdc,
        /// Destination address (defaults to the signer)
        #[arg(long)]
        recipient: Option<Address>,
    },
    /// Finish a transfer whose burn already confirmed
    Recover {
        /// Chain the burn happened on
        #[arg(long)]
        from: String,
        /// Destination chain
        #[arg(long)]
        to: String,
        /// Burn transaction hash
        #[arg(long = "burn-tx")]
        burn_tx: TxHash,
        /// Amount of USDC that was burned
        #[arg(long)]
        amount: Usdc,
        /// Destination address used in the burn (defaults to the signer)
        #[arg(long)]
        recipient: Option<Address>,
    },
    /// Look up the attestation for a burn
    Attestation {
        /// Chain the burn happened on
        #[arg(long)]
        from: String,
        /// Burn transaction hash
        #[arg(long = "burn-tx")]
        burn_tx: TxHash,
        /// Keep polling until the attestation is ready
        #[arg(long)]
        wait: bool,
    },
}

impl Commands {
    const fn needs_signer(&self) -> bool {
        matches!(
            self,
            Self::Balance { .. } | Self::Bridge { .. } | Self::Recover { .. }
        )
    }
}

/// Connects wallets if the command signs or reads as the signer, then runs
/// it against the real chains.
pub async fn run_command<Writer: Write>(
    ctx: &Ctx,
    command: Commands,
    private_key: Option<&str>,
    cancel: &CancellationToken,
    stdout: &mut Writer,
) -> anyhow::Result<()> {
    let wallets = if command.needs_signer() {
        let private_key = private_key.ok_or(ConfigError::MissingPrivateKey)?;
        ctx.connect_wallets(private_key)?
    } else {
        HashMap::<ChainId, LocalWallet>::new()
    };

    let relay = ctx.relay(wallets)?;
    run_command_with_relay(ctx, &relay, command, cancel, stdout).await
}

async fn run_command_with_relay<B: Bridge, Writer: Write>(
    ctx: &Ctx,
    relay: &Relay<B>,
    command: Commands,
    cancel: &CancellationToken,
    stdout: &mut Writer,
) -> anyhow::Result<()> {
    match command {
        Commands::Chains => chains::chains_command(stdout, ctx)?,
        Commands::Balance { chain, owner } => {
            chains::balance_command(stdout, ctx, relay.bridge(), &chain, owner).await?;
        }
        Commands::Bridge {
            from,
            to,
            amount,
            recipient,
        } => {
            cctp::bridge_command(stdout, ctx, relay, &from, &to, amount, recipient, cancel).await?;
        }
        Commands::Recover {
            from,
            to,
            burn_tx,
            amount,
            recipient,
        } => {
            cctp::recover_command(
                stdout, ctx, relay, &from, &to, burn_tx, amount, recipient, cancel,
            )
            .await?;
        }
        Commands::Attestation {
            from,
            burn_tx,
            wait,
        } => {
            cctp::attestation_command(stdout, ctx, relay.bridge(), &from, burn_tx, wait, cancel)
                .await?;
        }
    }

    info!("CLI operation completed successfully");
    Ok(())
}
