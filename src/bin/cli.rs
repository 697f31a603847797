//! Command-line interface for cross-chain USDC transfers.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use xusdc::cli::{self, Cli};
use xusdc::{Ctx, setup_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli {
        config,
        private_key,
        log_level,
        command,
    } = Cli::parse();

    let ctx = Ctx::load_file(&config)?;
    setup_tracing(&log_level.unwrap_or(ctx.log_level));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    cli::run_command(
        &ctx,
        command,
        private_key.as_deref(),
        &cancel,
        &mut std::io::stdout(),
    )
    .await
}
