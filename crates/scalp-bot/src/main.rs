//! scalp-bot: Polymarket 15-minute up/down scalping engine.
//!
//! Usage:
//!   scalp-bot [OPTIONS]
//!
//! All configuration comes from the environment (see `config.rs`); the
//! process starts with no required flags. The few CLI options are
//! conveniences that override their environment counterparts.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use scalp_bot::config::BotConfig;
use scalp_bot::engine::Engine;
use scalp_bot::executor::live::{EnvCredentialProvider, LiveExecutor, LiveExecutorConfig};
use scalp_bot::executor::paper::{PaperExecutor, PaperExecutorConfig};
use scalp_bot::spot::{SpotFeed, SpotFeedConfig};
use scalp_market::{ClobBookClient, DiscoveryConfig, MarketDiscovery, StrikeConfig, StrikeOracle};

/// CLI arguments. Everything is optional; the environment is authoritative.
#[derive(Parser, Debug)]
#[command(name = "scalp-bot")]
#[command(about = "Polymarket 15-minute up/down scalping engine")]
#[command(version)]
struct Args {
    /// Force paper mode regardless of PAPER_TRADE.
    #[arg(long)]
    paper: bool,

    /// Force live mode regardless of PAPER_TRADE.
    #[arg(long, conflicts_with = "paper")]
    live: bool,

    /// Log level override (trace|debug|info|warn|error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load .env if present; absence is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = BotConfig::from_env().context("configuration invalid")?;
    if args.paper {
        config.paper_trade = true;
    }
    if args.live {
        config.paper_trade = false;
        config.validate().context("configuration invalid")?;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("starting scalp-bot");
    config.summary();

    // Market-data clients.
    let discovery = MarketDiscovery::new(DiscoveryConfig {
        asset: config.asset,
        ..Default::default()
    });
    let strike = StrikeOracle::new(StrikeConfig {
        asset: config.asset,
        override_price: config.strike_price_override,
        ..Default::default()
    });
    let books = ClobBookClient::new(Duration::from_millis(500));
    let spot = SpotFeed::start(SpotFeedConfig {
        asset: config.asset,
        ..Default::default()
    });

    // Gateway selection is process-wide at startup.
    if config.paper_trade {
        let gateway = PaperExecutor::new(PaperExecutorConfig {
            initial_cash: config.bankroll,
            min_order_size: config.strategy.min_order_size,
        });
        let engine = Engine::new(config, discovery, strike, books, spot, gateway);
        run_engine(engine).await
    } else {
        let provider = Arc::new(EnvCredentialProvider::new(config.funder_address.clone()));
        let gateway = LiveExecutor::new(
            LiveExecutorConfig {
                trading_balance: config.bankroll,
                ..Default::default()
            },
            provider,
        );
        let engine = Engine::new(config, discovery, strike, books, spot, gateway);
        run_engine(engine).await
    }
}

async fn run_engine<E: scalp_bot::executor::Executor + 'static>(
    mut engine: Engine<E>,
) -> Result<()> {
    let shutdown = engine.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            error!("shutdown signal handler error: {}", e);
        }
        info!("requesting shutdown");
        let _ = shutdown.send(());
    });

    engine.run().await
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
