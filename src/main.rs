mod config;
mod datafeeds;
mod engine;
mod exchange;
mod features;
mod indicators;
mod portfolio;
mod risk;
mod storage;
mod strategies;
mod types;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::Settings;
use engine::{TradingContainer, TradingEngine};
use storage::ModePaths;
use types::TradingMode;

#[derive(Parser)]
#[command(name = "coinspot")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous spot-crypto trading engine for Coinbase Advanced Trade", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading engine (mode from TRADING_MODE: paper|live)
    Run,
    /// Print the latest status snapshot and exit
    Status,
    /// One-shot universe scan: print the ranked eligible symbols
    Universe {
        /// How many ranked symbols to print
        #[arg(short, long, default_value = "30")]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_string())),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run => run_engine().await,
        Commands::Status => show_status(),
        Commands::Universe { top } => scan_universe(top).await,
    }
}

async fn run_engine() -> Result<()> {
    let settings = Settings::from_env();
    if let Err(errors) = settings.validate() {
        for e in &errors {
            error!("[CONFIG] {}", e);
        }
        return Err(anyhow!("invalid configuration ({} errors)", errors.len()));
    }
    info!(
        "coinspot starting: mode={}, max_trade=${}, daily_max_loss=${}",
        settings.mode, settings.max_trade_usd, settings.daily_max_loss_usd
    );

    let container = TradingContainer::build(settings).await?;
    let engine = TradingEngine::new(container).await?;
    let stop = engine.stop_handle();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("[MAIN] shutdown signal received");
        let _ = stop.send(true);
    });

    engine.run().await
}

fn show_status() -> Result<()> {
    let mode = TradingMode::from_env();
    let paths = ModePaths::new(mode);
    let path = paths.status_path();
    match std::fs::read_to_string(&path) {
        Ok(body) => {
            println!("{}", body);
            Ok(())
        }
        Err(_) => Err(anyhow!("no status snapshot at {}", path.display())),
    }
}

async fn scan_universe(top: usize) -> Result<()> {
    use std::sync::Arc;
    use tokio::sync::RwLock;

    let settings = Arc::new(RwLock::new(Settings::from_env()));
    let client = exchange::CoinbaseClient::public_only();
    let paths = ModePaths::new(TradingMode::Paper);
    let store = Arc::new(storage::CandleStore::new(paths.candles_dir()));
    let scheduler = Arc::new(RwLock::new(datafeeds::TierScheduler::default()));
    let health = Arc::new(datafeeds::DataHealth::new());
    let data = Arc::new(datafeeds::MarketData::new(store, scheduler, health));
    let scanner = datafeeds::UniverseScanner::new(client, data, settings);

    let ranked = scanner
        .scan()
        .await
        .map_err(|e| anyhow!("universe scan failed: {}", e))?;
    let universe = scanner.universe_snapshot().await;

    println!("{:<4} {:<14} {:>14} {:>10} {}", "#", "symbol", "vol_24h_usd", "spread", "eligible");
    for (rank, symbol) in ranked.iter().take(top).enumerate() {
        if let Some(info) = universe.get(symbol) {
            println!(
                "{:<4} {:<14} {:>14.0} {:>8.1}bp {}",
                rank + 1,
                info.symbol,
                info.volume_24h_usd,
                info.avg_spread_bps,
                if info.eligible { "yes" } else { "no" },
            );
        }
    }
    Ok(())
}
