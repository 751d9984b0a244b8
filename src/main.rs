//! High-Volatility Short Bot - Main Entry Point
//!
//! Paper trading by default; set `HVS__EXECUTION__PAPER_TRADE=false` to trade.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use high_vol_short_bot::config::{BybitConfig, Config};
use high_vol_short_bot::exchange::{BybitClient, MarketDataGateway};
use high_vol_short_bot::ledger::{LiveReconciler, PaperLedger, Reconciler};
use high_vol_short_bot::scheduler::{next_rebalance_time, sleep_duration, RebalanceScheduler};
use high_vol_short_bot::strategy::{RankerConfig, VolatilityRanker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// High-Volatility Short Bot CLI
#[derive(Parser)]
#[command(name = "high-vol-short-bot")]
#[command(version, about = "Long BTC, short the most volatile alts on Bybit, rebalanced every 4h")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run the rebalance loop until Ctrl-C (default)
    Run,

    /// Run a single rebalance cycle and exit
    Once,

    /// Print the current volatility ranking without trading
    Rank {
        /// Number of symbols to show
        #[arg(short, long, default_value = "20")]
        top: usize,
    },

    /// Print the next scheduled rebalance time
    Next,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Next = command {
        show_next_rebalance();
        return Ok(());
    }

    init_logging()?;

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          High-Volatility Short Bot v{}                  ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let client = Arc::new(build_client(&config)?);

    match command {
        Commands::Rank { top } => show_ranking(&config, client, top).await,
        Commands::Once => {
            let mut scheduler = build_scheduler(&config, client);
            let summary = scheduler.run_cycle().await?;
            info!(
                equity = %summary.valuation.equity.round_dp(2),
                positions = summary.report.positions_after.len(),
                "Single rebalance finished"
            );
            Ok(())
        }
        Commands::Run | Commands::Next => {
            let mut scheduler = build_scheduler(&config, client);
            scheduler
                .run(async {
                    tokio::signal::ctrl_c().await.ok();
                    info!("🛑 Shutdown signal received");
                })
                .await;
            info!("👋 High-Volatility Short Bot shutdown complete");
            Ok(())
        }
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "high-vol-short-bot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole run
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("high_vol_short_bot=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Capital: ${}", config.strategy.capital);
    info!("   Long: {}", config.strategy.reference_symbol);
    info!("   Shorts: {}", config.strategy.n_shorts);
    info!(
        "   Lookback: {} x {}m candles",
        config.strategy.lookback, config.strategy.candle_interval
    );
    info!("   Leverage: {}x", config.execution.leverage);

    if config.execution.paper_trade {
        info!("📝 MODE: PAPER TRADING (no real money)");
    } else if config.bybit.testnet {
        info!("🧪 MODE: TESTNET (test money)");
    } else {
        warn!("⚠️  MODE: LIVE TRADING (real money!)");
    }
}

/// Paper trading reads public mainnet data without credentials.
fn build_client(config: &Config) -> Result<BybitClient> {
    let bybit = if config.execution.paper_trade {
        BybitConfig {
            api_key: String::new(),
            api_secret: String::new(),
            testnet: false,
        }
    } else {
        config.bybit.clone()
    };

    Ok(BybitClient::new(&bybit)?
        .with_candle_interval(config.strategy.candle_interval.clone())
        .with_leverage(config.execution.leverage))
}

fn build_scheduler(config: &Config, client: Arc<BybitClient>) -> RebalanceScheduler {
    let reconciler: Box<dyn Reconciler> = if config.execution.paper_trade {
        Box::new(PaperLedger::new(config.strategy.capital))
    } else {
        Box::new(LiveReconciler::new(
            client.clone(),
            config.strategy.capital,
            Duration::from_millis(config.execution.order_pacing_ms),
        ))
    };

    RebalanceScheduler::new(
        client,
        VolatilityRanker::new(RankerConfig::from_config(config)),
        reconciler,
        config.strategy.clone(),
    )
}

async fn show_ranking(config: &Config, client: Arc<BybitClient>, top: usize) -> Result<()> {
    let symbols = client.list_tradable_symbols().await?;
    let ranker = VolatilityRanker::new(RankerConfig::from_config(config));
    let ranking = ranker.rank(client.as_ref(), &symbols).await;

    println!(
        "\n📊 Volatility Ranking ({} ranked, {} skipped)",
        ranking.len(),
        ranking.skipped.len()
    );
    for (i, score) in ranking.top(top).iter().enumerate() {
        let marker = if i < config.strategy.n_shorts { "SHORT" } else { "" };
        println!(
            "   {:>3}. {:<16} {:>8.4}  {}",
            i + 1,
            score.symbol,
            score.volatility,
            marker
        );
    }
    Ok(())
}

fn show_next_rebalance() {
    let now = Utc::now();
    let next = next_rebalance_time(now);
    println!("Now:            {}", now.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Next rebalance: {}", next.format("%Y-%m-%d %H:%M UTC"));
    println!("Sleep:          {}s (incl. settle buffer)", sleep_duration(now).as_secs());
}
