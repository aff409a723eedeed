use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use goldtrader::config::AppConfig;
use goldtrader::execution::{BrokerGateway, PaperBroker};
use goldtrader::TradingEngine;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "goldtrader", about = "Automated gold trading engine (paper broker)")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the paper broker until Ctrl+C
    Run {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("goldtrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run { cycles } => run(config, cycles).await,
    }
}

async fn run(config: AppConfig, cycles: Option<u64>) -> Result<()> {
    tracing::info!("goldtrader starting (paper broker)");
    tracing::info!("  Symbol: {}", config.symbol);
    tracing::info!("  Balance: ${:.2}", config.initial_balance);
    tracing::info!("  Max Drawdown: {}%", config.risk.max_drawdown_pct * 100.0);
    tracing::info!("  Max Daily Loss: ${:.2}", config.risk.max_daily_loss);
    tracing::info!("  Poll Interval: {}s", config.poll_interval_secs);

    let broker = Arc::new(PaperBroker::new(config.paper_settings()));
    let gateway = BrokerGateway::new(broker.clone(), broker, config.broker.clone());
    let engine = TradingEngine::new(&config, gateway);

    let mut completed = engine.subscribe_cycles();
    engine.start().await;

    let wait_for_cycles = async {
        match cycles {
            Some(limit) => {
                if completed.wait_for(|count| *count >= limit).await.is_err() {
                    tracing::error!("Cycle counter closed");
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = wait_for_cycles => {
            tracing::info!("Cycle limit reached, shutting down...");
        }
    }

    engine.stop().await;

    let account = engine.account_state().await;
    tracing::info!(
        balance = account.balance,
        equity = account.equity,
        drawdown = account.drawdown(),
        status = ?account.status,
        "Final account state"
    );
    for position in engine.recent_positions(10).await {
        tracing::info!(
            position_id = %position.id,
            side = %position.side,
            status = %position.status,
            entry = position.entry_price,
            pnl = ?position.realized_pnl,
            "Position"
        );
    }
    engine.performance().await.print_report();

    tracing::info!("goldtrader stopped");
    Ok(())
}
