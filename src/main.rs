use std::sync::Arc;

use clap::Parser;

use zscorebot::config::BotConfig;
use zscorebot::exchange::BinanceFutures;
use zscorebot::execution::Coordinator;
use zscorebot::strategy::MeanReversionStrategy;

#[derive(Parser)]
#[command(
    name = "zscorebot",
    about = "Z-score mean reversion bot for USDT-M futures"
)]
struct Cli {
    /// Override SYMBOL from the environment
    #[arg(long)]
    symbol: Option<String>,

    /// Override TIMEFRAME from the environment (e.g. 15m, 1h)
    #[arg(long)]
    timeframe: Option<String>,

    /// Override MAX_LEVERAGE from the environment
    #[arg(long)]
    leverage: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut config = BotConfig::from_env()?;
    if let Some(symbol) = cli.symbol {
        config.symbol = symbol;
    }
    if let Some(timeframe) = cli.timeframe {
        config.timeframe = timeframe;
    }
    if let Some(leverage) = cli.leverage {
        config.max_leverage = leverage;
    }
    config.validate()?;

    tracing::info!(
        symbol = %config.symbol,
        timeframe = %config.timeframe,
        leverage = config.max_leverage,
        risk_per_trade = config.risk_per_trade,
        "starting zscorebot"
    );

    let gateway = Arc::new(BinanceFutures::new(
        config.api_key.clone(),
        config.api_secret.clone(),
    ));
    let strategy = Box::new(MeanReversionStrategy::new(config.strategy_config()));

    let mut coordinator = Coordinator::new(gateway, strategy, config.engine_settings())?;
    coordinator.startup().await?;
    coordinator.run().await
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "zscorebot=info".to_string()),
        )
        .init();
}
