use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use broker_core::BrokerClient;
use ml_client::PredictorClient;
use paper_broker::PaperBroker;
use risk_manager::RiskManager;
use robinhood_broker::RobinhoodClient;
use tokio::signal::unix::SignalKind;

mod bot;
mod config;
mod data;
mod executor;
mod metrics;
mod monitor;
mod types;

use bot::TradingBot;
use config::AgentConfig;
use data::DataServiceClient;
use executor::ExecutionAdapter;
use monitor::HealthMonitor;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting Coinpilot trading agent");

    // 2. Load configuration (with validation)
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Budget: ${}", config.trading_budget);
    tracing::info!("  Risk per trade: {:.0}%", config.max_risk_per_trade * 100.0);
    tracing::info!("  Daily loss limit: {:.0}%", config.daily_loss_limit * 100.0);
    tracing::info!("  Cycle interval: {}s", config.cycle_interval_secs);
    tracing::info!("  Symbols: {}", config.symbols.join(", "));

    // 3. Safety gate: paper by default, live requires explicit approval
    let broker: Arc<dyn BrokerClient> = if config.paper_trading {
        tracing::info!("Paper trading mode");
        Arc::new(PaperBroker::new(config.trading_budget))
    } else {
        let approved = std::env::var("LIVE_TRADING_APPROVED")
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);
        if !approved {
            tracing::error!(
                "PAPER_TRADING=false but live trading not approved. \
                 Set LIVE_TRADING_APPROVED=yes to trade real money."
            );
            std::process::exit(1);
        }
        tracing::warn!("LIVE TRADING MODE — REAL MONEY AT RISK");
        let client = RobinhoodClient::new(
            config
                .robinhood_api_key
                .clone()
                .unwrap_or_default(),
            config
                .robinhood_private_key
                .as_deref()
                .unwrap_or_default(),
            config.robinhood_base_url.clone(),
        )?;
        Arc::new(client)
    };

    // 4. Wire components
    let executor = Arc::new(ExecutionAdapter::new(
        Arc::clone(&broker),
        config.trading_budget,
    ));
    tracing::info!("Execution adapter initialized ({})", executor.broker_name());

    let risk = Arc::new(RiskManager::new(config.risk_config()));
    tracing::info!("Risk gate initialized");

    let data = Arc::new(DataServiceClient::new(config.data_service_url.clone())?);
    tracing::info!("Data service client initialized ({})", config.data_service_url);

    let predictor = Arc::new(PredictorClient::new(
        config.predictor_url.clone(),
        Duration::from_secs(5),
    )?);
    tracing::info!("Predictor client initialized ({})", config.predictor_url);

    // 5. Startup connectivity checks
    if !executor.ping().await {
        anyhow::bail!("broker connectivity check failed");
    }
    tracing::info!("Startup check: broker OK");

    match predictor.health().await {
        Ok(()) => tracing::info!("Startup check: predictor OK"),
        Err(e) => tracing::warn!(
            "Startup check: predictor unreachable ({e}) — signals will degrade to technical only"
        ),
    }

    let bot = Arc::new(TradingBot::new(
        config.clone(),
        data,
        predictor,
        Arc::clone(&executor),
        risk,
    ));

    // 6. Start the loop and the health monitor
    bot.start(None).await?;

    let monitor = HealthMonitor::new(Arc::clone(&bot), Arc::clone(&executor), &config);
    let monitor_handle = tokio::spawn(monitor.run());

    tracing::info!(
        "Agent running. Cycling every {}s. Press Ctrl+C to stop.",
        config.cycle_interval_secs
    );

    // 7. Graceful shutdown on SIGINT/SIGTERM
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    tracing::info!("Shutdown signal received, exiting gracefully...");
    monitor_handle.abort();
    bot.stop().await;

    tracing::info!("Trading agent shut down.");
    Ok(())
}
