use std::sync::Arc;

use admission_gate::DailyCircuitBreaker;
use anyhow::{bail, Result};
use broker_trait::{BrokerConnector, EventKind, NarrationEvent, NarrationSink, PriceFeed, RegimeAdvisor};
use charter::PolicyLimits;
use market_regime_detector::MarketRegimeDetector;
use position_lifecycle::{LifecycleConfig, LifecycleManager, PositionBook};
use serde_json::json;
use tokio::signal::unix::SignalKind;
use tokio::sync::{watch, Mutex};

use trading_agent::paper::DEFAULT_STEP_VOLATILITY;
use trading_agent::{AgentConfig, AutonomousController, ControllerParts, PaperBroker, RandomWalkFeed, TracingNarrator};

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

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting autonomous trading agent");

    // 2. Charter self-test. Startup stops here if it fails.
    let limits = PolicyLimits::load()?;
    let summary = limits.summary();
    tracing::info!(
        version = %summary.version,
        max_hold_hours = summary.max_hold_hours,
        min_risk_reward = summary.min_risk_reward,
        min_notional_usd = summary.min_notional_usd,
        max_concurrent_positions = summary.max_concurrent_positions,
        max_daily_trades = summary.max_daily_trades,
        "Charter loaded"
    );

    // 3. Configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Mode: {}", config.trading_mode.as_str());
    tracing::info!("  Symbols: {} ({})", config.symbols.join(","), config.market_class.as_str());
    tracing::info!("  Control interval: {}s", config.control_interval_seconds);
    tracing::info!("  Reassess interval: {}s", config.reassess_interval_seconds);
    tracing::info!("  Collaborator timeout: {}ms", config.collaborator_timeout_ms);

    // 4. Safety gate: paper by default, live requires approval and the Charter PIN
    if config.is_live() {
        if !config.live_trading_approved {
            bail!("TRADING_MODE=live requires LIVE_TRADING_APPROVED=yes");
        }
        match config.charter_pin {
            Some(pin) if limits.validate_pin(pin) => {}
            _ => bail!("TRADING_MODE=live requires a valid CHARTER_PIN"),
        }
        bail!("TRADING_MODE=live but no live connector configured");
    }
    tracing::info!("Paper trading mode (seed {})", config.paper_seed);

    // 5. Collaborators
    let feed: Arc<dyn PriceFeed> = Arc::new(RandomWalkFeed::new(config.paper_seed, DEFAULT_STEP_VOLATILITY));
    let broker: Arc<dyn BrokerConnector> = Arc::new(PaperBroker::new("paper", feed.clone(), config.paper_starting_balance));
    let advisor: Arc<dyn RegimeAdvisor> = Arc::new(MarketRegimeDetector::with_feed(feed.clone(), config.price_lookback));
    let narrator: Arc<dyn NarrationSink> = Arc::new(TracingNarrator::new());

    let book = PositionBook::new();
    let breaker = Arc::new(Mutex::new(DailyCircuitBreaker::new(limits)));

    let lifecycle_config =
        LifecycleConfig::default().with_intervals(config.reassess_interval(), config.collaborator_timeout());
    lifecycle_config.validate()?;
    let lifecycle = LifecycleManager::new(
        book.clone(),
        broker.clone(),
        feed.clone(),
        advisor.clone(),
        narrator.clone(),
        limits,
        lifecycle_config,
    );

    let sizer = config.leverage_sizer();
    let mut controller = AutonomousController::new(
        config.clone(),
        limits,
        ControllerParts {
            feed,
            broker: broker.clone(),
            advisor,
            narrator: narrator.clone(),
            book,
            breaker,
        },
    )
    .with_sizer(sizer);

    narrator.narrate(NarrationEvent::new(
        EventKind::SystemStart,
        json!({
            "mode": config.trading_mode.as_str(),
            "brokers": [broker.broker_name()],
            "symbols": config.symbols,
            "charter_version": summary.version,
        }),
    ));

    // 6. Both loops share one shutdown signal (SIGINT + SIGTERM)
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let lifecycle_rx = shutdown_rx.clone();
    let lifecycle_task = tokio::spawn(async move { lifecycle.run(lifecycle_rx).await });
    let controller_task = tokio::spawn(async move { controller.run(shutdown_rx).await });

    tracing::info!(
        "Agent is now running. Cycle every {}s. Press Ctrl+C to stop.",
        config.control_interval_seconds
    );

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    tracing::info!("Shutdown signal received, finishing in-flight cycles...");
    shutdown_tx.send(true).ok();

    if let Err(e) = controller_task.await {
        tracing::error!("Control loop task failed: {}", e);
    }
    if let Err(e) = lifecycle_task.await {
        tracing::error!("Lifecycle task failed: {}", e);
    }

    narrator.narrate(NarrationEvent::new(
        EventKind::SystemStop,
        json!({ "mode": config.trading_mode.as_str(), "reason": "shutdown signal" }),
    ));
    tracing::info!("Trading agent shut down.");
    Ok(())
}
