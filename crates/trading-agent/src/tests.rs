use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use admission_gate::DailyCircuitBreaker;
use anyhow::{bail, Result};
use async_trait::async_trait;
use broker_trait::{BrokerConnector, EventKind, NarrationSink, OrderFill, PriceFeed, RegimeAdvisor};
use charter::PolicyLimits;
use chrono::{DateTime, TimeZone, Utc};
use position_lifecycle::PositionBook;
use tokio::sync::Mutex;
use trade_core::{AccountSnapshot, MomentumConsensus, OpenPosition, Regime, RegimeSignal, Side, TradeCandidate, TradeError};

use crate::config::AgentConfig;
use crate::controller::{bracket_prices, AutonomousController, ControllerParts};
use crate::narration::RecordingNarrator;
use crate::order_router::OrderRouter;

fn limits() -> &'static PolicyLimits {
    PolicyLimits::load().unwrap()
}

/// Tuesday afternoon UTC
fn trading_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 14, 0, 0).unwrap()
}

/// Alternating 1.100 / 1.102, enough movement for a 24-pip stop without tripping volatility alarms
fn choppy(points: usize) -> Vec<f64> {
    (0..points).map(|i| if i % 2 == 0 { 1.100 } else { 1.102 }).collect()
}

// ---------------------------------------------------------------------------
// Test collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedFeed {
    series: HashMap<String, Vec<f64>>,
    delay: Option<Duration>,
}

impl ScriptedFeed {
    fn with(mut self, symbol: &str, prices: Vec<f64>) -> Self {
        self.series.insert(symbol.to_string(), prices);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn recent_prices(&self, symbol: &str, lookback: usize) -> Result<Vec<f64>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let Some(prices) = self.series.get(symbol) else {
            bail!("feed has no data for {symbol}");
        };
        let start = prices.len().saturating_sub(lookback);
        Ok(prices[start..].to_vec())
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        match self.series.get(symbol).and_then(|p| p.last()) {
            Some(price) => Ok(*price),
            None => bail!("feed has no data for {symbol}"),
        }
    }
}

struct FixedAdvisor {
    regime: Regime,
    confidence: f64,
}

#[async_trait]
impl RegimeAdvisor for FixedAdvisor {
    async fn detect_regime(&self, _prices: &[f64]) -> Result<RegimeSignal> {
        Ok(RegimeSignal {
            regime: self.regime,
            confidence: self.confidence,
            volatility: 0.01,
        })
    }

    async fn momentum_consensus(&self, _symbol: &str) -> Result<MomentumConsensus> {
        Ok(MomentumConsensus::default())
    }
}

struct StubBroker {
    paper: bool,
    nav: f64,
    fail_account: bool,
    orders: StdMutex<Vec<TradeCandidate>>,
}

impl StubBroker {
    fn paper(nav: f64) -> Self {
        Self {
            paper: true,
            nav,
            fail_account: false,
            orders: StdMutex::new(Vec::new()),
        }
    }

    fn live(nav: f64) -> Self {
        Self {
            paper: false,
            ..Self::paper(nav)
        }
    }

    fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn orders(&self) -> Vec<TradeCandidate> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerConnector for StubBroker {
    async fn account_snapshot(&self) -> Result<AccountSnapshot> {
        if self.fail_account {
            bail!("account endpoint unavailable");
        }
        Ok(AccountSnapshot {
            nav: self.nav,
            margin_used: 0.0,
            margin_available: self.nav,
            currency: "USD".to_string(),
        })
    }

    async fn open_positions(&self) -> Result<Vec<OpenPosition>> {
        Ok(Vec::new())
    }

    async fn place_order(&self, candidate: &TradeCandidate) -> Result<OrderFill> {
        let mut orders = self.orders.lock().unwrap();
        orders.push(candidate.clone());
        Ok(OrderFill {
            order_id: format!("STUB-{}", orders.len()),
            fill_price: candidate.limit_price.unwrap_or(1.10),
            units: candidate.units,
            filled_at: Utc::now(),
        })
    }

    async fn close_position(&self, _symbol: &str) -> Result<()> {
        Ok(())
    }

    async fn reduce_position(&self, _symbol: &str, _units: f64) -> Result<()> {
        Ok(())
    }

    async fn modify_position(&self, _symbol: &str, _stop_loss: Option<f64>, _take_profit: Option<f64>) -> Result<()> {
        Ok(())
    }

    fn is_paper(&self) -> bool {
        self.paper
    }

    fn broker_name(&self) -> &str {
        "stub"
    }
}

// ---------------------------------------------------------------------------
// Order router
// ---------------------------------------------------------------------------

mod router_tests {
    use super::*;

    struct RouterFixture {
        router: OrderRouter,
        broker: Arc<StubBroker>,
        book: PositionBook,
        breaker: Arc<Mutex<DailyCircuitBreaker>>,
        narrator: Arc<RecordingNarrator>,
    }

    fn fixture(broker: StubBroker) -> RouterFixture {
        let broker = Arc::new(broker);
        let book = PositionBook::new();
        let breaker = Arc::new(Mutex::new(DailyCircuitBreaker::new(limits())));
        let narrator = Arc::new(RecordingNarrator::new());
        let router = OrderRouter::new(
            broker.clone(),
            book.clone(),
            breaker.clone(),
            narrator.clone(),
            limits(),
            Duration::from_millis(500),
        );
        RouterFixture {
            router,
            broker,
            book,
            breaker,
            narrator,
        }
    }

    fn candidate() -> TradeCandidate {
        let mut candidate = TradeCandidate::new("EUR_USD", Side::Buy, 50_000.0).with_brackets(1.0976, 1.1077);
        candidate.limit_price = Some(1.1000);
        candidate.strategy_id = "price_action_holy_grail".to_string();
        candidate
    }

    #[tokio::test]
    async fn test_wrong_pin_has_no_side_effects() {
        let f = fixture(StubBroker::paper(100_000.0));

        let err = f.router.place_trade(&candidate(), Some(1)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TradeError>(), Some(TradeError::Unauthorized(_))));

        assert_eq!(f.broker.order_count(), 0);
        assert_eq!(f.book.active_count().await, 0);
        assert_eq!(f.breaker.lock().await.trades_today(), 0);
        assert!(f.narrator.events().is_empty());
    }

    #[tokio::test]
    async fn test_paper_trade_without_pin() {
        let f = fixture(StubBroker::paper(100_000.0));

        let placed = f.router.place_trade(&candidate(), None).await.unwrap();
        assert_eq!(placed.fill.order_id, "STUB-1");
        assert_eq!(placed.position.symbol, "EUR_USD");
        assert_eq!(placed.position.initial_stop_loss, Some(1.0976));
        assert!(!placed.latency_breached);

        assert!(f.book.is_active("EUR_USD").await);
        assert_eq!(f.breaker.lock().await.trades_today(), 1);
        assert_eq!(f.narrator.count(EventKind::TradeExecuted), 1);

        let executed = f.narrator.last(EventKind::TradeExecuted).unwrap();
        assert_eq!(executed.venue.as_deref(), Some("stub"));
        assert_eq!(executed.details["strategy_id"], "price_action_holy_grail");
    }

    #[tokio::test]
    async fn test_live_broker_requires_pin() {
        let f = fixture(StubBroker::live(100_000.0));

        let err = f.router.place_trade(&candidate(), None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TradeError>(), Some(TradeError::Unauthorized(_))));
        assert_eq!(f.broker.order_count(), 0);

        f.router.place_trade(&candidate(), Some(limits().pin)).await.unwrap();
        assert_eq!(f.broker.order_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_symbol_rejected_before_broker() {
        let f = fixture(StubBroker::paper(100_000.0));
        f.router.place_trade(&candidate(), None).await.unwrap();

        let err = f.router.place_trade(&candidate(), None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TradeError>(), Some(TradeError::InvalidInput(_))));
        assert_eq!(f.broker.order_count(), 1);
        assert_eq!(f.breaker.lock().await.trades_today(), 1);
    }
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

mod controller_tests {
    use super::*;
    use approx::assert_relative_eq;
    use leverage_sizer::LeverageSizer;

    struct Harness {
        controller: AutonomousController,
        broker: Arc<StubBroker>,
        book: PositionBook,
        breaker: Arc<Mutex<DailyCircuitBreaker>>,
        narrator: Arc<RecordingNarrator>,
    }

    fn harness(feed: ScriptedFeed, regime: Regime, broker: StubBroker, config: AgentConfig) -> Harness {
        let broker = Arc::new(broker);
        let book = PositionBook::new();
        let breaker = Arc::new(Mutex::new(DailyCircuitBreaker::new(limits())));
        let narrator = Arc::new(RecordingNarrator::new());

        let controller = AutonomousController::new(
            config,
            limits(),
            ControllerParts {
                feed: Arc::new(feed),
                broker: broker.clone(),
                advisor: Arc::new(FixedAdvisor { regime, confidence: 0.8 }),
                narrator: narrator.clone(),
                book: book.clone(),
                breaker: breaker.clone(),
            },
        );

        Harness {
            controller,
            broker,
            book,
            breaker,
            narrator,
        }
    }

    fn eur_feed(points: usize) -> ScriptedFeed {
        ScriptedFeed::default().with("EUR_USD", choppy(points))
    }

    #[test]
    fn test_bracket_prices() {
        let prices = choppy(50);
        let (stop, target) = bracket_prices(Side::Buy, 1.102, &prices, 1.2, 3.2);
        assert!(stop < 1.102 && target > 1.102);
        assert!(trade_core::risk_reward(Side::Buy, 1.102, stop, target).unwrap() >= 3.2);

        let (stop, target) = bracket_prices(Side::Sell, 1.102, &prices, 1.2, 3.2);
        assert!(stop > 1.102 && target < 1.102);

        // Flat series falls back to the minimum distance
        let (stop, _) = bracket_prices(Side::Buy, 1.0, &[1.0; 20], 1.2, 3.2);
        assert_relative_eq!(1.0 - stop, 0.001, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_insufficient_data_skips_symbol() {
        let mut h = harness(eur_feed(5), Regime::Bull, StubBroker::paper(1_000_000.0), AgentConfig::default());
        h.controller.run_cycle_at(trading_time()).await;

        assert_eq!(
            h.narrator.kinds(),
            vec![EventKind::AutonomousHeartbeat, EventKind::AutonomousInsufficientData]
        );
        let event = h.narrator.last(EventKind::AutonomousInsufficientData).unwrap();
        assert_eq!(event.symbol.as_deref(), Some("EUR_USD"));
        assert_eq!(event.details["points"], 5);
        assert_eq!(h.controller.metrics().symbols_skipped, 1);
        assert_eq!(h.broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_tripped_breaker_skips_cycle() {
        let mut h = harness(eur_feed(50), Regime::Bull, StubBroker::paper(1_000_000.0), AgentConfig::default());
        {
            let mut breaker = h.breaker.lock().await;
            for _ in 0..limits().max_daily_trades {
                breaker.record_trade(trading_time());
            }
        }

        h.controller.run_cycle_at(trading_time()).await;

        assert_eq!(h.narrator.count(EventKind::CircuitBreaker), 1);
        assert_eq!(h.narrator.count(EventKind::HedgeSnapshot), 0);
        assert_eq!(h.controller.metrics().cycles_skipped_breaker, 1);
        assert_eq!(h.controller.metrics().cycles_run, 1);
        assert_eq!(h.broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_non_directional_regime_builds_no_candidates() {
        for regime in [Regime::Sideways, Regime::Undetermined, Regime::Crash] {
            let mut h = harness(eur_feed(50), regime, StubBroker::paper(1_000_000.0), AgentConfig::default());
            h.controller.run_cycle_at(trading_time()).await;

            assert_eq!(h.narrator.count(EventKind::HedgeSnapshot), 1, "{regime}");
            assert_eq!(h.controller.metrics().candidates_generated, 0, "{regime}");
            assert_eq!(h.broker.order_count(), 0, "{regime}");
        }
    }

    #[tokio::test]
    async fn test_charter_rejection_is_narrated() {
        let config = AgentConfig {
            timeframe: "M5".to_string(),
            ..AgentConfig::default()
        };
        let mut h = harness(eur_feed(50), Regime::Bull, StubBroker::paper(1_000_000.0), config);
        h.controller.run_cycle_at(trading_time()).await;

        assert_eq!(h.narrator.count(EventKind::AutonomousCharterReject), 2);
        assert_eq!(h.narrator.count(EventKind::AutonomousGatePass), 0);
        assert_eq!(h.controller.metrics().charter_rejections, 2);
        assert_eq!(h.broker.order_count(), 0);

        let reject = h.narrator.last(EventKind::AutonomousCharterReject).unwrap();
        let reasons = reject.details["reasons"].as_array().unwrap();
        assert!(reasons.iter().any(|r| r.as_str().unwrap().contains("Timeframe M5")));
    }

    #[tokio::test]
    async fn test_bull_cycle_places_one_trade() {
        let mut h = harness(eur_feed(50), Regime::Bull, StubBroker::paper(1_000_000.0), AgentConfig::default());
        h.controller.run_cycle_at(trading_time()).await;

        let orders = h.broker.orders();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        let entry = order.limit_price.unwrap();
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.timeframe, "M15");
        assert_eq!(order.broker, "stub");
        assert_eq!(order.strategy_id, "institutional_sd_liquidity_sweep");
        assert!(order.stop_loss.unwrap() < entry);
        assert!(order.take_profit.unwrap() > entry);
        assert!(order.notional(entry) >= limits().min_notional_usd);
        assert!(order.risk_reward(entry).unwrap() >= limits().min_risk_reward);

        assert!(h.book.is_active("EUR_USD").await);
        assert_eq!(h.breaker.lock().await.trades_today(), 1);

        let pass = h.narrator.last(EventKind::AutonomousGatePass).unwrap();
        let share = pass.details["capital_share"].as_f64().unwrap();
        assert!(share > 0.5 && share < 1.0);

        // The runner-up strategy runs into the same-side USD exposure just opened
        assert_eq!(h.narrator.count(EventKind::AutonomousGatePass), 1);
        assert_eq!(h.narrator.count(EventKind::AutonomousGateReject), 1);
        assert_eq!(h.narrator.count(EventKind::AutonomousTradePlaced), 1);
        assert_eq!(h.narrator.count(EventKind::TradeExecuted), 1);

        let metrics = h.controller.metrics();
        assert_eq!(metrics.candidates_generated, 2);
        assert_eq!(metrics.trades_placed, 1);
        assert_eq!(metrics.gate_rejections, 1);
        assert_relative_eq!(metrics.admission_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_size_held_to_venue_leverage() {
        let venue_max = limits().venue_max_leverage;

        // The choppy series sits at the sizer's volatility floor, so raw leverage
        // is far above every ceiling
        for sizer in [LeverageSizer::default(), LeverageSizer::aggressive()] {
            assert!(sizer.max_leverage > venue_max);
            let nav = 1_000_000.0;
            let risk_amount = nav * sizer.base_risk;

            let mut h = harness(eur_feed(50), Regime::Bull, StubBroker::paper(nav), AgentConfig::default());
            h.controller = h.controller.with_sizer(sizer);
            h.controller.run_cycle_at(trading_time()).await;

            let snapshot = h.narrator.last(EventKind::HedgeSnapshot).unwrap();
            let multiplier = snapshot.details["size_multiplier"].as_f64().unwrap();
            let orders = h.broker.orders();
            assert_eq!(orders.len(), 1);
            assert_relative_eq!(orders[0].units, risk_amount * venue_max * multiplier, epsilon = 1e-6);
        }
    }

    #[tokio::test]
    async fn test_failures_never_escape_the_cycle() {
        let broker = StubBroker {
            fail_account: true,
            ..StubBroker::paper(1_000_000.0)
        };
        let mut h = harness(eur_feed(50), Regime::Bull, broker, AgentConfig::default());
        h.controller.run_cycle_at(trading_time()).await;
        h.controller.run_cycle_at(trading_time()).await;

        assert_eq!(h.narrator.count(EventKind::AutonomousError), 2);
        assert_eq!(h.controller.metrics().errors, 2);
        assert_eq!(h.controller.metrics().cycles_run, 2);

        let config = AgentConfig {
            symbols: vec!["GBP_USD".to_string(), "EUR_USD".to_string()],
            ..AgentConfig::default()
        };
        let mut h = harness(eur_feed(50), Regime::Bull, StubBroker::paper(1_000_000.0), config);
        h.controller.run_cycle_at(trading_time()).await;

        let error = h.narrator.last(EventKind::AutonomousError).unwrap();
        assert_eq!(error.symbol.as_deref(), Some("GBP_USD"));
        assert_eq!(h.broker.order_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_feed_times_out() {
        let config = AgentConfig {
            collaborator_timeout_ms: 20,
            ..AgentConfig::default()
        };
        let feed = eur_feed(50).slow(Duration::from_millis(200));
        let mut h = harness(feed, Regime::Bull, StubBroker::paper(1_000_000.0), config);
        h.controller.run_cycle_at(trading_time()).await;

        let error = h.narrator.last(EventKind::AutonomousError).unwrap();
        assert!(error.details["error"].as_str().unwrap().contains("Timed out"));
        assert_eq!(h.broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_interval() {
        let config = AgentConfig {
            heartbeat_interval_cycles: 2,
            ..AgentConfig::default()
        };
        let mut h = harness(eur_feed(5), Regime::Bull, StubBroker::paper(1_000_000.0), config);
        for _ in 0..3 {
            h.controller.run_cycle_at(trading_time()).await;
        }

        assert_eq!(h.narrator.count(EventKind::AutonomousHeartbeat), 2);
        let heartbeat = h.narrator.last(EventKind::AutonomousHeartbeat).unwrap();
        assert_eq!(heartbeat.details["mode"], "paper");
        assert_eq!(heartbeat.details["brokers"][0], "stub");
        assert_eq!(heartbeat.details["active_positions"], 0);
        assert_eq!(heartbeat.details["metrics"]["cycles_run"], 2);
        assert_eq!(heartbeat.details["metrics"]["symbols_skipped"], 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = AgentConfig {
            control_interval_seconds: 3600,
            ..AgentConfig::default()
        };
        let mut h = harness(eur_feed(5), Regime::Bull, StubBroker::paper(1_000_000.0), config);
        let (tx, rx) = tokio::sync::watch::channel(false);

        let task = tokio::spawn(async move {
            h.controller.run(rx).await;
            h.controller.metrics().cycles_run
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let cycles = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(cycles, 1);
    }

    #[tokio::test]
    async fn test_paper_stack_trades_and_reassesses() {
        use crate::paper::{PaperBroker, RandomWalkFeed, DEFAULT_STEP_VOLATILITY};
        use position_lifecycle::{LifecycleConfig, LifecycleManager};

        let config = AgentConfig::default();
        let feed: Arc<dyn PriceFeed> = Arc::new(RandomWalkFeed::new(config.paper_seed, DEFAULT_STEP_VOLATILITY));
        let paper = Arc::new(PaperBroker::new("paper", feed.clone(), config.paper_starting_balance));
        let broker: Arc<dyn BrokerConnector> = paper.clone();
        // Fixed regime so the walk's drift cannot decide whether a trade happens
        let advisor: Arc<dyn RegimeAdvisor> = Arc::new(FixedAdvisor {
            regime: Regime::Bull,
            confidence: 0.8,
        });
        let narrator = Arc::new(RecordingNarrator::new());
        let narrator_sink: Arc<dyn NarrationSink> = narrator.clone();
        let book = PositionBook::new();

        let mut controller = AutonomousController::new(
            config.clone(),
            limits(),
            ControllerParts {
                feed: feed.clone(),
                broker: broker.clone(),
                advisor: advisor.clone(),
                narrator: narrator_sink.clone(),
                book: book.clone(),
                breaker: Arc::new(Mutex::new(DailyCircuitBreaker::new(limits()))),
            },
        );
        for _ in 0..3 {
            controller.run_cycle_at(trading_time()).await;
        }

        let metrics = controller.metrics();
        assert_eq!(metrics.cycles_run, 3);
        assert_eq!(metrics.errors, 0);
        assert_eq!(metrics.charter_rejections, 0);
        assert_eq!(metrics.trades_placed, 1);
        assert_eq!(narrator.count(EventKind::TradeExecuted), 1);
        assert_eq!(paper.open_positions().await.unwrap().len(), 1);
        assert!(book.is_active("EUR_USD").await);

        let lifecycle = LifecycleManager::new(
            book.clone(),
            broker,
            feed,
            advisor,
            narrator_sink,
            limits(),
            LifecycleConfig::default().with_intervals(Duration::from_secs(1), config.collaborator_timeout()),
        );
        let updates = lifecycle.reassess_all().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].symbol, "EUR_USD");
        assert_eq!(narrator.count(EventKind::PositionReassess), 1);
        assert_eq!(book.history().await.len(), 1);
    }
}
