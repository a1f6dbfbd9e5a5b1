use std::sync::Arc;

use admission_gate::{AdmissionGate, DailyCircuitBreaker};
use anyhow::Result;
use broker_trait::{BrokerConnector, EventKind, NarrationEvent, NarrationSink, PriceFeed, RegimeAdvisor};
use charter::{CharterPrecheck, PolicyLimits};
use chrono::{DateTime, Utc};
use hedge_advisor::{HedgeAdvisor, HedgeAnalysis, HedgeInputs};
use leverage_sizer::{validate_leverage_against_venue, LeverageSizer, MarketCondition};
use position_lifecycle::{call_with_timeout, PositionBook};
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::time;
use trade_core::stats::diff_std;
use trade_core::{AccountSnapshot, RegimeSignal, Side, TradeCandidate};

use crate::config::AgentConfig;
use crate::metrics::AgentMetrics;
use crate::order_router::OrderRouter;
use crate::strategy_selector::{assign_capital_weights, SelectionContext, StrategyRank, StrategySelector};

/// Stop distance used when the price series has no variation
const MIN_STOP_DISTANCE: f64 = 0.001;

/// Added to the target ratio so price rounding never lands the bracket under the minimum
const RR_ROUNDING_MARGIN: f64 = 1e-6;

/// Collaborators and shared state the control loop is wired to
pub struct ControllerParts {
    pub feed: Arc<dyn PriceFeed>,
    pub broker: Arc<dyn BrokerConnector>,
    pub advisor: Arc<dyn RegimeAdvisor>,
    pub narrator: Arc<dyn NarrationSink>,
    pub book: PositionBook,
    pub breaker: Arc<Mutex<DailyCircuitBreaker>>,
}

/// Everything a symbol's market snapshot produced before strategies are tried
struct SymbolSetup {
    side: Side,
    prices: Vec<f64>,
    signal: RegimeSignal,
    analysis: HedgeAnalysis,
    consensus: Option<f64>,
}

/// The autonomous control loop: signals in, gated and routed trades out.
///
/// Every candidate passes the Charter pre-check, then the admission gate, and
/// only then reaches the order router. Failures are logged and narrated; none
/// escape a cycle.
pub struct AutonomousController {
    config: AgentConfig,
    limits: &'static PolicyLimits,
    feed: Arc<dyn PriceFeed>,
    broker: Arc<dyn BrokerConnector>,
    advisor: Arc<dyn RegimeAdvisor>,
    narrator: Arc<dyn NarrationSink>,
    book: PositionBook,
    breaker: Arc<Mutex<DailyCircuitBreaker>>,
    router: OrderRouter,
    hedge: HedgeAdvisor,
    sizer: LeverageSizer,
    gate: AdmissionGate,
    selector: StrategySelector,
    metrics: AgentMetrics,
}

impl AutonomousController {
    pub fn new(config: AgentConfig, limits: &'static PolicyLimits, parts: ControllerParts) -> Self {
        let router = OrderRouter::new(
            parts.broker.clone(),
            parts.book.clone(),
            parts.breaker.clone(),
            parts.narrator.clone(),
            limits,
            config.collaborator_timeout(),
        );
        let metrics = AgentMetrics::new(config.metrics_log_interval_cycles);

        Self {
            limits,
            feed: parts.feed,
            broker: parts.broker,
            advisor: parts.advisor,
            narrator: parts.narrator,
            book: parts.book,
            breaker: parts.breaker,
            router,
            hedge: HedgeAdvisor::new(),
            sizer: LeverageSizer::default(),
            gate: AdmissionGate::new(limits),
            selector: StrategySelector::new(),
            metrics,
            config,
        }
    }

    pub fn with_sizer(mut self, sizer: LeverageSizer) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Run until `shutdown` flips to true. A cycle already in progress always finishes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.control_interval());
        tracing::info!(
            interval_secs = self.config.control_interval_seconds,
            symbols = ?self.config.symbols,
            "Autonomous control loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.metrics.log_metrics();
        tracing::info!(metrics = %self.metrics.to_json(), "Autonomous control loop stopped");
    }

    pub async fn run_cycle(&mut self) {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) {
        let cycle_start = AgentMetrics::start_timer();

        if self.config.heartbeat_interval_cycles > 0
            && self.metrics.cycles_run.is_multiple_of(self.config.heartbeat_interval_cycles)
        {
            self.heartbeat().await;
        }

        self.metrics.positions_closed = self.book.closed_count().await as u64;

        let account = match self.account().await {
            Ok(account) => account,
            Err(e) => {
                self.report_error(None, "account_snapshot", &e);
                self.metrics.finish_cycle(cycle_start);
                return;
            }
        };

        let check = self.breaker.lock().await.check(account.nav, now);
        if !check.can_trade {
            self.narrate_breaker(&check);
            self.metrics.cycles_skipped_breaker += 1;
            self.metrics.finish_cycle(cycle_start);
            return;
        }

        for symbol in self.config.symbols.clone() {
            if let Err(e) = self.process_symbol(&symbol, &account, check.daily_pnl_percent, now).await {
                self.report_error(Some(&symbol), "process_symbol", &e);
            }
        }

        self.metrics.finish_cycle(cycle_start);
    }

    async fn heartbeat(&self) {
        let book = self.book.summary().await;
        tracing::debug!(active_positions = book.open_positions, unrealized_pnl = book.total_pnl, "Heartbeat");
        self.narrator.narrate(NarrationEvent::new(
            EventKind::AutonomousHeartbeat,
            json!({
                "mode": self.config.trading_mode.as_str(),
                "autonomous": true,
                "brokers": [self.broker.broker_name()],
                "active_positions": book.open_positions,
                "unrealized_pnl": book.total_pnl,
                "cycle": self.metrics.cycles_run,
                "metrics": self.metrics.to_json(),
            }),
        ));
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        call_with_timeout(self.config.collaborator_timeout(), self.broker.account_snapshot()).await
    }

    async fn process_symbol(
        &mut self,
        symbol: &str,
        account: &AccountSnapshot,
        daily_pnl_percent: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(setup) = self.assess_symbol(symbol, account).await? else {
            return Ok(());
        };

        let context = SelectionContext {
            market: self.config.market_class,
            regime: setup.signal.regime,
            recent_pnl: daily_pnl_percent,
        };
        let strategies = self.selector.select_active(&context, self.config.max_strategies);
        if strategies.is_empty() {
            tracing::debug!(symbol, market = self.config.market_class.as_str(), "No strategy trades this market");
            return Ok(());
        }

        let shares = assign_capital_weights(&strategies, 1.0);
        for rank in &strategies {
            let share = shares.get(&rank.meta.id).copied().unwrap_or_default();
            if !self.try_strategy(symbol, &setup, rank, share, now).await? {
                break;
            }
        }
        Ok(())
    }

    /// Regime, hedge snapshot and entry permission for one symbol.
    /// `None` means the symbol sits this cycle out.
    async fn assess_symbol(&mut self, symbol: &str, account: &AccountSnapshot) -> Result<Option<SymbolSetup>> {
        let timeout = self.config.collaborator_timeout();

        let prices = call_with_timeout(timeout, self.feed.recent_prices(symbol, self.config.price_lookback)).await?;
        if prices.len() < self.config.min_price_points {
            self.metrics.symbols_skipped += 1;
            self.narrator.narrate(
                NarrationEvent::new(
                    EventKind::AutonomousInsufficientData,
                    json!({ "points": prices.len(), "required": self.config.min_price_points }),
                )
                .for_symbol(symbol),
            );
            return Ok(None);
        }

        let signal = call_with_timeout(timeout, self.advisor.detect_regime(&prices)).await?;
        let volumes = call_with_timeout(timeout, self.feed.recent_volumes(symbol, self.config.price_lookback))
            .await
            .unwrap_or_default();

        let analysis = self.hedge.analyze(&HedgeInputs {
            prices: prices.clone(),
            volumes,
            nav: account.nav,
            margin_used: account.margin_used,
            open_positions: self.book.active_count().await,
            correlations: Vec::new(),
            regime: signal.regime,
        });

        self.narrator.narrate(
            NarrationEvent::new(
                EventKind::HedgeSnapshot,
                json!({
                    "regime": signal.regime,
                    "confidence": signal.confidence,
                    "volatility": signal.volatility,
                    "hedge_action": analysis.primary_action,
                    "risk_level": analysis.risk_level,
                    "severity_score": analysis.severity_score,
                    "size_multiplier": analysis.position_size_multiplier,
                }),
            )
            .for_symbol(symbol),
        );

        if !analysis.primary_action.permits_entry() {
            tracing::debug!(symbol, action = analysis.primary_action.name(), "Hedge advisory blocks new entries");
            return Ok(None);
        }
        let Some(side) = signal.regime.direction() else {
            tracing::debug!(symbol, regime = %signal.regime, "No directional regime");
            return Ok(None);
        };

        let consensus = match call_with_timeout(timeout, self.advisor.momentum_consensus(symbol)).await {
            Ok(m) => Some(m.hive_consensus),
            Err(e) => {
                tracing::warn!(symbol, "Consensus unavailable: {}", e);
                None
            }
        };

        Ok(Some(SymbolSetup {
            side,
            prices,
            signal,
            analysis,
            consensus,
        }))
    }

    /// Build, check and route one strategy's candidate. Returns false once the
    /// circuit breaker stops further placements this cycle.
    async fn try_strategy(
        &mut self,
        symbol: &str,
        setup: &SymbolSetup,
        rank: &StrategyRank,
        capital_share: f64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let strategy_id = rank.meta.id.as_str();
        self.metrics.candidates_generated += 1;

        let account = self.account().await?;
        let candidate = self.build_candidate(symbol, setup, strategy_id, &account).await;
        let entry = setup.prices.last().copied();

        let precheck = CharterPrecheck::new(self.limits).evaluate(&candidate, entry);
        if !precheck.passed {
            self.metrics.charter_rejections += 1;
            tracing::info!(symbol, strategy_id, "Charter pre-check rejected: {}", precheck.reason());
            self.narrator.narrate(
                NarrationEvent::new(
                    EventKind::AutonomousCharterReject,
                    json!({
                        "strategy_id": strategy_id,
                        "reasons": precheck.reasons,
                        "notional": precheck.notional,
                        "risk_reward": precheck.risk_reward,
                        "expected_pnl": precheck.expected_pnl,
                    }),
                )
                .for_symbol(symbol),
            );
            return Ok(true);
        }

        let positions = self.book.active().await;
        let verdict = self.gate.evaluate_at(&candidate, &account, &positions, now);
        if !verdict.passed {
            self.metrics.gate_rejections += 1;
            tracing::info!(symbol, strategy_id, "Admission gate rejected: {}", verdict.reason());
            self.narrator.narrate(
                NarrationEvent::new(
                    EventKind::AutonomousGateReject,
                    json!({
                        "strategy_id": strategy_id,
                        "reason": verdict.reason(),
                        "results": verdict.results,
                    }),
                )
                .for_symbol(symbol),
            );
            return Ok(true);
        }
        self.narrator.narrate(
            NarrationEvent::new(
                EventKind::AutonomousGatePass,
                json!({
                    "strategy_id": strategy_id,
                    "units": candidate.units,
                    "broker": candidate.broker,
                    "capital_share": capital_share,
                }),
            )
            .for_symbol(symbol),
        );

        let check = self.breaker.lock().await.check(account.nav, now);
        if !check.can_trade {
            self.narrate_breaker(&check);
            return Ok(false);
        }

        match self.router.place_trade_at(&candidate, self.config.charter_pin, now).await {
            Ok(placed) => {
                self.metrics.trades_placed += 1;
                if placed.latency_breached {
                    self.metrics.latency_breaches += 1;
                }
                self.narrator.narrate(
                    NarrationEvent::new(
                        EventKind::AutonomousTradePlaced,
                        json!({
                            "strategy_id": strategy_id,
                            "order_id": placed.fill.order_id,
                            "side": candidate.side,
                            "units": placed.fill.units,
                            "fill_price": placed.fill.fill_price,
                            "latency_ms": placed.latency_ms,
                        }),
                    )
                    .for_symbol(symbol)
                    .on_venue(self.router.broker_name()),
                );
            }
            Err(e) => {
                self.metrics.trades_failed += 1;
                tracing::warn!(symbol, strategy_id, "Trade placement failed: {}", e);
                self.narrator.narrate(
                    NarrationEvent::new(
                        EventKind::AutonomousTradeFailed,
                        json!({ "strategy_id": strategy_id, "error": e.to_string() }),
                    )
                    .for_symbol(symbol)
                    .on_venue(self.router.broker_name()),
                );
            }
        }
        Ok(true)
    }

    /// Size from the leverage sizer, held to the Charter's venue leverage and scaled
    /// by the hedge multiplier. Brackets from the ATR proxy at the Charter's stop
    /// multiple and minimum risk/reward.
    async fn build_candidate(
        &self,
        symbol: &str,
        setup: &SymbolSetup,
        strategy_id: &str,
        account: &AccountSnapshot,
    ) -> TradeCandidate {
        let recommendation = self.sizer.recommend(
            symbol,
            setup.signal.confidence,
            &setup.prices,
            account.nav,
            self.book.active_count().await,
            MarketCondition::from_volatility_level(setup.analysis.volatility_level),
        );

        let mut position_size = recommendation.position_size;
        let mut leverage = recommendation.leverage;
        let (within_venue, venue_note) =
            validate_leverage_against_venue(recommendation.leverage, self.limits.venue_max_leverage);
        if !within_venue {
            leverage = self.limits.venue_max_leverage;
            position_size = position_size.min(recommendation.risk_amount * leverage);
            tracing::info!(symbol, position_size, "{}, size held to the venue limit", venue_note);
        }
        let units = position_size * setup.analysis.position_size_multiplier;

        let mut candidate = TradeCandidate::new(symbol, setup.side, units);
        candidate.broker = self.broker.broker_name().to_string();
        candidate.strategy_id = strategy_id.to_string();
        candidate.timeframe = self.config.timeframe.clone();
        candidate.consensus = setup.consensus;

        if let Some(entry) = setup.prices.last().copied() {
            let (stop_loss, take_profit) = bracket_prices(
                setup.side,
                entry,
                &setup.prices,
                self.limits.stop_atr_multiplier(symbol),
                self.limits.min_risk_reward,
            );
            candidate.limit_price = Some(entry);
            candidate = candidate.with_brackets(stop_loss, take_profit);
        }

        tracing::debug!(
            symbol,
            strategy_id,
            units,
            leverage,
            stop_loss = ?candidate.stop_loss,
            take_profit = ?candidate.take_profit,
            "Candidate built"
        );
        candidate
    }

    fn narrate_breaker(&self, check: &admission_gate::CircuitBreakerCheck) {
        tracing::warn!(
            daily_pnl_percent = check.daily_pnl_percent,
            trades_today = check.trades_today,
            "{}",
            check.reason
        );
        self.narrator.narrate(NarrationEvent::new(
            EventKind::CircuitBreaker,
            json!({
                "reason": check.reason,
                "daily_pnl_percent": check.daily_pnl_percent,
                "trades_today": check.trades_today,
                "breakers": check.breakers_triggered,
            }),
        ));
    }

    fn report_error(&mut self, symbol: Option<&str>, operation: &str, error: &anyhow::Error) {
        self.metrics.errors += 1;
        tracing::warn!(symbol = symbol.unwrap_or("-"), operation, "Control cycle step failed: {}", error);
        let mut event = NarrationEvent::new(
            EventKind::AutonomousError,
            json!({ "operation": operation, "error": error.to_string() }),
        );
        if let Some(symbol) = symbol {
            event = event.for_symbol(symbol);
        }
        self.narrator.narrate(event);
    }
}

/// Stop at `atr x stop_multiplier` from entry and target at `min_rr` times that distance
pub fn bracket_prices(side: Side, entry: f64, prices: &[f64], stop_multiplier: f64, min_rr: f64) -> (f64, f64) {
    let atr = diff_std(prices);
    let distance = if atr > 0.0 { atr * stop_multiplier } else { MIN_STOP_DISTANCE };
    let sign = side.sign();
    (entry - sign * distance, entry + sign * distance * (min_rr + RR_ROUNDING_MARGIN))
}
