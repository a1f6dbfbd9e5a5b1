use std::sync::Arc;

use anyhow::Result;
use broker_trait::{BrokerConnector, EventKind, NarrationEvent, NarrationSink, PriceFeed, RegimeAdvisor};
use charter::PolicyLimits;
use chrono::{DateTime, Utc};
use hedge_advisor::{HedgeAdvisor, HedgeInputs};
use serde_json::json;
use tokio::sync::watch;
use tokio::time;
use trade_core::{AccountSnapshot, OpenPosition};

use crate::book::PositionBook;
use crate::collaborator::call_with_timeout;
use crate::config::LifecycleConfig;
use crate::engine::{evaluate_position, MarketContext, PositionAction, PositionUpdate};

/// Periodic reassessment of every open position.
///
/// Decisions are made under the book lock; broker calls happen outside it and a
/// close only becomes `Closed` once the broker confirms.
pub struct LifecycleManager {
    book: PositionBook,
    broker: Arc<dyn BrokerConnector>,
    feed: Arc<dyn PriceFeed>,
    advisor: Arc<dyn RegimeAdvisor>,
    narrator: Arc<dyn NarrationSink>,
    hedge: HedgeAdvisor,
    limits: &'static PolicyLimits,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        book: PositionBook,
        broker: Arc<dyn BrokerConnector>,
        feed: Arc<dyn PriceFeed>,
        advisor: Arc<dyn RegimeAdvisor>,
        narrator: Arc<dyn NarrationSink>,
        limits: &'static PolicyLimits,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            book,
            broker,
            feed,
            advisor,
            narrator,
            hedge: HedgeAdvisor::new(),
            limits,
            config,
        }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Run until `shutdown` flips to true. A cycle already in progress always finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.reassess_interval);
        tracing::info!(
            interval_secs = self.config.reassess_interval.as_secs(),
            "Position reassessment loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let updates = self.reassess_all().await;
                    if !updates.is_empty() {
                        tracing::debug!("Reassessed {} positions", updates.len());
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Position reassessment loop stopped");
    }

    pub async fn reassess_all(&self) -> Vec<PositionUpdate> {
        self.reassess_all_at(Utc::now()).await
    }

    pub async fn reassess_all_at(&self, now: DateTime<Utc>) -> Vec<PositionUpdate> {
        let symbols = self.book.active_symbols().await;
        if symbols.is_empty() {
            return Vec::new();
        }

        let account = match call_with_timeout(self.config.collaborator_timeout, self.broker.account_snapshot()).await {
            Ok(account) => Some(account),
            Err(e) => {
                tracing::warn!("Account snapshot unavailable for reassessment: {}", e);
                None
            }
        };

        let mut updates = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let market = match self.market_context(&symbol, account.as_ref()).await {
                Ok(market) => market,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, "Skipping reassessment: {}", e);
                    continue;
                }
            };

            let evaluated = self
                .book
                .update_with(&symbol, |position| {
                    position.is_active().then(|| {
                        let before = position.clone();
                        let update = evaluate_position(position, &market, &self.config, self.limits, now);
                        (before, update)
                    })
                })
                .await;

            match evaluated {
                Ok(Some((before, update))) => {
                    if !self.apply(&update).await {
                        self.roll_back(&symbol, &before).await;
                    }
                    self.book.record(update.clone()).await;
                    updates.push(update);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(symbol = %symbol, "Position vanished during reassessment: {}", e),
            }
        }
        updates
    }

    async fn market_context(&self, symbol: &str, account: Option<&AccountSnapshot>) -> Result<MarketContext> {
        let timeout = self.config.collaborator_timeout;
        let price = call_with_timeout(timeout, self.feed.current_price(symbol)).await?;
        let prices = call_with_timeout(timeout, self.feed.recent_prices(symbol, self.config.price_lookback)).await?;
        let signal = call_with_timeout(timeout, self.advisor.detect_regime(&prices)).await?;
        let momentum = call_with_timeout(timeout, self.advisor.momentum_consensus(symbol)).await?;
        let volumes = call_with_timeout(timeout, self.feed.recent_volumes(symbol, self.config.price_lookback))
            .await
            .unwrap_or_default();

        let analysis = self.hedge.analyze(&HedgeInputs {
            prices,
            volumes,
            nav: account.map_or(0.0, |a| a.nav),
            margin_used: account.map_or(0.0, |a| a.margin_used),
            open_positions: self.book.active_count().await,
            correlations: Vec::new(),
            regime: signal.regime,
        });

        Ok(MarketContext {
            price,
            regime: signal.regime,
            momentum,
            advisory: Some(analysis.primary_action),
        })
    }

    /// Carry the decision out at the broker and narrate it. Returns false when the
    /// broker rejected a close or a bracket change, leaving the book ahead of it.
    async fn apply(&self, update: &PositionUpdate) -> bool {
        let symbol = update.symbol.as_str();
        let venue = self.broker.broker_name().to_string();

        self.narrator.narrate(
            NarrationEvent::new(
                EventKind::PositionReassess,
                json!({
                    "price": update.current_price,
                    "pnl": update.pnl,
                    "r_multiple": update.r_multiple,
                    "regime": update.regime,
                    "action": update.action,
                    "reason": update.reason,
                }),
            )
            .for_symbol(symbol)
            .on_venue(&venue),
        );

        if update.action.closes_position() {
            return self.close(update, &venue).await;
        }

        let mut synced = true;
        if update.brackets_changed() {
            match call_with_timeout(
                self.config.collaborator_timeout,
                self.broker.modify_position(symbol, update.new_stop_loss, update.new_take_profit),
            )
            .await
            {
                Ok(()) => self.narrate_modified(update, &venue),
                Err(e) => {
                    synced = false;
                    self.narrate_failure(symbol, &venue, "modify_position", &e);
                }
            }
        } else if matches!(
            update.action,
            PositionAction::TrailStop | PositionAction::ApplyHedge | PositionAction::EvaluateExit
        ) {
            self.narrate_modified(update, &venue);
        }

        if let (PositionAction::Reduce, Some(units)) = (update.action, update.reduce_units) {
            match call_with_timeout(self.config.collaborator_timeout, self.broker.reduce_position(symbol, units)).await {
                Ok(()) => {
                    let applied = self
                        .book
                        .update_with(symbol, |p| {
                            p.units -= units;
                            p.scaled_out = true;
                        })
                        .await;
                    if let Err(e) = applied {
                        tracing::warn!(symbol, "Reduced at broker but book update failed: {}", e);
                    }
                    self.narrate_modified(update, &venue);
                }
                Err(e) => self.narrate_failure(symbol, &venue, "reduce_position", &e),
            }
        }
        synced
    }

    async fn close(&self, update: &PositionUpdate, venue: &str) -> bool {
        let symbol = update.symbol.as_str();
        match call_with_timeout(self.config.collaborator_timeout, self.broker.close_position(symbol)).await {
            Ok(()) => {
                if let Err(e) = self.book.mark_closed(symbol).await {
                    tracing::warn!(symbol, "Closed at broker but book update failed: {}", e);
                }
                tracing::info!(symbol, pnl = update.pnl, reason = %update.reason, "Position closed: {}", update.action);
                self.narrator.narrate(
                    NarrationEvent::new(
                        EventKind::TradeClosed,
                        json!({
                            "pnl": update.pnl,
                            "price": update.current_price,
                            "action": update.action,
                            "reason": update.reason,
                        }),
                    )
                    .for_symbol(symbol)
                    .on_venue(venue),
                );
                true
            }
            Err(e) => {
                self.narrate_failure(symbol, venue, "close_position", &e);
                false
            }
        }
    }

    /// Restore the broker-facing state of a position to what it was before the
    /// evaluation, so the next pass decides and sends the change again.
    /// Price, PnL and peak R keep their refreshed values.
    async fn roll_back(&self, symbol: &str, before: &OpenPosition) {
        let restored = self
            .book
            .update_with(symbol, |p| {
                p.stop_loss = before.stop_loss;
                p.take_profit = before.take_profit;
                p.breakeven_applied = before.breakeven_applied;
                p.trailing_stop_distance = before.trailing_stop_distance;
                p.tp_extensions = before.tp_extensions;
                p.status = before.status;
            })
            .await;
        match restored {
            Ok(()) => tracing::info!(symbol, stop_loss = ?before.stop_loss, "Book rolled back after broker rejection"),
            Err(e) => tracing::warn!(symbol, "Broker rejected the change and book rollback failed: {}", e),
        }
    }

    fn narrate_modified(&self, update: &PositionUpdate, venue: &str) {
        self.narrator.narrate(
            NarrationEvent::new(
                EventKind::TradeModified,
                json!({
                    "action": update.action,
                    "adjustments": update.adjustments,
                    "reason": update.reason,
                    "stop_loss": update.new_stop_loss,
                    "take_profit": update.new_take_profit,
                    "reduce_units": update.reduce_units,
                    "regime": update.regime,
                }),
            )
            .for_symbol(update.symbol.as_str())
            .on_venue(venue),
        );
    }

    fn narrate_failure(&self, symbol: &str, venue: &str, operation: &str, error: &anyhow::Error) {
        tracing::error!(symbol, operation, "Broker call failed: {}", error);
        self.narrator.narrate(
            NarrationEvent::new(
                EventKind::Error,
                json!({ "operation": operation, "error": error.to_string() }),
            )
            .for_symbol(symbol)
            .on_venue(venue),
        );
    }
}
