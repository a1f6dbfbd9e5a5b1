use std::sync::Arc;
use std::time::{Duration, Instant};

use admission_gate::DailyCircuitBreaker;
use anyhow::Result;
use broker_trait::{BrokerConnector, EventKind, NarrationEvent, NarrationSink, OrderFill};
use charter::PolicyLimits;
use chrono::{DateTime, Utc};
use position_lifecycle::{call_with_timeout, PositionBook};
use serde_json::json;
use tokio::sync::Mutex;
use trade_core::{OpenPosition, TradeCandidate, TradeError};

/// Result of a routed order
#[derive(Debug, Clone)]
pub struct PlacedTrade {
    pub fill: OrderFill,
    pub position: OpenPosition,
    pub latency_ms: u64,
    pub latency_breached: bool,
}

/// Final hop between an admitted candidate and the broker.
///
/// Order of operations: PIN check, duplicate check, broker placement under a
/// timeout, registration with the position book, daily trade count.
pub struct OrderRouter {
    broker: Arc<dyn BrokerConnector>,
    book: PositionBook,
    breaker: Arc<Mutex<DailyCircuitBreaker>>,
    narrator: Arc<dyn NarrationSink>,
    limits: &'static PolicyLimits,
    timeout: Duration,
}

impl OrderRouter {
    pub fn new(
        broker: Arc<dyn BrokerConnector>,
        book: PositionBook,
        breaker: Arc<Mutex<DailyCircuitBreaker>>,
        narrator: Arc<dyn NarrationSink>,
        limits: &'static PolicyLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            broker,
            book,
            breaker,
            narrator,
            limits,
            timeout,
        }
    }

    pub fn broker_name(&self) -> &str {
        self.broker.broker_name()
    }

    /// Live brokers always need a valid PIN. Paper brokers check one when supplied.
    pub fn authorize(&self, pin: Option<u32>) -> Result<(), TradeError> {
        match pin {
            Some(code) if self.limits.validate_pin(code) => Ok(()),
            Some(_) => Err(TradeError::Unauthorized("invalid Charter PIN".to_string())),
            None if self.broker.is_paper() => Ok(()),
            None => Err(TradeError::Unauthorized(format!(
                "live broker {} requires a Charter PIN",
                self.broker.broker_name()
            ))),
        }
    }

    pub async fn place_trade(&self, candidate: &TradeCandidate, pin: Option<u32>) -> Result<PlacedTrade> {
        self.place_trade_at(candidate, pin, Utc::now()).await
    }

    /// `now` is the trading-day clock the daily trade count is booked against
    pub async fn place_trade_at(
        &self,
        candidate: &TradeCandidate,
        pin: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<PlacedTrade> {
        self.authorize(pin)?;

        if self.book.is_active(&candidate.symbol).await {
            return Err(TradeError::InvalidInput(format!("{} already has an active position", candidate.symbol)).into());
        }

        let started = Instant::now();
        let fill = call_with_timeout(self.timeout, self.broker.place_order(candidate)).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let latency_breached = latency_ms > self.limits.max_placement_latency_ms;
        if latency_breached {
            tracing::warn!(
                symbol = %candidate.symbol,
                latency_ms,
                max_ms = self.limits.max_placement_latency_ms,
                "Placement latency contract breached"
            );
        }

        let position = OpenPosition::from_fill(candidate, fill.fill_price, fill.units, fill.filled_at);
        self.book.register(position.clone()).await?;
        self.breaker.lock().await.record_trade(now);

        tracing::info!(
            symbol = %candidate.symbol,
            side = %candidate.side,
            units = fill.units,
            fill_price = fill.fill_price,
            order_id = %fill.order_id,
            latency_ms,
            "Trade placed"
        );

        self.narrator.narrate(
            NarrationEvent::new(
                EventKind::TradeExecuted,
                json!({
                    "order_id": fill.order_id,
                    "side": candidate.side,
                    "units": fill.units,
                    "fill_price": fill.fill_price,
                    "stop_loss": candidate.stop_loss,
                    "take_profit": candidate.take_profit,
                    "strategy_id": candidate.strategy_id,
                    "latency_ms": latency_ms,
                    "latency_breached": latency_breached,
                }),
            )
            .for_symbol(candidate.symbol.as_str())
            .on_venue(self.broker.broker_name()),
        );

        Ok(PlacedTrade {
            fill,
            position,
            latency_ms,
            latency_breached,
        })
    }
}
