//! In-memory paper collaborators so the agent can run end to end without a venue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use broker_trait::{BrokerConnector, OrderFill, PriceFeed};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trade_core::{is_crypto, AccountSnapshot, OpenPosition, TradeCandidate};

const HISTORY_CAPACITY: usize = 500;
const WARMUP_POINTS: usize = 200;

/// Per-step volatility of the paper walk. Wide enough that ATR brackets on the
/// default balance clear the Charter's expected-profit floor.
pub const DEFAULT_STEP_VOLATILITY: f64 = 0.002;

fn default_start_price(symbol: &str) -> f64 {
    let upper = symbol.to_ascii_uppercase();
    if is_crypto(&upper) {
        60_000.0
    } else if upper.contains("JPY") {
        150.0
    } else {
        1.10
    }
}

struct FeedState {
    rng: StdRng,
    series: HashMap<String, VecDeque<f64>>,
}

impl FeedState {
    fn step(&mut self, symbol: &str, step_volatility: f64) -> f64 {
        if !self.series.contains_key(symbol) {
            self.seed_symbol(symbol, default_start_price(symbol), step_volatility);
        }
        let shock: f64 = self.rng.gen_range(-1.0..1.0);
        let series = self.series.entry(symbol.to_string()).or_default();
        let last = series.back().copied().unwrap_or_else(|| default_start_price(symbol));
        let next = (last * (1.0 + step_volatility * shock)).max(f64::EPSILON);
        series.push_back(next);
        if series.len() > HISTORY_CAPACITY {
            series.pop_front();
        }
        next
    }

    fn seed_symbol(&mut self, symbol: &str, start: f64, step_volatility: f64) {
        let mut series = VecDeque::with_capacity(HISTORY_CAPACITY);
        let mut price = start;
        series.push_back(price);
        for _ in 1..WARMUP_POINTS {
            let shock: f64 = self.rng.gen_range(-1.0..1.0);
            price = (price * (1.0 + step_volatility * shock)).max(f64::EPSILON);
            series.push_back(price);
        }
        self.series.insert(symbol.to_string(), series);
    }
}

/// Seeded multiplicative random walk. `current_price` advances the walk by one
/// step; `recent_prices` reads history without moving it.
pub struct RandomWalkFeed {
    state: Mutex<FeedState>,
    step_volatility: f64,
}

impl RandomWalkFeed {
    pub fn new(seed: u64, step_volatility: f64) -> Self {
        Self {
            state: Mutex::new(FeedState {
                rng: StdRng::seed_from_u64(seed),
                series: HashMap::new(),
            }),
            step_volatility,
        }
    }

    /// Pre-seed `symbol` with warm-up history starting at `start_price`
    pub fn with_symbol(self, symbol: &str, start_price: f64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.seed_symbol(symbol, start_price, self.step_volatility);
        }
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FeedState>> {
        self.state.lock().map_err(|_| anyhow!("paper feed state poisoned"))
    }
}

#[async_trait]
impl PriceFeed for RandomWalkFeed {
    async fn recent_prices(&self, symbol: &str, lookback: usize) -> Result<Vec<f64>> {
        let mut state = self.lock()?;
        if !state.series.contains_key(symbol) {
            state.seed_symbol(symbol, default_start_price(symbol), self.step_volatility);
        }
        let series = state
            .series
            .get(symbol)
            .ok_or_else(|| anyhow!("no paper history for {symbol}"))?;
        let start = series.len().saturating_sub(lookback);
        Ok(series.iter().skip(start).copied().collect())
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        let mut state = self.lock()?;
        Ok(state.step(symbol, self.step_volatility))
    }

    async fn recent_volumes(&self, _symbol: &str, lookback: usize) -> Result<Vec<f64>> {
        let mut state = self.lock()?;
        Ok((0..lookback).map(|_| state.rng.gen_range(800.0..1200.0)).collect())
    }
}

struct PaperState {
    balance: f64,
    positions: HashMap<String, OpenPosition>,
    next_order_id: u64,
}

/// In-memory broker that fills market orders at the feed's current price
pub struct PaperBroker {
    name: String,
    feed: Arc<dyn PriceFeed>,
    /// Margin posted per unit of notional
    margin_rate: f64,
    state: tokio::sync::Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(name: impl Into<String>, feed: Arc<dyn PriceFeed>, starting_balance: f64) -> Self {
        Self {
            name: name.into(),
            feed,
            margin_rate: 0.05,
            state: tokio::sync::Mutex::new(PaperState {
                balance: starting_balance,
                positions: HashMap::new(),
                next_order_id: 1,
            }),
        }
    }

    /// Cash balance including realized PnL
    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    async fn realize(&self, symbol: &str, units: Option<f64>) -> Result<f64> {
        let price = self.feed.current_price(symbol).await?;
        let mut state = self.state.lock().await;
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| anyhow!("{} has no open paper position", symbol))?;

        let closing = units.unwrap_or(position.units).min(position.units);
        if closing <= 0.0 {
            bail!("Cannot reduce {} by {} units", symbol, closing);
        }
        let pnl = (price - position.entry_price) * closing * position.side.sign();
        position.units -= closing;
        if position.units <= 0.0 {
            state.positions.remove(symbol);
        }
        state.balance += pnl;
        tracing::debug!(symbol, closing, price, pnl, "Paper position realized");
        Ok(pnl)
    }
}

#[async_trait]
impl BrokerConnector for PaperBroker {
    async fn account_snapshot(&self) -> Result<AccountSnapshot> {
        let (balance, positions) = {
            let state = self.state.lock().await;
            (state.balance, state.positions.values().cloned().collect::<Vec<_>>())
        };

        let mut unrealized = 0.0;
        let mut margin_used = 0.0;
        for position in &positions {
            let latest = self.feed.recent_prices(&position.symbol, 1).await?;
            let price = latest.last().copied().unwrap_or(position.entry_price);
            unrealized += position.pnl_at(price);
            margin_used += (position.units * price).abs() * self.margin_rate;
        }

        let nav = balance + unrealized;
        Ok(AccountSnapshot {
            nav,
            margin_used,
            margin_available: (nav - margin_used).max(0.0),
            currency: "USD".to_string(),
        })
    }

    async fn open_positions(&self) -> Result<Vec<OpenPosition>> {
        Ok(self.state.lock().await.positions.values().cloned().collect())
    }

    async fn place_order(&self, candidate: &TradeCandidate) -> Result<OrderFill> {
        if candidate.units <= 0.0 {
            bail!("Order size must be positive, got {}", candidate.units);
        }
        let fill_price = self.feed.current_price(&candidate.symbol).await?;
        let filled_at = Utc::now();

        let mut state = self.state.lock().await;
        if state.positions.contains_key(&candidate.symbol) {
            bail!("{} already has an open paper position", candidate.symbol);
        }
        let order_id = format!("PAPER-{:06}", state.next_order_id);
        state.next_order_id += 1;
        state.positions.insert(
            candidate.symbol.clone(),
            OpenPosition::from_fill(candidate, fill_price, candidate.units, filled_at),
        );

        tracing::info!(
            symbol = %candidate.symbol,
            side = %candidate.side,
            units = candidate.units,
            fill_price,
            order_id = %order_id,
            "Paper order filled"
        );

        Ok(OrderFill {
            order_id,
            fill_price,
            units: candidate.units,
            filled_at,
        })
    }

    async fn close_position(&self, symbol: &str) -> Result<()> {
        self.realize(symbol, None).await.map(|_| ())
    }

    async fn reduce_position(&self, symbol: &str, units: f64) -> Result<()> {
        self.realize(symbol, Some(units)).await.map(|_| ())
    }

    async fn modify_position(&self, symbol: &str, stop_loss: Option<f64>, take_profit: Option<f64>) -> Result<()> {
        let mut state = self.state.lock().await;
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| anyhow!("{} has no open paper position", symbol))?;
        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        Ok(())
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trade_core::Side;

    #[tokio::test]
    async fn test_feed_is_deterministic_per_seed() {
        let a = RandomWalkFeed::new(7, 0.001).with_symbol("EUR_USD", 1.10);
        let b = RandomWalkFeed::new(7, 0.001).with_symbol("EUR_USD", 1.10);

        let history_a = a.recent_prices("EUR_USD", 50).await.unwrap();
        let history_b = b.recent_prices("EUR_USD", 50).await.unwrap();
        assert_eq!(history_a.len(), 50);
        assert_eq!(history_a, history_b);

        let next = a.current_price("EUR_USD").await.unwrap();
        assert_eq!(next, b.current_price("EUR_USD").await.unwrap());
        assert_eq!(*a.recent_prices("EUR_USD", 1).await.unwrap().last().unwrap(), next);
    }

    #[tokio::test]
    async fn test_feed_seeds_unknown_symbols() {
        let feed = RandomWalkFeed::new(1, 0.001);
        let prices = feed.recent_prices("USD_JPY", 20).await.unwrap();
        assert_eq!(prices.len(), 20);
        assert!(prices.iter().all(|p| *p > 100.0));
    }

    #[tokio::test]
    async fn test_paper_round_trip() {
        let feed: Arc<dyn PriceFeed> = Arc::new(RandomWalkFeed::new(3, 0.0005).with_symbol("EUR_USD", 1.10));
        let broker = PaperBroker::new("paper", feed, 100_000.0);

        let candidate = TradeCandidate::new("EUR_USD", Side::Buy, 20_000.0).with_brackets(1.09, 1.14);
        let fill = broker.place_order(&candidate).await.unwrap();
        assert_eq!(fill.order_id, "PAPER-000001");
        assert!(broker.place_order(&candidate).await.is_err());

        let account = broker.account_snapshot().await.unwrap();
        assert!(account.margin_used > 0.0);
        assert!(account.margin_utilization().unwrap() < 0.35);

        broker.modify_position("EUR_USD", Some(1.1002), Some(1.15)).await.unwrap();
        let positions = broker.open_positions().await.unwrap();
        assert_eq!(positions[0].stop_loss, Some(1.1002));

        broker.reduce_position("EUR_USD", 5_000.0).await.unwrap();
        assert_eq!(broker.open_positions().await.unwrap()[0].units, 15_000.0);

        broker.close_position("EUR_USD").await.unwrap();
        assert!(broker.open_positions().await.unwrap().is_empty());
        assert!(broker.close_position("EUR_USD").await.is_err());
        assert_ne!(broker.balance().await, 100_000.0);
    }
}
