use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trade_core::{AccountSnapshot, MomentumConsensus, OpenPosition, RegimeSignal, TradeCandidate};

// ---------------------------------------------------------------------------
// Order results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub fill_price: f64,
    pub units: f64,
    pub filled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Most recent `lookback` closes, oldest first
    async fn recent_prices(&self, symbol: &str, lookback: usize) -> Result<Vec<f64>>;

    /// Latest tradable price
    async fn current_price(&self, symbol: &str) -> Result<f64>;

    /// Most recent volumes, oldest first. Feeds without volume return an empty series.
    async fn recent_volumes(&self, _symbol: &str, _lookback: usize) -> Result<Vec<f64>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// NAV and margin state
    async fn account_snapshot(&self) -> Result<AccountSnapshot>;

    /// Positions as the broker sees them
    async fn open_positions(&self) -> Result<Vec<OpenPosition>>;

    /// Submit an entry with its attached brackets
    async fn place_order(&self, candidate: &TradeCandidate) -> Result<OrderFill>;

    /// Close an entire position
    async fn close_position(&self, symbol: &str) -> Result<()>;

    /// Partially close a position
    async fn reduce_position(&self, symbol: &str, units: f64) -> Result<()>;

    /// Replace the stop-loss / take-profit legs
    async fn modify_position(
        &self,
        symbol: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<()>;

    /// Whether this is a paper/simulated account
    fn is_paper(&self) -> bool;

    /// Broker name for logging
    fn broker_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Regime / advisory signals
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RegimeAdvisor: Send + Sync {
    async fn detect_regime(&self, prices: &[f64]) -> Result<RegimeSignal>;

    async fn momentum_consensus(&self, symbol: &str) -> Result<MomentumConsensus>;
}

// ---------------------------------------------------------------------------
// Narration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SystemStart,
    SystemStop,
    AutonomousHeartbeat,
    AutonomousInsufficientData,
    AutonomousError,
    HedgeSnapshot,
    CircuitBreaker,
    AutonomousCharterReject,
    AutonomousGateReject,
    AutonomousGatePass,
    AutonomousTradePlaced,
    AutonomousTradeFailed,
    TradeExecuted,
    TradeModified,
    TradeClosed,
    PositionReassess,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SystemStart => "SYSTEM_START",
            EventKind::SystemStop => "SYSTEM_STOP",
            EventKind::AutonomousHeartbeat => "AUTONOMOUS_HEARTBEAT",
            EventKind::AutonomousInsufficientData => "AUTONOMOUS_INSUFFICIENT_DATA",
            EventKind::AutonomousError => "AUTONOMOUS_ERROR",
            EventKind::HedgeSnapshot => "HEDGE_SNAPSHOT",
            EventKind::CircuitBreaker => "CIRCUIT_BREAKER",
            EventKind::AutonomousCharterReject => "AUTONOMOUS_CHARTER_REJECT",
            EventKind::AutonomousGateReject => "AUTONOMOUS_GATE_REJECT",
            EventKind::AutonomousGatePass => "AUTONOMOUS_GATE_PASS",
            EventKind::AutonomousTradePlaced => "AUTONOMOUS_TRADE_PLACED",
            EventKind::AutonomousTradeFailed => "AUTONOMOUS_TRADE_FAILED",
            EventKind::TradeExecuted => "TRADE_EXECUTED",
            EventKind::TradeModified => "TRADE_MODIFIED",
            EventKind::TradeClosed => "TRADE_CLOSED",
            EventKind::PositionReassess => "POSITION_REASSESS",
            EventKind::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub symbol: Option<String>,
    pub venue: Option<String>,
    pub details: serde_json::Value,
}

impl NarrationEvent {
    pub fn new(kind: EventKind, details: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            symbol: None,
            venue: None,
            details,
        }
    }

    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn on_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }
}

/// Append-only event sink. Emission never fails from the caller's point of view.
pub trait NarrationSink: Send + Sync {
    fn narrate(&self, event: NarrationEvent);
}
