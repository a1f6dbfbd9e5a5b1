use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1.0 for longs, -1.0 for shorts. Multiply a raw price move by this to get the favorable move.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified market state, supplied by the regime collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
    Crash,
    Undetermined,
}

impl Regime {
    pub fn name(&self) -> &'static str {
        match self {
            Regime::Bull => "bull",
            Regime::Bear => "bear",
            Regime::Sideways => "sideways",
            Regime::Crash => "crash",
            Regime::Undetermined => "undetermined",
        }
    }

    /// Directional bias of the regime, if it has one
    pub fn direction(&self) -> Option<Side> {
        match self {
            Regime::Bull => Some(Side::Buy),
            Regime::Bear => Some(Side::Sell),
            _ => None,
        }
    }

    /// True when the regime points the same way as `side`
    pub fn favors(&self, side: Side) -> bool {
        self.direction() == Some(side)
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Volatility tier shared by the advisory and sizing layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    Low,
    Moderate,
    High,
    Extreme,
}

impl VolatilityLevel {
    pub fn name(&self) -> &'static str {
        match self {
            VolatilityLevel::Low => "low",
            VolatilityLevel::Moderate => "moderate",
            VolatilityLevel::High => "high",
            VolatilityLevel::Extreme => "extreme",
        }
    }
}

/// Regime detection output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSignal {
    pub regime: Regime,
    pub confidence: f64,
    pub volatility: f64,
}

impl RegimeSignal {
    pub fn undetermined() -> Self {
        Self {
            regime: Regime::Undetermined,
            confidence: 0.0,
            volatility: 0.0,
        }
    }
}

/// Momentum and advisory consensus for a single symbol (both 0.0 - 1.0)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MomentumConsensus {
    pub momentum_score: f64,
    pub hive_consensus: f64,
}

// ---------------------------------------------------------------------------
// Candidate / account / position
// ---------------------------------------------------------------------------

/// A proposed trade, consumed once by the gating pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub symbol: String,
    pub side: Side,
    pub units: f64,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    pub broker: String,
    pub strategy_id: String,
    pub timeframe: String,
    /// Advisory consensus confidence attached by the caller (used by asset-class gates)
    #[serde(default)]
    pub consensus: Option<f64>,
}

impl TradeCandidate {
    pub fn new(symbol: impl Into<String>, side: Side, units: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            units,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            broker: String::new(),
            strategy_id: String::new(),
            timeframe: "M15".to_string(),
            consensus: None,
        }
    }

    pub fn with_brackets(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn notional(&self, price: f64) -> f64 {
        (self.units * price).abs()
    }

    /// Risk/reward against `entry`, None when brackets are missing or inverted
    pub fn risk_reward(&self, entry: f64) -> Option<f64> {
        risk_reward(self.side, entry, self.stop_loss?, self.take_profit?)
    }
}

/// Direction-adjusted (target - entry) / (entry - stop).
/// Returns None when either leg is on the wrong side of the entry.
pub fn risk_reward(side: Side, entry: f64, stop_loss: f64, take_profit: f64) -> Option<f64> {
    let risk = (entry - stop_loss) * side.sign();
    let reward = (take_profit - entry) * side.sign();
    if risk <= 0.0 || reward <= 0.0 {
        return None;
    }
    Some(reward / risk)
}

/// Broker account state, read-only to the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub nav: f64,
    pub margin_used: f64,
    pub margin_available: f64,
    pub currency: String,
}

impl AccountSnapshot {
    /// margin_used / nav, None when nav is zero or negative
    pub fn margin_utilization(&self) -> Option<f64> {
        if self.nav <= 0.0 {
            None
        } else {
            Some(self.margin_used / self.nav)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Modified,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: Side,
    pub units: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Stop at registration time; fixes the 1R distance for the life of the position
    pub initial_stop_loss: Option<f64>,
    pub status: PositionStatus,
    pub trailing_stop_distance: Option<f64>,
    pub breakeven_applied: bool,
    pub peak_r_multiple: f64,
    pub hedge_active: bool,
    /// Set once a partial close has been confirmed by the broker
    #[serde(default)]
    pub scaled_out: bool,
    #[serde(default)]
    pub tp_extensions: u32,
    #[serde(default)]
    pub strategy_id: String,
}

impl OpenPosition {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        units: f64,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            units,
            entry_price,
            entry_time,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            stop_loss: None,
            take_profit: None,
            initial_stop_loss: None,
            status: PositionStatus::Open,
            trailing_stop_distance: None,
            breakeven_applied: false,
            peak_r_multiple: 0.0,
            hedge_active: false,
            scaled_out: false,
            tp_extensions: 0,
            strategy_id: String::new(),
        }
    }

    pub fn with_brackets(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.initial_stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    /// Build the position a filled candidate opens
    pub fn from_fill(candidate: &TradeCandidate, fill_price: f64, units: f64, at: DateTime<Utc>) -> Self {
        let mut position = Self::new(candidate.symbol.clone(), candidate.side, units, fill_price, at)
            .with_brackets(candidate.stop_loss, candidate.take_profit);
        position.strategy_id = candidate.strategy_id.clone();
        position
    }

    pub fn is_active(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    pub fn notional(&self) -> f64 {
        (self.entry_price * self.units).abs()
    }

    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.units * self.side.sign()
    }

    /// |entry - initial stop|, None without a usable stop
    pub fn initial_risk_distance(&self) -> Option<f64> {
        let distance = (self.entry_price - self.initial_stop_loss?).abs();
        (distance > 0.0).then_some(distance)
    }

    pub fn initial_risk_amount(&self) -> Option<f64> {
        self.initial_risk_distance().map(|d| d * self.units.abs())
    }

    /// Signed favorable move from entry expressed in initial-risk units
    pub fn r_multiple(&self) -> Option<f64> {
        let risk = self.initial_risk_distance()?;
        Some((self.current_price - self.entry_price) * self.side.sign() / risk)
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.entry_time).num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        self.age_hours(now) * 60.0
    }
}
