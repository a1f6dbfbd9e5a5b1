use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trade_core::stats::{population_std, round_to, simple_returns};
use trade_core::VolatilityLevel;

/// Volatility used when the price history is shorter than the lookback
pub const DEFAULT_VOLATILITY: f64 = 0.02;
pub const MIN_VOLATILITY: f64 = 0.01;
pub const MAX_VOLATILITY: f64 = 0.5;

/// Descending confidence thresholds and their leverage multipliers
const CONFIDENCE_TABLE: [(f64, f64); 5] = [(0.95, 1.5), (0.85, 1.2), (0.75, 1.0), (0.65, 0.7), (0.55, 0.4)];
const CONFIDENCE_FLOOR_MULTIPLIER: f64 = 0.2;

/// Market backdrop used to scale leverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCondition {
    Calm,
    Normal,
    Volatile,
    Extreme,
}

impl MarketCondition {
    pub fn multiplier(&self) -> f64 {
        match self {
            MarketCondition::Calm => 1.3,
            MarketCondition::Normal => 1.0,
            MarketCondition::Volatile => 0.7,
            MarketCondition::Extreme => 0.4,
        }
    }

    pub fn from_volatility_level(level: VolatilityLevel) -> Self {
        match level {
            VolatilityLevel::Low => MarketCondition::Calm,
            VolatilityLevel::Moderate => MarketCondition::Normal,
            VolatilityLevel::High => MarketCondition::Volatile,
            VolatilityLevel::Extreme => MarketCondition::Extreme,
        }
    }
}

/// Volatility-aware leverage and size calculator
///
/// leverage = (1 / vol) x confidence x market x position-penalty x vol-adjustment,
/// clamped to [1, max_leverage]. Size is `risk_amount x leverage`, capped at
/// `max_position_fraction x balance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageSizer {
    /// Hard leverage ceiling
    pub max_leverage: f64,

    /// Fraction of balance put at risk per trade (0.002 = 0.2%)
    pub base_risk: f64,

    /// Largest position as a fraction of balance (0.15 = 15%)
    pub max_position_fraction: f64,

    /// Number of prices used for the volatility estimate
    pub lookback: usize,

    /// Annualization factor applied to the return std-dev
    pub annualization: f64,
}

/// Sizing output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeverageRecommendation {
    pub symbol: String,
    pub leverage: f64,
    pub position_size: f64,
    pub risk_amount: f64,
    pub risk_percent: f64,
    pub volatility_percent: f64,
    pub confidence_percent: f64,
    pub market_condition: MarketCondition,
    pub timestamp: DateTime<Utc>,
}

impl Default for LeverageSizer {
    fn default() -> Self {
        Self {
            max_leverage: 25.0,
            base_risk: 0.002,
            max_position_fraction: 0.15,
            lookback: 14,
            annualization: 24f64.sqrt(),
        }
    }
}

impl LeverageSizer {
    pub fn new(max_leverage: f64, base_risk: f64, max_position_fraction: f64) -> Result<Self> {
        if max_leverage < 1.0 {
            bail!("max_leverage must be >= 1");
        }
        if base_risk <= 0.0 || base_risk > 0.1 {
            bail!("base_risk must be between 0 and 0.1");
        }
        if max_position_fraction <= 0.0 || max_position_fraction > 1.0 {
            bail!("max_position_fraction must be between 0 and 1");
        }
        if max_position_fraction < base_risk {
            bail!("max_position_fraction must be >= base_risk");
        }

        Ok(Self {
            max_leverage,
            base_risk,
            max_position_fraction,
            ..Self::default()
        })
    }

    /// Lower ceiling and smaller positions
    pub fn conservative() -> Self {
        Self {
            max_leverage: 10.0,
            base_risk: 0.001,
            max_position_fraction: 0.10,
            ..Self::default()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            max_leverage: 50.0,
            base_risk: 0.005,
            max_position_fraction: 0.25,
            ..Self::default()
        }
    }

    /// Std-dev of simple returns over the last `lookback` prices, annualized and clamped
    pub fn volatility(&self, prices: &[f64]) -> f64 {
        if prices.len() < self.lookback || self.lookback < 2 {
            return DEFAULT_VOLATILITY;
        }
        let window = &prices[prices.len() - self.lookback..];
        let returns = simple_returns(window);
        if returns.is_empty() {
            return DEFAULT_VOLATILITY;
        }
        (population_std(&returns) * self.annualization).clamp(MIN_VOLATILITY, MAX_VOLATILITY)
    }

    pub fn confidence_multiplier(confidence: f64) -> f64 {
        CONFIDENCE_TABLE
            .iter()
            .find(|(threshold, _)| confidence >= *threshold)
            .map(|(_, multiplier)| *multiplier)
            .unwrap_or(CONFIDENCE_FLOOR_MULTIPLIER)
    }

    pub fn position_penalty(open_positions: usize) -> f64 {
        (1.0 - 0.15 * open_positions as f64).max(0.3)
    }

    pub fn volatility_adjustment(volatility: f64) -> f64 {
        (1.0 - volatility * 10.0).max(0.2)
    }

    pub fn recommend(
        &self,
        symbol: &str,
        confidence: f64,
        prices: &[f64],
        balance: f64,
        open_positions: usize,
        market_condition: MarketCondition,
    ) -> LeverageRecommendation {
        self.recommend_at(symbol, confidence, prices, balance, open_positions, market_condition, Utc::now())
    }

    /// Deterministic variant: identical arguments always produce an identical recommendation
    #[allow(clippy::too_many_arguments)]
    pub fn recommend_at(
        &self,
        symbol: &str,
        confidence: f64,
        prices: &[f64],
        balance: f64,
        open_positions: usize,
        market_condition: MarketCondition,
        timestamp: DateTime<Utc>,
    ) -> LeverageRecommendation {
        let volatility = self.volatility(prices);

        let raw_leverage = (1.0 / volatility)
            * Self::confidence_multiplier(confidence)
            * market_condition.multiplier()
            * Self::position_penalty(open_positions)
            * Self::volatility_adjustment(volatility);
        let mut leverage = raw_leverage.clamp(1.0, self.max_leverage);

        let balance = balance.max(0.0);
        let risk_amount = balance * self.base_risk;
        let mut position_size = risk_amount * leverage;

        let cap = balance * self.max_position_fraction;
        if position_size > cap {
            position_size = cap;
            leverage = (position_size / risk_amount.max(1e-8)).clamp(1.0, self.max_leverage);
        }

        tracing::debug!(
            symbol,
            volatility,
            raw_leverage,
            leverage,
            position_size,
            "Leverage recommendation"
        );

        LeverageRecommendation {
            symbol: symbol.to_string(),
            leverage: round_to(leverage, 2),
            // Floor so rounding never lifts the size over the cap
            position_size: (position_size * 100.0).floor() / 100.0,
            risk_amount: round_to(risk_amount, 2),
            risk_percent: round_to(self.base_risk * 100.0, 4),
            volatility_percent: round_to(volatility * 100.0, 2),
            confidence_percent: round_to(confidence * 100.0, 1),
            market_condition,
            timestamp,
        }
    }
}

/// Check a leverage figure against the venue's hard limit
pub fn validate_leverage_against_venue(leverage: f64, venue_max: f64) -> (bool, String) {
    if leverage <= venue_max {
        (true, format!("Leverage {:.2}x within venue limit {:.0}x", leverage, venue_max))
    } else {
        (
            false,
            format!("Leverage {:.2}x exceeds venue limit {:.0}x", leverage, venue_max),
        )
    }
}
