use serde::{Deserialize, Serialize};
use trade_core::stats::{linear_slope, mean, population_std, simple_returns};
use trade_core::VolatilityLevel;

pub const VOLATILITY_WEIGHT: f64 = 0.30;
pub const TREND_WEIGHT: f64 = 0.25;
pub const CORRELATION_WEIGHT: f64 = 0.20;
pub const VOLUME_WEIGHT: f64 = 0.15;
pub const MARGIN_WEIGHT: f64 = 0.10;

const LOW_VOLATILITY: f64 = 0.015;
const MODERATE_VOLATILITY: f64 = 0.030;
const HIGH_VOLATILITY: f64 = 0.050;

const STRONG_TREND: f64 = 0.05;
const MODERATE_TREND: f64 = 0.02;
const WEAK_TREND: f64 = 0.005;

const HIGH_CORRELATION: f64 = 0.8;

const VOLUME_MIN_SAMPLES: usize = 20;
const VOLUME_SHORT_WINDOW: usize = 5;

const MARGIN_CEILING: f64 = 0.35;
const MARGIN_WARNING: f64 = 0.28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Green,
    Yellow,
    Red,
}

/// One scored market condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeCondition {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    /// 0.0 (benign) to 1.0 (dangerous)
    pub score: f64,
    pub weight: f64,
    pub recommendation: String,
    pub details: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Volatility
// ---------------------------------------------------------------------------

/// Annualized std-dev of simple returns (252 periods)
pub fn annualized_volatility(prices: &[f64]) -> f64 {
    let returns = simple_returns(prices);
    population_std(&returns) * 252f64.sqrt()
}

pub fn classify_volatility(volatility: f64) -> VolatilityLevel {
    if volatility < LOW_VOLATILITY {
        VolatilityLevel::Low
    } else if volatility < MODERATE_VOLATILITY {
        VolatilityLevel::Moderate
    } else if volatility < HIGH_VOLATILITY {
        VolatilityLevel::High
    } else {
        VolatilityLevel::Extreme
    }
}

pub fn volatility_condition(volatility: f64, level: VolatilityLevel) -> HedgeCondition {
    let (severity, score, threshold, recommendation) = match level {
        VolatilityLevel::Low => (Severity::Green, 0.1, LOW_VOLATILITY, "Low volatility, full sizing permitted"),
        VolatilityLevel::Moderate => (
            Severity::Green,
            0.3,
            MODERATE_VOLATILITY,
            "Moderate volatility, standard sizing",
        ),
        VolatilityLevel::High => (
            Severity::Yellow,
            0.6,
            HIGH_VOLATILITY,
            "High volatility, reduce size and widen stops",
        ),
        VolatilityLevel::Extreme => (
            Severity::Red,
            0.9,
            HIGH_VOLATILITY,
            "Extreme volatility, avoid new entries",
        ),
    };

    HedgeCondition {
        name: "Volatility".to_string(),
        value: volatility,
        threshold,
        severity,
        score,
        weight: VOLATILITY_WEIGHT,
        recommendation: recommendation.to_string(),
        details: serde_json::json!({ "level": level.name() }),
    }
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

/// Regression slope normalized by mean price
pub fn normalized_trend(prices: &[f64]) -> f64 {
    let avg = mean(prices);
    if prices.len() < 2 || avg == 0.0 {
        return 0.0;
    }
    linear_slope(prices) / avg
}

pub fn trend_condition(trend: f64) -> HedgeCondition {
    let strength = trend.abs();
    let (label, severity, score, recommendation) = if strength > STRONG_TREND {
        ("strong", Severity::Green, 0.1, "Strong trend, follow direction")
    } else if strength > MODERATE_TREND {
        ("moderate", Severity::Green, 0.3, "Moderate trend, standard sizing")
    } else if strength > WEAK_TREND {
        ("weak", Severity::Yellow, 0.7, "Weak trend, reduce size")
    } else {
        ("sideways", Severity::Yellow, 0.7, "No clear trend, wait for direction")
    };

    HedgeCondition {
        name: "Trend Strength".to_string(),
        value: trend,
        threshold: MODERATE_TREND,
        severity,
        score,
        weight: TREND_WEIGHT,
        recommendation: recommendation.to_string(),
        details: serde_json::json!({ "trend": label }),
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// `correlations` holds the pairwise values between held instruments
pub fn correlation_condition(correlations: &[f64]) -> HedgeCondition {
    let high_pairs = correlations.iter().filter(|c| c.abs() > HIGH_CORRELATION).count();
    let abs_values: Vec<f64> = correlations.iter().map(|c| c.abs()).collect();
    let value = mean(&abs_values);

    let (severity, recommendation) = if correlations.is_empty() {
        (Severity::Green, "No correlation risk detected")
    } else if high_pairs > 2 {
        (Severity::Red, "Positions highly correlated, reduce size or hedge")
    } else if high_pairs > 0 {
        (Severity::Yellow, "Some correlation, monitor concentration")
    } else {
        (Severity::Green, "Low correlation, good diversification")
    };

    HedgeCondition {
        name: "Correlation".to_string(),
        value,
        threshold: 0.5,
        severity,
        score: (high_pairs as f64 * 0.3).min(1.0),
        weight: CORRELATION_WEIGHT,
        recommendation: recommendation.to_string(),
        details: serde_json::json!({ "high_correlation_pairs": high_pairs }),
    }
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

pub fn volume_condition(volumes: &[f64]) -> HedgeCondition {
    let (trend, ratio) = if volumes.len() < VOLUME_MIN_SAMPLES {
        ("insufficient_data", 1.0)
    } else {
        let recent = mean(&volumes[volumes.len() - VOLUME_SHORT_WINDOW..]);
        let baseline = mean(&volumes[volumes.len() - VOLUME_MIN_SAMPLES..]);
        let ratio = if baseline > 0.0 { recent / baseline } else { 1.0 };
        let trend = if ratio > 1.5 {
            "increasing"
        } else if ratio > 0.9 {
            "normal"
        } else {
            "decreasing"
        };
        (trend, ratio)
    };

    let (severity, score, recommendation) = match trend {
        "increasing" => (Severity::Green, 0.1, "Volume confirms the move"),
        "normal" => (Severity::Green, 0.3, "Normal volume"),
        "decreasing" => (Severity::Yellow, 0.6, "Declining volume, reduce size"),
        _ => (Severity::Yellow, 0.6, "Insufficient volume data, use caution"),
    };

    HedgeCondition {
        name: "Volume".to_string(),
        value: ratio,
        threshold: 1.0,
        severity,
        score,
        weight: VOLUME_WEIGHT,
        recommendation: recommendation.to_string(),
        details: serde_json::json!({ "volume_trend": trend }),
    }
}

// ---------------------------------------------------------------------------
// Margin
// ---------------------------------------------------------------------------

pub fn margin_condition(nav: f64, margin_used: f64) -> HedgeCondition {
    let ratio = if nav > 0.0 { margin_used / nav } else { 0.0 };

    let (severity, recommendation) = if ratio > MARGIN_CEILING {
        (Severity::Red, "Margin ceiling exceeded, reduce positions")
    } else if ratio > MARGIN_WARNING {
        (Severity::Yellow, "Margin elevated, no new entries")
    } else {
        (Severity::Green, "Margin within limits")
    };

    HedgeCondition {
        name: "Margin Utilization".to_string(),
        value: ratio,
        threshold: MARGIN_CEILING,
        severity,
        score: (ratio / MARGIN_CEILING).min(1.0),
        weight: MARGIN_WEIGHT,
        recommendation: recommendation.to_string(),
        details: serde_json::json!({ "margin_pct": ratio * 100.0 }),
    }
}
