use serde::{Deserialize, Serialize};
use trade_core::{Regime, VolatilityLevel};

use crate::conditions::{HedgeCondition, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeAction {
    FullLong,
    ModerateLong,
    ReduceExposure,
    CloseAll,
    HedgeShort,
    PauseTrading,
    WaitForClarity,
}

impl HedgeAction {
    pub fn name(&self) -> &'static str {
        match self {
            HedgeAction::FullLong => "full_long",
            HedgeAction::ModerateLong => "moderate_long",
            HedgeAction::ReduceExposure => "reduce_exposure",
            HedgeAction::CloseAll => "close_all",
            HedgeAction::HedgeShort => "hedge_short",
            HedgeAction::PauseTrading => "pause_trading",
            HedgeAction::WaitForClarity => "wait_for_clarity",
        }
    }

    /// Actions under which the control loop may open new risk
    pub fn permits_entry(&self) -> bool {
        matches!(self, HedgeAction::FullLong | HedgeAction::ModerateLong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Elevated,
    Critical,
}

impl RiskLevel {
    pub fn from_severity_score(score: f64) -> Self {
        if score < 25.0 {
            RiskLevel::Safe
        } else if score < 50.0 {
            RiskLevel::Moderate
        } else if score < 75.0 {
            RiskLevel::Elevated
        } else {
            RiskLevel::Critical
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Elevated => "elevated",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub primary: HedgeAction,
    pub secondary: Vec<HedgeAction>,
    pub position_size_multiplier: f64,
    pub confidence: f64,
}

/// Regime x condition-severity decision table. Crash overrides everything.
pub fn recommend(regime: Regime, volatility: VolatilityLevel, conditions: &[HedgeCondition]) -> Recommendation {
    let red = conditions.iter().filter(|c| c.severity == Severity::Red).count();
    let yellow = conditions.iter().filter(|c| c.severity == Severity::Yellow).count();

    use HedgeAction::*;
    let (primary, secondary, multiplier, confidence) = match regime {
        Regime::Crash => (CloseAll, vec![PauseTrading], 0.0, 0.95),
        Regime::Bear if red > 0 => (ReduceExposure, vec![HedgeShort], 0.5, 0.8),
        Regime::Bear => (ModerateLong, vec![HedgeShort], 0.75, 0.8),
        Regime::Bull if red > 0 => (PauseTrading, vec![ReduceExposure], 0.5, 0.7),
        Regime::Bull if yellow > 1 => (ModerateLong, vec![WaitForClarity], 0.85, 0.75),
        Regime::Bull => {
            let multiplier = if volatility == VolatilityLevel::Low { 1.5 } else { 1.0 };
            (FullLong, vec![], multiplier, 0.9)
        }
        Regime::Sideways if red > 0 => (PauseTrading, vec![], 0.5, 0.7),
        Regime::Sideways => (ModerateLong, vec![WaitForClarity], 0.75, 0.7),
        Regime::Undetermined => (WaitForClarity, vec![PauseTrading], 0.5, 0.6),
    };

    Recommendation {
        primary,
        secondary,
        position_size_multiplier: multiplier,
        confidence,
    }
}
