//! Multi-condition hedge advisory.
//!
//! Five market conditions are scored in [0, 1], weighted into a 0-100 severity score,
//! and combined with the externally supplied regime to pick one of seven portfolio
//! actions. The engine is purely advisory and never touches orders.

pub mod conditions;
pub mod decision;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trade_core::{Regime, VolatilityLevel};

pub use conditions::{HedgeCondition, Severity};
pub use decision::{HedgeAction, Recommendation, RiskLevel};

/// Everything one analysis needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeInputs {
    pub prices: Vec<f64>,
    pub volumes: Vec<f64>,
    pub nav: f64,
    pub margin_used: f64,
    pub open_positions: usize,
    /// Pairwise correlations between held instruments
    pub correlations: Vec<f64>,
    pub regime: Regime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeAnalysis {
    pub timestamp: DateTime<Utc>,
    pub regime: Regime,
    pub volatility_level: VolatilityLevel,
    pub volatility_value: f64,
    pub conditions: Vec<HedgeCondition>,
    /// Weighted severity, 0 (benign) to 100 (critical)
    pub severity_score: f64,
    pub risk_level: RiskLevel,
    pub primary_action: HedgeAction,
    pub secondary_actions: Vec<HedgeAction>,
    pub position_size_multiplier: f64,
    pub confidence: f64,
    pub open_positions: usize,
    pub summary: String,
}

impl HedgeAnalysis {
    pub fn count(&self, severity: Severity) -> usize {
        self.conditions.iter().filter(|c| c.severity == severity).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HedgeAdvisor;

impl HedgeAdvisor {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, inputs: &HedgeInputs) -> HedgeAnalysis {
        self.analyze_at(inputs, Utc::now())
    }

    pub fn analyze_at(&self, inputs: &HedgeInputs, timestamp: DateTime<Utc>) -> HedgeAnalysis {
        let volatility = conditions::annualized_volatility(&inputs.prices);
        let volatility_level = conditions::classify_volatility(volatility);
        let trend = conditions::normalized_trend(&inputs.prices);

        let conditions = vec![
            conditions::volatility_condition(volatility, volatility_level),
            conditions::trend_condition(trend),
            conditions::correlation_condition(&inputs.correlations),
            conditions::volume_condition(&inputs.volumes),
            conditions::margin_condition(inputs.nav, inputs.margin_used),
        ];

        let severity_score = 100.0 * conditions.iter().map(|c| c.score * c.weight).sum::<f64>();
        let risk_level = RiskLevel::from_severity_score(severity_score);
        let rec = decision::recommend(inputs.regime, volatility_level, &conditions);

        let summary = summarize(inputs.regime, volatility_level, risk_level, severity_score, &rec);

        tracing::debug!(
            regime = %inputs.regime,
            volatility,
            severity_score,
            action = rec.primary.name(),
            "Hedge analysis complete"
        );

        HedgeAnalysis {
            timestamp,
            regime: inputs.regime,
            volatility_level,
            volatility_value: volatility,
            conditions,
            severity_score,
            risk_level,
            primary_action: rec.primary,
            secondary_actions: rec.secondary,
            position_size_multiplier: rec.position_size_multiplier,
            confidence: rec.confidence,
            open_positions: inputs.open_positions,
            summary,
        }
    }
}

fn summarize(
    regime: Regime,
    volatility: VolatilityLevel,
    risk: RiskLevel,
    severity_score: f64,
    rec: &Recommendation,
) -> String {
    let secondary = if rec.secondary.is_empty() {
        "none".to_string()
    } else {
        rec.secondary.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
    };

    format!(
        "Regime: {}\nVolatility: {}\nRisk level: {}\nSeverity: {:.1}/100\nPrimary action: {}\nSecondary: {}\nSize multiplier: {:.2}x (confidence {:.0}%)",
        regime.name().to_uppercase(),
        volatility.name().to_uppercase(),
        risk.name().to_uppercase(),
        severity_score,
        rec.primary.name().replace('_', " ").to_uppercase(),
        secondary,
        rec.position_size_multiplier,
        rec.confidence * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn inputs(prices: Vec<f64>, regime: Regime) -> HedgeInputs {
        HedgeInputs {
            prices,
            volumes: vec![1_000.0; 30],
            nav: 10_000.0,
            margin_used: 1_000.0,
            open_positions: 1,
            correlations: vec![],
            regime,
        }
    }

    fn wild_prices() -> Vec<f64> {
        (0..50).map(|i| if i % 2 == 0 { 100.0 } else { 110.0 }).collect()
    }

    #[test]
    fn test_crash_overrides_benign_conditions() {
        let advisor = HedgeAdvisor::new();
        let analysis = advisor.analyze(&inputs(vec![1.0; 50], Regime::Crash));
        assert_eq!(analysis.primary_action, HedgeAction::CloseAll);
        assert_eq!(analysis.position_size_multiplier, 0.0);
        assert_relative_eq!(analysis.confidence, 0.95);
    }

    #[test]
    fn test_severity_score_is_weighted_sum() {
        let advisor = HedgeAdvisor::new();
        // Flat prices: vol low (0.1), trend sideways (0.7), no correlations (0),
        // volume normal (0.3), margin 10% of NAV (0.1 / 0.35)
        let analysis = advisor.analyze(&inputs(vec![1.0; 50], Regime::Sideways));
        let expected = 100.0 * (0.1 * 0.30 + 0.7 * 0.25 + 0.0 * 0.20 + 0.3 * 0.15 + (0.1 / 0.35) * 0.10);
        assert_relative_eq!(analysis.severity_score, expected, epsilon = 1e-9);
        assert_eq!(analysis.risk_level, RiskLevel::Moderate);
        assert_eq!(analysis.primary_action, HedgeAction::ModerateLong);
        assert_eq!(analysis.conditions.len(), 5);
    }

    #[test]
    fn test_score_bounded() {
        let advisor = HedgeAdvisor::new();
        let mut hostile = inputs(wild_prices(), Regime::Bull);
        hostile.margin_used = 50_000.0;
        hostile.correlations = vec![0.95; 6];
        hostile.volumes = vec![];
        let analysis = advisor.analyze(&hostile);
        assert!(analysis.severity_score <= 100.0 && analysis.severity_score >= 0.0);
        assert_eq!(analysis.volatility_level, VolatilityLevel::Extreme);
        assert!(analysis.count(Severity::Red) >= 3);
        assert_eq!(analysis.primary_action, HedgeAction::PauseTrading);
    }

    #[test]
    fn test_summary_mentions_action() {
        let advisor = HedgeAdvisor::new();
        let analysis = advisor.analyze(&inputs(vec![1.0; 50], Regime::Undetermined));
        assert!(analysis.summary.contains("WAIT FOR CLARITY"));
        assert!(analysis.summary.contains("UNDETERMINED"));
    }
}
