use serde::{Deserialize, Serialize};
use trade_core::TradeCandidate;

use crate::limits::PolicyLimits;

/// Charter-level verdict on a candidate, computed before any gate runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecheckOutcome {
    pub passed: bool,
    pub reasons: Vec<String>,
    pub notional: f64,
    pub risk_reward: Option<f64>,
    pub expected_pnl: Option<f64>,
}

impl PrecheckOutcome {
    pub fn reason(&self) -> String {
        self.reasons.join("; ")
    }
}

/// Timeframe, notional floor, risk/reward and expected-profit checks
pub struct CharterPrecheck<'a> {
    limits: &'a PolicyLimits,
}

impl<'a> CharterPrecheck<'a> {
    pub fn new(limits: &'a PolicyLimits) -> Self {
        Self { limits }
    }

    /// Evaluate `candidate` as if filled at `entry_price`. Missing brackets are reported as
    /// failures, never as errors.
    pub fn evaluate(&self, candidate: &TradeCandidate, entry_price: Option<f64>) -> PrecheckOutcome {
        let mut reasons = Vec::new();

        if !self.limits.validate_timeframe(&candidate.timeframe) {
            reasons.push(format!(
                "Timeframe {} not permitted (allowed: {})",
                candidate.timeframe,
                self.limits.allowed_timeframes.join(", ")
            ));
        }

        let Some(entry) = entry_price.filter(|p| *p > 0.0) else {
            reasons.push("Missing entry price".to_string());
            return PrecheckOutcome {
                passed: false,
                reasons,
                notional: 0.0,
                risk_reward: None,
                expected_pnl: None,
            };
        };

        let notional = candidate.notional(entry);
        if !self.limits.validate_notional(notional) {
            reasons.push(format!(
                "Notional ${:.2} below Charter minimum ${:.0}",
                notional, self.limits.min_notional_usd
            ));
        }

        let mut risk_reward = None;
        let mut expected_pnl = None;
        match (candidate.stop_loss, candidate.take_profit) {
            (Some(stop), Some(target)) => {
                risk_reward = candidate.risk_reward(entry);
                match risk_reward {
                    Some(rr) if !self.limits.validate_risk_reward(rr) => {
                        reasons.push(format!(
                            "Risk/reward {:.2} below Charter minimum {:.2}",
                            rr, self.limits.min_risk_reward
                        ));
                    }
                    Some(_) => {}
                    None => reasons.push(format!(
                        "Brackets inconsistent with {} side (entry {:.5}, stop {:.5}, target {:.5})",
                        candidate.side, entry, stop, target
                    )),
                }

                let pnl = (target - entry).abs() * candidate.units.abs();
                expected_pnl = Some(pnl);
                if !self.limits.validate_expected_pnl(pnl) {
                    reasons.push(format!(
                        "Expected profit ${:.2} below Charter minimum ${:.0}",
                        pnl, self.limits.min_expected_pnl_usd
                    ));
                }
            }
            (stop, target) => {
                if stop.is_none() {
                    reasons.push("Missing stop-loss".to_string());
                }
                if target.is_none() {
                    reasons.push("Missing take-profit".to_string());
                }
            }
        }

        let passed = reasons.is_empty();
        if !passed {
            tracing::debug!(
                symbol = %candidate.symbol,
                notional,
                ?risk_reward,
                "Charter pre-check rejected candidate: {}",
                reasons.join("; ")
            );
        }

        PrecheckOutcome {
            passed,
            reasons,
            notional,
            risk_reward,
            expected_pnl,
        }
    }
}
