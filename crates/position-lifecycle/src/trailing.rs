//! Momentum-driven take-profit extension and smart trailing.
//!
//! Both helpers only ever move a bracket in the position's favour and never close
//! anything; the decision engine decides when they run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trade_core::{pip_size, risk_reward, MomentumConsensus, OpenPosition, Regime, Side};

use crate::config::LifecycleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionOutcome {
    Extended,
    NoBrackets,
    BaseRrBelowMin,
    MomentumTooLow,
    NewRrBelowMin,
    LimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingDecision {
    pub new_take_profit: Option<f64>,
    pub outcome: ExtensionOutcome,
}

impl TrailingDecision {
    fn rejected(outcome: ExtensionOutcome) -> Self {
        Self {
            new_take_profit: None,
            outcome,
        }
    }
}

/// Move the target outward by `boost` x its current distance when momentum and
/// consensus are both strong and the risk/reward floor still holds afterwards.
/// Risk is measured against the initial stop so breakeven moves do not disable it.
pub fn extend_take_profit(
    position: &OpenPosition,
    momentum: MomentumConsensus,
    config: &LifecycleConfig,
    min_risk_reward: f64,
) -> TrailingDecision {
    let (Some(take_profit), Some(stop)) = (
        position.take_profit,
        position.initial_stop_loss.or(position.stop_loss),
    ) else {
        return TrailingDecision::rejected(ExtensionOutcome::NoBrackets);
    };
    let entry = position.entry_price;

    if position.tp_extensions >= config.max_tp_extensions {
        return TrailingDecision::rejected(ExtensionOutcome::LimitReached);
    }

    match risk_reward(position.side, entry, stop, take_profit) {
        Some(rr) if rr >= min_risk_reward => {}
        _ => return TrailingDecision::rejected(ExtensionOutcome::BaseRrBelowMin),
    }

    if momentum.momentum_score < config.tp_extension_min_momentum
        || momentum.hive_consensus < config.tp_extension_min_consensus
    {
        return TrailingDecision::rejected(ExtensionOutcome::MomentumTooLow);
    }

    let distance = (take_profit - entry).abs();
    let proposed = take_profit + position.side.sign() * distance * config.tp_extension_boost;

    match risk_reward(position.side, entry, stop, proposed) {
        Some(rr) if rr >= min_risk_reward => TrailingDecision {
            new_take_profit: Some(proposed),
            outcome: ExtensionOutcome::Extended,
        },
        _ => TrailingDecision::rejected(ExtensionOutcome::NewRrBelowMin),
    }
}

/// Smart trail gate: at least `smart_trail_min_r` in profit, old enough, backed by
/// consensus, and the regime leans the position's way.
pub fn should_trail(
    position: &OpenPosition,
    momentum: MomentumConsensus,
    regime: Regime,
    config: &LifecycleConfig,
    now: DateTime<Utc>,
) -> bool {
    let Some(r) = position.r_multiple() else {
        return false;
    };
    r >= config.smart_trail_min_r
        && position.age_minutes(now) >= config.smart_trail_min_age_minutes
        && momentum.hive_consensus >= config.smart_trail_min_consensus
        && regime.favors(position.side)
}

/// Stop `pips` behind `price` on the protective side
pub fn trail_stop_price(symbol: &str, side: Side, price: f64, pips: f64) -> f64 {
    price - side.sign() * pips * pip_size(symbol)
}

/// `proposed` if it tightens the current stop, otherwise None.
/// Stops only move towards (and past) the entry, never away from it.
pub fn ratchet(side: Side, current: Option<f64>, proposed: f64) -> Option<f64> {
    match current {
        None => Some(proposed),
        Some(stop) if (proposed - stop) * side.sign() > 0.0 => Some(proposed),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn long_position() -> OpenPosition {
        OpenPosition::new("EUR_USD", Side::Buy, 100_000.0, 1.1000, Utc::now() - Duration::minutes(30))
            .with_brackets(Some(1.0900), Some(1.1400))
    }

    fn strong() -> MomentumConsensus {
        MomentumConsensus {
            momentum_score: 0.9,
            hive_consensus: 0.9,
        }
    }

    #[test]
    fn test_extension_moves_target_outward() {
        let decision = extend_take_profit(&long_position(), strong(), &LifecycleConfig::default(), 3.2);
        assert_eq!(decision.outcome, ExtensionOutcome::Extended);
        // 1.14 + 0.04 * 0.5
        assert_relative_eq!(decision.new_take_profit.unwrap(), 1.1600, epsilon = 1e-9);
    }

    #[test]
    fn test_extension_for_short_moves_target_down() {
        let position = OpenPosition::new("EUR_USD", Side::Sell, 100_000.0, 1.1000, Utc::now())
            .with_brackets(Some(1.1100), Some(1.0600));
        let decision = extend_take_profit(&position, strong(), &LifecycleConfig::default(), 3.2);
        assert_relative_eq!(decision.new_take_profit.unwrap(), 1.0400, epsilon = 1e-9);
    }

    #[test]
    fn test_extension_refused_on_weak_momentum_or_rr() {
        let weak = MomentumConsensus {
            momentum_score: 0.7,
            hive_consensus: 0.95,
        };
        let decision = extend_take_profit(&long_position(), weak, &LifecycleConfig::default(), 3.2);
        assert_eq!(decision.outcome, ExtensionOutcome::MomentumTooLow);
        assert!(decision.new_take_profit.is_none());

        let thin = OpenPosition::new("EUR_USD", Side::Buy, 1.0, 1.1000, Utc::now())
            .with_brackets(Some(1.0900), Some(1.1200));
        let decision = extend_take_profit(&thin, strong(), &LifecycleConfig::default(), 3.2);
        assert_eq!(decision.outcome, ExtensionOutcome::BaseRrBelowMin);

        let naked = OpenPosition::new("EUR_USD", Side::Buy, 1.0, 1.1000, Utc::now());
        let decision = extend_take_profit(&naked, strong(), &LifecycleConfig::default(), 3.2);
        assert_eq!(decision.outcome, ExtensionOutcome::NoBrackets);

        let mut extended = long_position();
        extended.tp_extensions = 1;
        let decision = extend_take_profit(&extended, strong(), &LifecycleConfig::default(), 3.2);
        assert_eq!(decision.outcome, ExtensionOutcome::LimitReached);
    }

    #[test]
    fn test_should_trail_requirements() {
        let config = LifecycleConfig::default();
        let now = Utc::now();
        let mut position = long_position();
        position.current_price = 1.1120;

        assert!(should_trail(&position, strong(), Regime::Bull, &config, now));
        assert!(!should_trail(&position, strong(), Regime::Bear, &config, now));
        assert!(!should_trail(&position, strong(), Regime::Sideways, &config, now));

        let lukewarm = MomentumConsensus {
            momentum_score: 0.9,
            hive_consensus: 0.7,
        };
        assert!(!should_trail(&position, lukewarm, Regime::Bull, &config, now));

        position.entry_time = now - Duration::minutes(2);
        assert!(!should_trail(&position, strong(), Regime::Bull, &config, now));

        position.entry_time = now - Duration::minutes(30);
        position.current_price = 1.1050;
        assert!(!should_trail(&position, strong(), Regime::Bull, &config, now));
    }

    #[test]
    fn test_ratchet_is_one_way() {
        assert_eq!(ratchet(Side::Buy, Some(1.10), 1.11), Some(1.11));
        assert_eq!(ratchet(Side::Buy, Some(1.10), 1.09), None);
        assert_eq!(ratchet(Side::Buy, Some(1.10), 1.10), None);
        assert_eq!(ratchet(Side::Sell, Some(1.10), 1.09), Some(1.09));
        assert_eq!(ratchet(Side::Sell, Some(1.10), 1.11), None);
        assert_eq!(ratchet(Side::Sell, None, 1.11), Some(1.11));
    }

    #[test]
    fn test_trail_stop_price_uses_pip_size() {
        assert_relative_eq!(trail_stop_price("EUR_USD", Side::Buy, 1.1200, 15.0), 1.1185, epsilon = 1e-9);
        assert_relative_eq!(trail_stop_price("USD_JPY", Side::Sell, 150.00, 15.0), 150.15, epsilon = 1e-9);
    }
}
