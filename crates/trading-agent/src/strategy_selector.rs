use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use trade_core::{MarketClass, Regime};

/// Baseline statistics for one strategy in the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMeta {
    pub id: String,
    pub name: String,
    pub baseline_win_rate: f64,
    pub baseline_rr: f64,
    pub max_drawdown: f64,
    pub typical_hold_hours: f64,
    pub markets: Vec<MarketClass>,
}

impl StrategyMeta {
    fn new(
        id: &str,
        name: &str,
        baseline_win_rate: f64,
        baseline_rr: f64,
        max_drawdown: f64,
        typical_hold_hours: f64,
        markets: &[MarketClass],
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            baseline_win_rate,
            baseline_rr,
            max_drawdown,
            typical_hold_hours,
            markets: markets.to_vec(),
        }
    }

    pub fn is_trend_following(&self) -> bool {
        self.id.contains("trend")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRank {
    pub meta: StrategyMeta,
    pub score: f64,
    /// Share of the summed score across every viable strategy
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SelectionContext {
    pub market: MarketClass,
    pub regime: Regime,
    pub recent_pnl: f64,
}

impl SelectionContext {
    pub fn new(market: MarketClass, regime: Regime) -> Self {
        Self {
            market,
            regime,
            recent_pnl: 0.0,
        }
    }
}

pub struct StrategySelector {
    inventory: Vec<StrategyMeta>,
}

impl StrategySelector {
    pub fn new() -> Self {
        use MarketClass::*;
        Self {
            inventory: vec![
                StrategyMeta::new("trap_reversal_scalper", "Trap Reversal Scalper", 0.92, 1.1, 0.042, 0.05, &[Futures, Crypto, Fx]),
                StrategyMeta::new(
                    "institutional_sd_liquidity_sweep",
                    "Institutional S&D + Liquidity Sweep",
                    0.72,
                    3.1,
                    0.058,
                    3.0,
                    &[Futures, Fx, Crypto],
                ),
                StrategyMeta::new(
                    "price_action_holy_grail",
                    "Price Action Holy Grail Pack",
                    0.76,
                    2.3,
                    0.05,
                    3.0,
                    &[Futures, Fx, Crypto, Equities],
                ),
                StrategyMeta::new("break_fib_confluence", "Break + Fibonacci Confluence", 0.68, 2.5, 0.06, 3.0, &[Fx, Crypto]),
                StrategyMeta::new(
                    "ema_trend_macd_pulse",
                    "EMA Trend + MACD Pulse",
                    0.67,
                    1.25,
                    0.051,
                    0.15,
                    &[Crypto, Futures],
                ),
            ],
        }
    }

    /// Score every strategy that trades `context.market`, best first.
    ///
    /// score = win x rr / (1 + dd), x1.1 for trend strategies in a directional
    /// regime, x0.9 when recent PnL is negative.
    pub fn rank(&self, context: &SelectionContext) -> Vec<StrategyRank> {
        let trending = matches!(context.regime, Regime::Bull | Regime::Bear);

        let mut ranks: Vec<StrategyRank> = self
            .inventory
            .iter()
            .filter(|s| s.markets.contains(&context.market))
            .map(|meta| {
                let mut score = meta.baseline_win_rate * meta.baseline_rr;
                if meta.max_drawdown > 0.0 {
                    score /= 1.0 + meta.max_drawdown;
                }
                if trending && meta.is_trend_following() {
                    score *= 1.1;
                }
                if context.recent_pnl < 0.0 {
                    score *= 0.9;
                }
                StrategyRank {
                    meta: meta.clone(),
                    score,
                    weight: 0.0,
                }
            })
            .collect();

        let total: f64 = ranks.iter().map(|r| r.score).sum();
        let total = if total > 0.0 { total } else { 1.0 };
        for rank in &mut ranks {
            rank.weight = rank.score / total;
        }

        ranks.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranks
    }

    pub fn select_active(&self, context: &SelectionContext, max_strategies: usize) -> Vec<StrategyRank> {
        let mut ranks = self.rank(context);
        ranks.truncate(max_strategies);
        ranks
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `total_risk_budget` across `ranks` in proportion to their weights
pub fn assign_capital_weights(ranks: &[StrategyRank], total_risk_budget: f64) -> HashMap<String, f64> {
    if ranks.is_empty() {
        return HashMap::new();
    }
    let total: f64 = ranks.iter().map(|r| r.weight).sum();
    let total = if total > 0.0 { total } else { 1.0 };
    ranks
        .iter()
        .map(|r| (r.meta.id.clone(), r.weight / total * total_risk_budget))
        .collect()
}
