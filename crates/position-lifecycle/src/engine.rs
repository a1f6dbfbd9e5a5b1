use chrono::{DateTime, Utc};
use charter::PolicyLimits;
use hedge_advisor::HedgeAction;
use serde::{Deserialize, Serialize};
use trade_core::{pip_size, MomentumConsensus, OpenPosition, PositionStatus, Regime};

use crate::config::LifecycleConfig;
use crate::trailing::{self, ratchet, trail_stop_price, ExtensionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionAction {
    Hold,
    TakeProfit,
    StopLoss,
    TightenStop,
    TrailStop,
    ExtendTakeProfit,
    Breakeven,
    ApplyHedge,
    EvaluateExit,
    Reduce,
    Close,
}

impl PositionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionAction::Hold => "hold",
            PositionAction::TakeProfit => "take_profit",
            PositionAction::StopLoss => "stop_loss",
            PositionAction::TightenStop => "tighten_stop",
            PositionAction::TrailStop => "trail_stop",
            PositionAction::ExtendTakeProfit => "extend_take_profit",
            PositionAction::Breakeven => "breakeven",
            PositionAction::ApplyHedge => "apply_hedge",
            PositionAction::EvaluateExit => "evaluate_exit",
            PositionAction::Reduce => "reduce",
            PositionAction::Close => "close",
        }
    }

    pub fn closes_position(&self) -> bool {
        matches!(
            self,
            PositionAction::TakeProfit | PositionAction::StopLoss | PositionAction::Close
        )
    }
}

impl std::fmt::Display for PositionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market inputs for one reassessment
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub price: f64,
    pub regime: Regime,
    pub momentum: MomentumConsensus,
    /// Primary action of the latest hedge analysis for the symbol
    pub advisory: Option<HedgeAction>,
}

impl MarketContext {
    pub fn new(price: f64, regime: Regime) -> Self {
        Self {
            price,
            regime,
            momentum: MomentumConsensus::default(),
            advisory: None,
        }
    }
}

/// Outcome of one reassessment, also the audit record kept by the book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub current_price: f64,
    pub pnl: f64,
    pub r_multiple: Option<f64>,
    pub regime: Regime,
    pub action: PositionAction,
    pub reason: String,
    /// Bracket changes applied before the decisive action, in order
    pub adjustments: Vec<PositionAction>,
    pub previous_stop_loss: Option<f64>,
    pub new_stop_loss: Option<f64>,
    pub previous_take_profit: Option<f64>,
    pub new_take_profit: Option<f64>,
    /// Units to close for a partial exit
    pub reduce_units: Option<f64>,
}

impl PositionUpdate {
    fn begin(position: &OpenPosition, market: &MarketContext, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            symbol: position.symbol.clone(),
            current_price: market.price,
            pnl: position.unrealized_pnl,
            r_multiple: None,
            regime: market.regime,
            action: PositionAction::Hold,
            reason: String::new(),
            adjustments: Vec::new(),
            previous_stop_loss: position.stop_loss,
            new_stop_loss: position.stop_loss,
            previous_take_profit: position.take_profit,
            new_take_profit: position.take_profit,
            reduce_units: None,
        }
    }

    fn finish(mut self, position: &mut OpenPosition, action: PositionAction, reason: impl Into<String>) -> Self {
        self.action = action;
        self.reason = reason.into();
        self.new_stop_loss = position.stop_loss;
        self.new_take_profit = position.take_profit;
        if action.closes_position() {
            self.reduce_units = None;
            position.status = PositionStatus::Closing;
        } else if self.brackets_changed() || action == PositionAction::TrailStop {
            position.status = PositionStatus::Modified;
        }
        self
    }

    pub fn brackets_changed(&self) -> bool {
        self.previous_stop_loss != self.new_stop_loss || self.previous_take_profit != self.new_take_profit
    }
}

/// Reassess one position in strict priority order and mutate it in place.
///
/// Closing decisions leave the position in `Closing`; the caller marks it closed
/// once the broker confirms. Partial exits are reported through `reduce_units` and
/// applied by the caller after confirmation.
pub fn evaluate_position(
    position: &mut OpenPosition,
    market: &MarketContext,
    config: &LifecycleConfig,
    limits: &PolicyLimits,
    now: DateTime<Utc>,
) -> PositionUpdate {
    let mut update = PositionUpdate::begin(position, market, now);
    let mut notes = Vec::new();

    // 1. Refresh
    position.current_price = market.price;
    position.unrealized_pnl = position.pnl_at(market.price);
    let pnl = position.unrealized_pnl;
    update.pnl = pnl;

    // 2. Peak R
    let r = position.r_multiple();
    update.r_multiple = r;
    if let Some(r) = r {
        if r > position.peak_r_multiple {
            position.peak_r_multiple = r;
        }
    }

    // 3. Momentum layer
    let extension = trailing::extend_take_profit(position, market.momentum, config, limits.min_risk_reward);
    if let (ExtensionOutcome::Extended, Some(new_tp)) = (extension.outcome, extension.new_take_profit) {
        position.take_profit = Some(new_tp);
        position.tp_extensions += 1;
        update.adjustments.push(PositionAction::ExtendTakeProfit);
        notes.push(format!("Take-profit extended to {new_tp:.5} on momentum"));
    }

    if trailing::should_trail(position, market.momentum, market.regime, config, now) {
        let proposed = trail_stop_price(&position.symbol, position.side, market.price, config.smart_trail_pips);
        if let Some(stop) = ratchet(position.side, position.stop_loss, proposed) {
            position.stop_loss = Some(stop);
            position.trailing_stop_distance = Some(config.smart_trail_pips * pip_size(&position.symbol));
            update.adjustments.push(PositionAction::TrailStop);
            notes.push(format!("Smart trail moved stop to {stop:.5}"));
        }
    } else if let Some(distance) = position.trailing_stop_distance {
        let proposed = market.price - position.side.sign() * distance;
        if let Some(stop) = ratchet(position.side, position.stop_loss, proposed) {
            position.stop_loss = Some(stop);
            update.adjustments.push(PositionAction::TrailStop);
            notes.push(format!("Trailing stop followed price to {stop:.5}"));
        }
    }

    // 4. Time stops
    let age_hours = position.age_hours(now);
    if age_hours >= limits.max_hold_hours {
        return update.finish(position, PositionAction::Close, "auto time-stop major");
    }
    if age_hours >= config.minor_time_stop_hours && r.map_or(true, |r| r < config.minor_time_stop_min_r) {
        return update.finish(position, PositionAction::Close, "low R at minor time-stop");
    }

    // 5. Breakeven, once per position
    if !position.breakeven_applied && r.is_some_and(|r| r >= config.breakeven_trigger_r) {
        let offset = config.breakeven_offset_pips * pip_size(&position.symbol);
        let proposed = position.entry_price + position.side.sign() * offset;
        if let Some(stop) = ratchet(position.side, position.stop_loss, proposed) {
            position.stop_loss = Some(stop);
            update.adjustments.push(PositionAction::Breakeven);
            notes.push(format!("Stop moved to breakeven at {stop:.5}"));
        }
        position.breakeven_applied = true;
    }

    // 6. Giveback
    if position.peak_r_multiple >= config.giveback_peak_r && r.is_some_and(|r| r <= config.giveback_floor_r) {
        return update.finish(position, PositionAction::Close, "giveback");
    }

    // 7. Early loss cut
    if let Some(risk) = position.initial_risk_amount() {
        if pnl < -config.early_loss_cut_fraction * risk {
            return update.finish(position, PositionAction::Close, "early loss cut");
        }
    }

    // 8. Fallback tree
    let (action, reason, reduce_units) = fallback(position, market, config);
    update.reduce_units = reduce_units;

    match update.adjustments.last() {
        Some(&adjustment) if action == PositionAction::Hold => update.finish(position, adjustment, notes.join("; ")),
        _ => update.finish(position, action, reason),
    }
}

/// First matching branch wins
fn fallback(
    position: &mut OpenPosition,
    market: &MarketContext,
    config: &LifecycleConfig,
) -> (PositionAction, String, Option<f64>) {
    let price = market.price;
    let sign = position.side.sign();
    let pnl = position.unrealized_pnl;
    let notional = position.notional();

    if market.advisory == Some(HedgeAction::CloseAll) {
        return (PositionAction::Close, "hedge advisory close_all".to_string(), None);
    }

    if let Some(tp) = position.take_profit {
        if (price - tp) * sign >= 0.0 {
            return (PositionAction::TakeProfit, "Take profit target reached".to_string(), None);
        }
    }

    if let Some(sl) = position.stop_loss {
        if (sl - price) * sign >= 0.0 {
            return (PositionAction::StopLoss, "Stop loss triggered".to_string(), None);
        }
    }

    if pnl > notional * config.tighten_stop_profit_pct {
        if let Some(stop) = ratchet(position.side, position.stop_loss, position.entry_price) {
            position.stop_loss = Some(stop);
            return (
                PositionAction::TightenStop,
                format!("Position profitable (+{pnl:.2}), stop moved to breakeven"),
                None,
            );
        }
    }

    if market.regime.favors(position.side) && position.trailing_stop_distance.is_none() {
        let distance = price * config.trailing_distance_pct;
        position.trailing_stop_distance = Some(distance);
        return (
            PositionAction::TrailStop,
            format!("{} regime, trailing stop enabled at {:.0}% distance", market.regime, config.trailing_distance_pct * 100.0),
            None,
        );
    }

    if market.regime == Regime::Undetermined && !position.hedge_active {
        position.hedge_active = true;
        return (
            PositionAction::ApplyHedge,
            "Regime undetermined, applying hedge".to_string(),
            None,
        );
    }

    if pnl < -(notional * config.evaluate_exit_loss_pct) {
        return (
            PositionAction::EvaluateExit,
            format!("Significant loss ({pnl:.2}), evaluating exit"),
            None,
        );
    }

    if pnl > notional * config.reduce_profit_pct && !position.scaled_out {
        let units = position.units * config.reduce_fraction;
        return (
            PositionAction::Reduce,
            format!("Strong profit (+{pnl:.2}), reducing position by {:.0}%", config.reduce_fraction * 100.0),
            Some(units),
        );
    }

    (PositionAction::Hold, "Position performing as expected".to_string(), None)
}
