use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Thresholds for autonomous position management.
///
/// The major time stop comes from the charter (`max_hold_hours`); everything here
/// is tunable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub reassess_interval: Duration,
    pub collaborator_timeout: Duration,
    /// Prices fetched for the per-symbol hedge snapshot
    pub price_lookback: usize,

    // Time stop (minor)
    pub minor_time_stop_hours: f64,
    pub minor_time_stop_min_r: f64,

    // Breakeven
    pub breakeven_trigger_r: f64,
    pub breakeven_offset_pips: f64,

    // Giveback
    pub giveback_peak_r: f64,
    pub giveback_floor_r: f64,

    /// Close when PnL falls below -fraction x initial risk amount
    pub early_loss_cut_fraction: f64,

    // Take-profit extension
    pub tp_extension_min_momentum: f64,
    pub tp_extension_min_consensus: f64,
    pub tp_extension_boost: f64,
    pub max_tp_extensions: u32,

    // Smart trail
    pub smart_trail_min_r: f64,
    pub smart_trail_min_age_minutes: f64,
    pub smart_trail_min_consensus: f64,
    pub smart_trail_pips: f64,

    // Fallback tree, fractions of entry notional / price
    pub tighten_stop_profit_pct: f64,
    pub trailing_distance_pct: f64,
    pub evaluate_exit_loss_pct: f64,
    pub reduce_profit_pct: f64,
    pub reduce_fraction: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reassess_interval: Duration::from_secs(60),
            collaborator_timeout: Duration::from_millis(2_000),
            price_lookback: 50,
            minor_time_stop_hours: 3.0,
            minor_time_stop_min_r: 0.5,
            breakeven_trigger_r: 1.0,
            breakeven_offset_pips: 2.0,
            giveback_peak_r: 1.5,
            giveback_floor_r: 0.5,
            early_loss_cut_fraction: 0.5,
            tp_extension_min_momentum: 0.8,
            tp_extension_min_consensus: 0.8,
            tp_extension_boost: 0.5,
            max_tp_extensions: 1,
            smart_trail_min_r: 1.0,
            smart_trail_min_age_minutes: 5.0,
            smart_trail_min_consensus: 0.75,
            smart_trail_pips: 15.0,
            tighten_stop_profit_pct: 0.01,
            trailing_distance_pct: 0.02,
            evaluate_exit_loss_pct: 0.05,
            reduce_profit_pct: 0.05,
            reduce_fraction: 0.5,
        }
    }
}

impl LifecycleConfig {
    pub fn with_intervals(mut self, reassess_interval: Duration, collaborator_timeout: Duration) -> Self {
        self.reassess_interval = reassess_interval;
        self.collaborator_timeout = collaborator_timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.reassess_interval.is_zero() {
            bail!("Reassess interval must be non-zero");
        }
        if self.giveback_floor_r >= self.giveback_peak_r {
            bail!(
                "Giveback floor {}R must sit below the peak trigger {}R",
                self.giveback_floor_r,
                self.giveback_peak_r
            );
        }
        if !(0.0..1.0).contains(&self.reduce_fraction) || self.reduce_fraction == 0.0 {
            bail!("Reduce fraction must be in (0, 1), got {}", self.reduce_fraction);
        }
        if self.minor_time_stop_hours <= 0.0 {
            bail!("Minor time stop must be positive");
        }
        Ok(())
    }
}
