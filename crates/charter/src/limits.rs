use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;
use trade_core::is_crypto;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CharterError {
    #[error("Charter self-test failed: {0}")]
    SelfTestFailed(String),
}

/// Immutable risk constants. The only instance the rest of the system sees is the
/// `&'static` returned by [`PolicyLimits::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyLimits {
    pub pin: u32,
    pub version: &'static str,

    pub max_hold_hours: f64,
    pub daily_loss_breaker_pct: f64,

    pub min_notional_usd: f64,
    pub min_expected_pnl_usd: f64,
    pub min_risk_reward: f64,

    pub allowed_timeframes: &'static [&'static str],
    pub rejected_timeframes: &'static [&'static str],

    pub max_concurrent_positions: usize,
    pub max_daily_trades: u32,
    pub max_placement_latency_ms: u64,
    pub max_margin_utilization: f64,

    pub fx_spread_atr_multiplier: f64,
    pub crypto_spread_atr_multiplier: f64,
    pub fx_stop_atr_multiplier: f64,
    pub crypto_stop_atr_multiplier: f64,

    pub crypto_consensus_min: f64,
    pub venue_max_leverage: f64,
}

static CHARTER_SELF_TEST: OnceLock<Result<(), CharterError>> = OnceLock::new();
static CHARTER_INSTANCE: PolicyLimits = PolicyLimits::CHARTER;

impl PolicyLimits {
    pub const CHARTER: PolicyLimits = PolicyLimits {
        pin: 841_921,
        version: "2.0_IMMUTABLE",
        max_hold_hours: 6.0,
        daily_loss_breaker_pct: -5.0,
        min_notional_usd: 15_000.0,
        min_expected_pnl_usd: 100.0,
        min_risk_reward: 3.2,
        allowed_timeframes: &["M15", "M30", "H1"],
        rejected_timeframes: &["M1", "M5"],
        max_concurrent_positions: 3,
        max_daily_trades: 12,
        max_placement_latency_ms: 300,
        max_margin_utilization: 0.35,
        fx_spread_atr_multiplier: 0.15,
        crypto_spread_atr_multiplier: 0.10,
        fx_stop_atr_multiplier: 1.2,
        crypto_stop_atr_multiplier: 1.5,
        crypto_consensus_min: 0.90,
        venue_max_leverage: 20.0,
    };

    /// Self-tested process-wide charter. An `Err` here must stop startup.
    pub fn load() -> Result<&'static PolicyLimits, CharterError> {
        CHARTER_SELF_TEST
            .get_or_init(|| CHARTER_INSTANCE.self_test())
            .clone()
            .map(|_| &CHARTER_INSTANCE)
    }

    pub fn validate_pin(&self, code: u32) -> bool {
        code == self.pin
    }

    /// Only the allowed set passes; rejected and unknown timeframes fail closed
    pub fn validate_timeframe(&self, timeframe: &str) -> bool {
        if self.rejected_timeframes.iter().any(|tf| *tf == timeframe) {
            return false;
        }
        self.allowed_timeframes.iter().any(|tf| *tf == timeframe)
    }

    pub fn validate_hold_duration(&self, hours: f64) -> bool {
        hours > 0.0 && hours <= self.max_hold_hours
    }

    pub fn validate_risk_reward(&self, ratio: f64) -> bool {
        ratio >= self.min_risk_reward
    }

    pub fn validate_notional(&self, notional_usd: f64) -> bool {
        notional_usd >= self.min_notional_usd
    }

    pub fn validate_expected_pnl(&self, expected_pnl_usd: f64) -> bool {
        expected_pnl_usd >= self.min_expected_pnl_usd
    }

    /// The breaker value itself trips
    pub fn validate_daily_pnl(&self, daily_pnl_pct: f64) -> bool {
        daily_pnl_pct > self.daily_loss_breaker_pct
    }

    pub fn spread_atr_multiplier(&self, symbol: &str) -> f64 {
        if is_crypto(symbol) {
            self.crypto_spread_atr_multiplier
        } else {
            self.fx_spread_atr_multiplier
        }
    }

    pub fn stop_atr_multiplier(&self, symbol: &str) -> f64 {
        if is_crypto(symbol) {
            self.crypto_stop_atr_multiplier
        } else {
            self.fx_stop_atr_multiplier
        }
    }

    /// Assert every constant and every validator boundary
    pub fn self_test(&self) -> Result<(), CharterError> {
        let canon = &Self::CHARTER;
        let checks: [(&str, bool); 28] = [
            ("pin", self.pin == canon.pin),
            ("version", self.version == canon.version),
            ("max_hold_hours", self.max_hold_hours == canon.max_hold_hours),
            ("daily_loss_breaker_pct", self.daily_loss_breaker_pct == canon.daily_loss_breaker_pct),
            ("min_notional_usd", self.min_notional_usd == canon.min_notional_usd),
            ("min_expected_pnl_usd", self.min_expected_pnl_usd == canon.min_expected_pnl_usd),
            ("min_risk_reward", self.min_risk_reward == canon.min_risk_reward),
            ("allowed_timeframes", self.allowed_timeframes == canon.allowed_timeframes),
            ("rejected_timeframes", self.rejected_timeframes == canon.rejected_timeframes),
            ("max_concurrent_positions", self.max_concurrent_positions == canon.max_concurrent_positions),
            ("max_daily_trades", self.max_daily_trades == canon.max_daily_trades),
            ("max_placement_latency_ms", self.max_placement_latency_ms == canon.max_placement_latency_ms),
            ("max_margin_utilization", self.max_margin_utilization == canon.max_margin_utilization),
            ("fx_stop_atr_multiplier", self.fx_stop_atr_multiplier == canon.fx_stop_atr_multiplier),
            ("crypto_stop_atr_multiplier", self.crypto_stop_atr_multiplier == canon.crypto_stop_atr_multiplier),
            ("hold 6h valid", self.validate_hold_duration(6.0)),
            ("hold 7h invalid", !self.validate_hold_duration(7.0)),
            ("hold 0h invalid", !self.validate_hold_duration(0.0)),
            ("rr 3.2 valid", self.validate_risk_reward(3.2)),
            ("rr 3.1 invalid", !self.validate_risk_reward(3.1)),
            ("notional 15000 valid", self.validate_notional(15_000.0)),
            ("notional 14999 invalid", !self.validate_notional(14_999.0)),
            ("daily pnl -4.9 valid", self.validate_daily_pnl(-4.9)),
            ("daily pnl -5.0 invalid", !self.validate_daily_pnl(-5.0)),
            ("daily pnl -5.1 invalid", !self.validate_daily_pnl(-5.1)),
            ("timeframe M15 valid", self.validate_timeframe("M15")),
            ("timeframe M1/unknown invalid", !self.validate_timeframe("M1") && !self.validate_timeframe("D1")),
            ("pin check", self.validate_pin(canon.pin) && !self.validate_pin(canon.pin.wrapping_add(1))),
        ];

        let failed: Vec<&str> = checks
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect();

        if failed.is_empty() {
            tracing::debug!(version = self.version, "Charter self-test passed");
            Ok(())
        } else {
            Err(CharterError::SelfTestFailed(failed.join(", ")))
        }
    }

    pub fn summary(&self) -> CharterSummary {
        CharterSummary {
            version: self.version.to_string(),
            max_hold_hours: self.max_hold_hours,
            daily_loss_breaker_pct: self.daily_loss_breaker_pct,
            min_notional_usd: self.min_notional_usd,
            min_expected_pnl_usd: self.min_expected_pnl_usd,
            min_risk_reward: self.min_risk_reward,
            allowed_timeframes: self.allowed_timeframes.iter().map(|s| s.to_string()).collect(),
            rejected_timeframes: self.rejected_timeframes.iter().map(|s| s.to_string()).collect(),
            max_concurrent_positions: self.max_concurrent_positions,
            max_daily_trades: self.max_daily_trades,
            max_placement_latency_ms: self.max_placement_latency_ms,
            max_margin_utilization: self.max_margin_utilization,
            fx_spread_atr_multiplier: self.fx_spread_atr_multiplier,
            crypto_spread_atr_multiplier: self.crypto_spread_atr_multiplier,
            fx_stop_atr_multiplier: self.fx_stop_atr_multiplier,
            crypto_stop_atr_multiplier: self.crypto_stop_atr_multiplier,
            crypto_consensus_min: self.crypto_consensus_min,
            venue_max_leverage: self.venue_max_leverage,
        }
    }
}

/// Serializable view of the charter. The PIN is never included.
#[derive(Debug, Clone, Serialize)]
pub struct CharterSummary {
    pub version: String,
    pub max_hold_hours: f64,
    pub daily_loss_breaker_pct: f64,
    pub min_notional_usd: f64,
    pub min_expected_pnl_usd: f64,
    pub min_risk_reward: f64,
    pub allowed_timeframes: Vec<String>,
    pub rejected_timeframes: Vec<String>,
    pub max_concurrent_positions: usize,
    pub max_daily_trades: u32,
    pub max_placement_latency_ms: u64,
    pub max_margin_utilization: f64,
    pub fx_spread_atr_multiplier: f64,
    pub crypto_spread_atr_multiplier: f64,
    pub fx_stop_atr_multiplier: f64,
    pub crypto_stop_atr_multiplier: f64,
    pub crypto_consensus_min: f64,
    pub venue_max_leverage: f64,
}
