use chrono::{DateTime, NaiveDate, Utc};
use charter::PolicyLimits;

use crate::models::CircuitBreakerCheck;

/// Daily loss and trade-count breakers.
///
/// The day starts at 00:00 UTC. The first NAV observed on a new day becomes the
/// baseline for the daily PnL percentage. A tripped breaker stays tripped until the
/// next UTC day even if NAV recovers.
#[derive(Debug, Clone)]
pub struct DailyCircuitBreaker {
    limits: &'static PolicyLimits,
    trading_day: Option<NaiveDate>,
    start_of_day_nav: f64,
    trades_today: u32,
    /// (breaker kind, message) pairs, at most one per kind
    tripped: Vec<(&'static str, String)>,
}

impl DailyCircuitBreaker {
    pub fn new(limits: &'static PolicyLimits) -> Self {
        Self {
            limits,
            trading_day: None,
            start_of_day_nav: 0.0,
            trades_today: 0,
            tripped: Vec::new(),
        }
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn is_tripped(&self) -> bool {
        !self.tripped.is_empty()
    }

    fn roll_day(&mut self, nav: Option<f64>, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.trading_day == Some(today) {
            return;
        }
        if self.trading_day.is_some() {
            tracing::info!(day = %today, "New trading day, circuit breakers reset");
        }
        self.trading_day = Some(today);
        self.start_of_day_nav = nav.unwrap_or(0.0);
        self.trades_today = 0;
        self.tripped.clear();
    }

    pub fn check(&mut self, nav: f64, now: DateTime<Utc>) -> CircuitBreakerCheck {
        self.roll_day(Some(nav), now);
        if self.start_of_day_nav <= 0.0 && nav > 0.0 {
            self.start_of_day_nav = nav;
        }

        let daily_pnl_percent = if self.start_of_day_nav > 0.0 {
            (nav - self.start_of_day_nav) / self.start_of_day_nav * 100.0
        } else {
            0.0
        };

        if !self.limits.validate_daily_pnl(daily_pnl_percent) {
            self.trip("daily_loss", format!(
                "Daily loss {:.2}% breached limit {:.1}%",
                daily_pnl_percent, self.limits.daily_loss_breaker_pct
            ));
        }
        if self.trades_today >= self.limits.max_daily_trades {
            self.trip("daily_trades", format!(
                "Daily trade limit reached: {}/{}",
                self.trades_today, self.limits.max_daily_trades
            ));
        }

        let breakers_triggered: Vec<String> = self.tripped.iter().map(|(_, msg)| msg.clone()).collect();
        let can_trade = breakers_triggered.is_empty();
        let reason = if can_trade {
            "All circuit breakers clear".to_string()
        } else {
            format!("Circuit breakers triggered: {}", breakers_triggered.join(", "))
        };

        CircuitBreakerCheck {
            can_trade,
            reason,
            daily_pnl_percent,
            trades_today: self.trades_today,
            breakers_triggered,
        }
    }

    pub fn record_trade(&mut self, now: DateTime<Utc>) {
        self.roll_day(None, now);
        self.trades_today += 1;
    }

    fn trip(&mut self, kind: &'static str, message: String) {
        if self.tripped.iter().any(|(k, _)| *k == kind) {
            return;
        }
        tracing::warn!(breaker = kind, "Circuit breaker tripped: {}", message);
        self.tripped.push((kind, message));
    }
}
