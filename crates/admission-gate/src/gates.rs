use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use charter::PolicyLimits;
use serde_json::json;
use trade_core::{is_crypto, shared_usd_bucket, AccountSnapshot, OpenPosition, TradeCandidate};

use crate::models::{GateResult, GateVerdict};

/// Crypto entries are only permitted between these Eastern hours (start inclusive, end exclusive)
const CRYPTO_WINDOW_START_ET: u32 = 8;
const CRYPTO_WINDOW_END_ET: u32 = 16;
/// Eastern time as a fixed UTC-5 with no daylight saving. The trading window
/// is defined against standard time all year, so a tz database is not wanted here.
const ET_OFFSET_HOURS: u32 = 5;

/// Cascading pre-trade admission checks.
/// Every gate runs on every candidate so operators see every failing reason at once.
/// Read-only: never touches account or position state.
pub struct AdmissionGate {
    limits: &'static PolicyLimits,
}

impl AdmissionGate {
    pub fn new(limits: &'static PolicyLimits) -> Self {
        Self { limits }
    }

    pub fn evaluate(
        &self,
        candidate: &TradeCandidate,
        account: &AccountSnapshot,
        positions: &[OpenPosition],
    ) -> GateVerdict {
        self.evaluate_at(candidate, account, positions, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        candidate: &TradeCandidate,
        account: &AccountSnapshot,
        positions: &[OpenPosition],
        now: DateTime<Utc>,
    ) -> GateVerdict {
        let active: Vec<&OpenPosition> = positions.iter().filter(|p| p.is_active()).collect();

        let mut results = vec![
            self.margin_gate(account),
            self.concurrency_gate(&active),
            self.correlation_gate(candidate, &active),
        ];
        if is_crypto(&candidate.symbol) {
            results.push(self.crypto_gate(candidate, now));
        }

        let verdict = GateVerdict::from_results(results);
        if verdict.passed {
            tracing::debug!(symbol = %candidate.symbol, side = %candidate.side, "All admission gates passed");
        } else {
            tracing::info!(
                symbol = %candidate.symbol,
                side = %candidate.side,
                units = candidate.units,
                "Admission rejected: {}",
                verdict.reason()
            );
        }
        verdict
    }

    fn margin_gate(&self, account: &AccountSnapshot) -> GateResult {
        let max = self.limits.max_margin_utilization;
        let Some(utilization) = account.margin_utilization() else {
            return GateResult::fail(
                "margin",
                format!("Cannot determine margin utilization (NAV={})", account.nav),
                json!({ "nav": account.nav, "max": max }),
            );
        };

        let details = json!({ "margin_utilization": utilization, "max": max });
        if utilization > max {
            GateResult::fail(
                "margin",
                format!(
                    "Margin utilization {:.1}% exceeds Charter max {:.1}%",
                    utilization * 100.0,
                    max * 100.0
                ),
                details,
            )
        } else {
            GateResult::pass(
                "margin",
                format!("Margin utilization {:.1}% OK", utilization * 100.0),
                details,
            )
        }
    }

    fn concurrency_gate(&self, active: &[&OpenPosition]) -> GateResult {
        let max = self.limits.max_concurrent_positions;
        let details = json!({ "open_positions": active.len(), "max": max });
        if active.len() >= max {
            GateResult::fail(
                "concurrent",
                format!("Max concurrent positions reached: {}/{}", active.len(), max),
                details,
            )
        } else {
            GateResult::pass(
                "concurrent",
                format!("Open positions {}/{}", active.len(), max),
                details,
            )
        }
    }

    /// Same-side exposure in a shared quote-currency bucket blocks the candidate
    fn correlation_gate(&self, candidate: &TradeCandidate, active: &[&OpenPosition]) -> GateResult {
        let mut bucket = None;
        let mut exposure = 0.0;
        let mut overlapping = Vec::new();

        for position in active.iter().filter(|p| p.side == candidate.side) {
            if let Some(token) = shared_usd_bucket(&candidate.symbol, &position.symbol) {
                bucket.get_or_insert(token);
                exposure += position.units.abs();
                overlapping.push(position.symbol.clone());
            }
        }

        let details = json!({
            "bucket": bucket,
            "same_side_exposure": exposure,
            "positions": overlapping,
        });

        if exposure > 0.0 {
            GateResult::fail(
                "correlation",
                format!(
                    "Correlated {} exposure of {:.0} units already open in {} bucket ({})",
                    candidate.side,
                    exposure,
                    bucket.unwrap_or("USD"),
                    overlapping.join(", ")
                ),
                details,
            )
        } else {
            GateResult::pass("correlation", "No same-side correlated exposure", details)
        }
    }

    fn crypto_gate(&self, candidate: &TradeCandidate, now: DateTime<Utc>) -> GateResult {
        let required = self.limits.crypto_consensus_min;
        let hour_et = (now.hour() + 24 - ET_OFFSET_HOURS) % 24;
        let weekday = now.weekday();
        let mut failures = Vec::new();

        match candidate.consensus {
            Some(c) if c >= required => {}
            Some(c) => failures.push(format!(
                "Consensus {:.1}% below crypto minimum {:.1}%",
                c * 100.0,
                required * 100.0
            )),
            None => failures.push("No advisory consensus supplied for crypto entry".to_string()),
        }

        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            failures.push(format!("Crypto entries blocked on weekends ({weekday})"));
        }
        if !(CRYPTO_WINDOW_START_ET..CRYPTO_WINDOW_END_ET).contains(&hour_et) {
            failures.push(format!(
                "Outside trading window ({}:00-{}:00 ET): {}:00 ET",
                CRYPTO_WINDOW_START_ET, CRYPTO_WINDOW_END_ET, hour_et
            ));
        }

        let details = json!({
            "consensus": candidate.consensus,
            "required": required,
            "hour_et": hour_et,
            "weekday": weekday.to_string(),
        });

        if failures.is_empty() {
            GateResult::pass("crypto", "Crypto consensus and window OK", details)
        } else {
            GateResult::fail("crypto", failures.join(", "), details)
        }
    }
}
