use serde::{Deserialize, Serialize};

/// Outcome of a single gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: String,
    pub passed: bool,
    pub reason: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl GateResult {
    pub fn pass(gate: &str, reason: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            gate: gate.to_string(),
            passed: true,
            reason: reason.into(),
            details,
        }
    }

    pub fn fail(gate: &str, reason: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            gate: gate.to_string(),
            passed: false,
            reason: reason.into(),
            details,
        }
    }
}

/// All gate results for one candidate, ANDed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub results: Vec<GateResult>,
}

impl GateVerdict {
    pub fn from_results(results: Vec<GateResult>) -> Self {
        Self {
            passed: results.iter().all(|r| r.passed),
            results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// "gate: reason; gate: reason" for every failing gate, empty when all passed
    pub fn reason(&self) -> String {
        self.failures()
            .map(|r| format!("{}: {}", r.gate, r.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn result(&self, gate: &str) -> Option<&GateResult> {
        self.results.iter().find(|r| r.gate == gate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerCheck {
    pub can_trade: bool,
    pub reason: String,
    pub daily_pnl_percent: f64,
    pub trades_today: u32,
    pub breakers_triggered: Vec<String>,
}
