use std::time::Instant;

/// Structured telemetry for the control loop.
/// Counts what each cycle produced and how long it took.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    pub cycles_run: u64,
    pub cycles_skipped_breaker: u64,
    pub symbols_skipped: u64,
    pub candidates_generated: u64,
    pub charter_rejections: u64,
    pub gate_rejections: u64,
    pub trades_placed: u64,
    pub trades_failed: u64,
    pub latency_breaches: u64,
    pub positions_closed: u64,
    pub errors: u64,

    pub last_cycle_duration_ms: u64,
    log_interval_cycles: u64,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            log_interval_cycles,
            ..Default::default()
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_cycle_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;

        if self.log_interval_cycles > 0 && self.cycles_run.is_multiple_of(self.log_interval_cycles) {
            self.log_metrics();
        }
    }

    /// Share of generated candidates that reached the broker (0-100%)
    pub fn admission_rate(&self) -> f64 {
        if self.candidates_generated == 0 {
            return 0.0;
        }
        (self.trades_placed as f64 / self.candidates_generated as f64) * 100.0
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            cycles_skipped_breaker = self.cycles_skipped_breaker,
            symbols_skipped = self.symbols_skipped,
            candidates = self.candidates_generated,
            charter_rejections = self.charter_rejections,
            gate_rejections = self.gate_rejections,
            trades_placed = self.trades_placed,
            trades_failed = self.trades_failed,
            latency_breaches = self.latency_breaches,
            positions_closed = self.positions_closed,
            errors = self.errors,
            admission_rate = format!("{:.1}%", self.admission_rate()),
            last_cycle_ms = self.last_cycle_duration_ms,
            "Agent metrics summary"
        );
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles_run": self.cycles_run,
            "cycles_skipped_breaker": self.cycles_skipped_breaker,
            "symbols_skipped": self.symbols_skipped,
            "candidates_generated": self.candidates_generated,
            "charter_rejections": self.charter_rejections,
            "gate_rejections": self.gate_rejections,
            "trades_placed": self.trades_placed,
            "trades_failed": self.trades_failed,
            "latency_breaches": self.latency_breaches,
            "positions_closed": self.positions_closed,
            "errors": self.errors,
        })
    }
}
