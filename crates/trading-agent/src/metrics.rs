use std::time::Instant;

/// Aggregate telemetry for the agent, logged every N cycles.
pub struct AgentMetrics {
    pub cycles_run: u64,
    pub signals_generated: u64,
    pub signals_vetoed: u64,
    pub trades_executed: u64,
    pub trades_rejected: u64,
    pub total_pnl: f64,
    pub last_cycle_duration_ms: u64,
    log_interval_cycles: u64,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            signals_generated: 0,
            signals_vetoed: 0,
            trades_executed: 0,
            trades_rejected: 0,
            total_pnl: 0.0,
            last_cycle_duration_ms: 0,
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_trade_result(&mut self, pnl: f64) {
        self.total_pnl += pnl;
    }

    pub fn finish_cycle(&mut self, start: Instant) {
        self.cycles_run += 1;
        self.last_cycle_duration_ms = start.elapsed().as_millis() as u64;

        if self.log_interval_cycles > 0 && self.cycles_run % self.log_interval_cycles == 0 {
            self.log_metrics();
        }
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            signals = self.signals_generated,
            vetoed = self.signals_vetoed,
            executed = self.trades_executed,
            rejected = self.trades_rejected,
            total_pnl = self.total_pnl,
            last_cycle_ms = self.last_cycle_duration_ms,
            "agent metrics"
        );
    }
}
