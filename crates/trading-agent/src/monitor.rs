use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::bot::TradingBot;
use crate::config::AgentConfig;
use crate::executor::ExecutionAdapter;

/// Watchdog for unattended operation. Pings broker connectivity and
/// watches cycle progress; a stalled or repeatedly failing bot gets a
/// stop/start restart. Restarts are capped: past the cap the monitor
/// only raises a critical alert and leaves recovery to a human.
pub struct HealthMonitor {
    bot: Arc<TradingBot>,
    executor: Arc<ExecutionAdapter>,
    check_interval: Duration,
    max_consecutive_failures: u32,
    stall_threshold: Duration,
    max_restarts: u32,
}

impl HealthMonitor {
    pub fn new(bot: Arc<TradingBot>, executor: Arc<ExecutionAdapter>, config: &AgentConfig) -> Self {
        Self {
            bot,
            executor,
            check_interval: Duration::from_secs(config.monitor_check_interval_secs),
            max_consecutive_failures: config.monitor_max_failures,
            stall_threshold: Duration::from_secs(config.monitor_stall_secs),
            max_restarts: config.monitor_max_restarts,
        }
    }

    /// Run the monitoring loop forever. Spawn this on its own task.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.check_interval.as_secs(),
            "health monitor started"
        );

        let mut consecutive_failures: u32 = 0;
        let mut restart_attempts: u32 = 0;
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if self.executor.ping().await {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
                tracing::warn!(
                    consecutive_failures,
                    max = self.max_consecutive_failures,
                    "broker connectivity check failed"
                );
            }

            let stalled = self.bot.is_running() && self.cycle_stalled();

            if consecutive_failures >= self.max_consecutive_failures || stalled {
                if restart_attempts >= self.max_restarts {
                    // Circuit breaker against restart storms: alert only
                    tracing::error!(
                        restart_attempts,
                        "CRITICAL: restart cap reached, manual intervention required"
                    );
                    continue;
                }

                restart_attempts += 1;
                tracing::warn!(
                    restart_attempts,
                    stalled,
                    consecutive_failures,
                    "restarting trading bot"
                );

                self.bot.stop().await;
                tokio::time::sleep(Duration::from_secs(5)).await;
                match self.bot.start(None).await {
                    Ok(()) => {
                        consecutive_failures = 0;
                        tracing::info!("trading bot restarted");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "trading bot restart failed");
                    }
                }
            }
        }
    }

    fn cycle_stalled(&self) -> bool {
        match self.bot.last_cycle_at() {
            // No cycle yet: give the freshly started loop a full stall
            // window before judging it
            None => false,
            Some(last) => {
                let elapsed = (Utc::now() - last).num_seconds().max(0) as u64;
                elapsed > self.stall_threshold.as_secs()
            }
        }
    }
}
