use anyhow::{bail, Context, Result};
use risk_manager::RiskConfig;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Risk parameters (conservative settings)
    pub trading_budget: f64,        // $100
    pub max_risk_per_trade: f64,    // 2%
    pub daily_loss_limit: f64,      // 10%
    pub max_position_pct: f64,      // 10% of budget per position
    pub min_trade_amount: f64,      // $5 minimum order
    pub max_trades_per_day: u32,    // 20
    pub min_confidence: f64,        // 0.3 gate floor
    pub atr_multiplier: f64,        // 2.0
    pub risk_reward_ratio: f64,     // 2.0

    // Trading parameters
    pub symbols: Vec<String>,
    pub cycle_interval_secs: u64,      // 60 (valid range 30-180)
    pub min_trade_interval_secs: u64,  // 300 per-symbol throttle
    pub retrain_hours: i64,            // 24
    pub paper_trading: bool,           // true by default

    // Health monitor
    pub monitor_check_interval_secs: u64, // 60
    pub monitor_max_failures: u32,        // 5 consecutive ping failures
    pub monitor_stall_secs: u64,          // 1800 (30 min without a cycle)
    pub monitor_max_restarts: u32,        // 3, then manual intervention

    // External services
    pub data_service_url: String,      // market data / indicator supplier
    pub predictor_url: String,         // ensemble classifier service

    // Broker credentials (live mode only)
    pub robinhood_api_key: Option<String>,
    pub robinhood_private_key: Option<String>,
    pub robinhood_base_url: Option<String>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            trading_budget: env::var("TRADING_BUDGET")
                .unwrap_or_else(|_| "100.0".to_string())
                .parse()?,
            max_risk_per_trade: env::var("MAX_RISK_PER_TRADE")
                .unwrap_or_else(|_| "0.02".to_string())
                .parse()?,
            daily_loss_limit: env::var("DAILY_LOSS_LIMIT")
                .unwrap_or_else(|_| "0.10".to_string())
                .parse()?,
            max_position_pct: env::var("MAX_POSITION_PCT")
                .unwrap_or_else(|_| "0.10".to_string())
                .parse()?,
            min_trade_amount: env::var("MIN_TRADE_AMOUNT")
                .unwrap_or_else(|_| "5.0".to_string())
                .parse()?,
            max_trades_per_day: env::var("MAX_TRADES_PER_DAY")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            min_confidence: env::var("MIN_CONFIDENCE")
                .unwrap_or_else(|_| "0.3".to_string())
                .parse()?,
            atr_multiplier: env::var("ATR_MULTIPLIER")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
            risk_reward_ratio: env::var("RISK_REWARD_RATIO")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,

            symbols: env::var("SYMBOLS")
                .unwrap_or_else(|_| "BTC-USD,ETH-USD".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            cycle_interval_secs: env::var("CYCLE_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            min_trade_interval_secs: env::var("MIN_TRADE_INTERVAL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            retrain_hours: env::var("RETRAIN_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            paper_trading: env::var("PAPER_TRADING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            monitor_check_interval_secs: env::var("MONITOR_CHECK_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            monitor_max_failures: env::var("MONITOR_MAX_FAILURES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            monitor_stall_secs: env::var("MONITOR_STALL_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()?,
            monitor_max_restarts: env::var("MONITOR_MAX_RESTARTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,

            data_service_url: env::var("DATA_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            predictor_url: env::var("PREDICTOR_URL")
                .unwrap_or_else(|_| "http://localhost:8004".to_string()),

            robinhood_api_key: env::var("ROBINHOOD_API_KEY").ok(),
            robinhood_private_key: env::var("ROBINHOOD_PRIVATE_KEY").ok(),
            robinhood_base_url: env::var("ROBINHOOD_BASE_URL").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(30..=180).contains(&self.cycle_interval_secs) {
            bail!(
                "CYCLE_INTERVAL must be between 30 and 180 seconds, got {}",
                self.cycle_interval_secs
            );
        }
        if self.trading_budget <= 0.0 {
            bail!("TRADING_BUDGET must be positive");
        }
        if !(0.0..=1.0).contains(&self.max_risk_per_trade)
            || !(0.0..=1.0).contains(&self.daily_loss_limit)
            || !(0.0..=1.0).contains(&self.max_position_pct)
        {
            bail!("risk fractions must be within [0, 1]");
        }
        if self.symbols.is_empty() {
            bail!("SYMBOLS must name at least one trading pair");
        }
        if !self.paper_trading {
            self.robinhood_api_key
                .as_ref()
                .context("ROBINHOOD_API_KEY required for live trading")?;
            self.robinhood_private_key
                .as_ref()
                .context("ROBINHOOD_PRIVATE_KEY required for live trading")?;
        }
        Ok(())
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            trading_budget: self.trading_budget,
            max_risk_per_trade: self.max_risk_per_trade,
            daily_loss_limit: self.daily_loss_limit,
            max_position_pct: self.max_position_pct,
            min_trade_amount: self.min_trade_amount,
            max_trades_per_day: self.max_trades_per_day,
            min_confidence: self.min_confidence,
            atr_multiplier: self.atr_multiplier,
            risk_reward_ratio: self.risk_reward_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AgentConfig {
        AgentConfig {
            trading_budget: 100.0,
            max_risk_per_trade: 0.02,
            daily_loss_limit: 0.10,
            max_position_pct: 0.10,
            min_trade_amount: 5.0,
            max_trades_per_day: 20,
            min_confidence: 0.3,
            atr_multiplier: 2.0,
            risk_reward_ratio: 2.0,
            symbols: vec!["BTC-USD".to_string()],
            cycle_interval_secs: 60,
            min_trade_interval_secs: 300,
            retrain_hours: 24,
            paper_trading: true,
            monitor_check_interval_secs: 60,
            monitor_max_failures: 5,
            monitor_stall_secs: 1800,
            monitor_max_restarts: 3,
            data_service_url: "http://localhost:8002".to_string(),
            predictor_url: "http://localhost:8004".to_string(),
            robinhood_api_key: None,
            robinhood_private_key: None,
            robinhood_base_url: None,
        }
    }

    #[test]
    fn cycle_interval_bounds_enforced() {
        let mut config = base_config();
        config.cycle_interval_secs = 10;
        assert!(config.validate().is_err());

        config.cycle_interval_secs = 181;
        assert!(config.validate().is_err());

        config.cycle_interval_secs = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn live_mode_requires_credentials() {
        let mut config = base_config();
        config.paper_trading = false;
        assert!(config.validate().is_err());

        config.robinhood_api_key = Some("key".to_string());
        config.robinhood_private_key = Some("seed".to_string());
        assert!(config.validate().is_ok());
    }
}
