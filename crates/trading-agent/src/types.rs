use chrono::{DateTime, Utc};
use risk_manager::RiskMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use trading_core::{SignalAction, StrategyConfig, Trade};

/// Outcome of one trade attempt. Callers can always tell "we chose not
/// to trade" apart from "the trade failed".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TradeAttempt {
    Executed { trade: Trade },
    RejectedByBroker { trade: Trade },
    Vetoed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSummary {
    pub action: SignalAction,
    pub strength: f64,
    pub confidence: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Plain structured status record for the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub running: bool,
    pub paper_trading: bool,
    pub symbols: Vec<String>,
    pub cycles_run: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub open_positions: usize,
    pub last_signals: HashMap<String, SignalSummary>,
    pub risk_metrics: RiskMetrics,
    pub strategy: StrategyConfig,
}
