use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest market snapshot for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    #[serde(default)]
    pub change_24h: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time indicator values for one symbol.
/// Every field is optional: a missing or NaN indicator degrades the
/// affected rule to neutral rather than failing the cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub prev_macd: Option<f64>,
    pub prev_macd_signal: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub atr: Option<f64>,
    /// Share of positive news items in [0, 1], when sentiment data exists
    pub sentiment_ratio: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl IndicatorSnapshot {
    /// Returns the field only if it is present and finite.
    pub fn finite(value: Option<f64>) -> Option<f64> {
        value.filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "buy"),
            SignalAction::Sell => write!(f, "sell"),
            SignalAction::Hold => write!(f, "hold"),
        }
    }
}

/// Directional decision for one symbol, produced fresh each cycle.
/// Immutable once emitted; the next cycle's signal supersedes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub action: SignalAction,
    /// Conviction magnitude in [0, 1], distinct from confidence
    pub strength: f64,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Pending is the only non-terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// One order attempt and its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub filled_price: Option<f64>,
    pub filled_quantity: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Open position; at most one per symbol at any time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<f64>,
}

/// Account snapshot; recomputed whole from broker or ledger state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub total_value: f64,
    pub available_cash: f64,
    pub positions: HashMap<String, f64>,
    pub daily_pnl: f64,
    pub total_pnl: f64,
    pub last_updated: DateTime<Utc>,
}

impl Portfolio {
    pub fn position_quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }
}

/// Hot-swappable strategy configuration. Updates produce a fresh
/// snapshot; a cycle already in flight keeps reading the one it started
/// with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
    #[serde(default)]
    pub risk_limits: HashMap<String, f64>,
}

impl StrategyConfig {
    pub fn parameter(&self, key: &str, default: f64) -> f64 {
        self.parameters.get(key).copied().unwrap_or(default)
    }

    pub fn risk_limit(&self, key: &str, default: f64) -> f64 {
        self.risk_limits.get(key).copied().unwrap_or(default)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let mut parameters = HashMap::new();
        parameters.insert("rsi_oversold".to_string(), 30.0);
        parameters.insert("rsi_overbought".to_string(), 70.0);
        parameters.insert("technical_weight".to_string(), 0.3);
        parameters.insert("ml_weight".to_string(), 0.7);
        parameters.insert("buy_threshold".to_string(), 1.2);
        parameters.insert("sell_threshold".to_string(), 0.8);
        parameters.insert("confidence_threshold".to_string(), 0.55);

        let mut risk_limits = HashMap::new();
        risk_limits.insert("stop_loss_pct".to_string(), 0.02);
        risk_limits.insert("take_profit_pct".to_string(), 0.05);

        Self {
            name: "combined".to_string(),
            enabled: true,
            parameters,
            risk_limits,
        }
    }
}

/// Ensemble classifier output classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictedClass {
    Sell,
    Hold,
    Buy,
}

impl PredictedClass {
    /// Numeric class score used by the composite signal (sell=0, hold=1, buy=2)
    pub fn score(&self) -> f64 {
        match self {
            PredictedClass::Sell => 0.0,
            PredictedClass::Hold => 1.0,
            PredictedClass::Buy => 2.0,
        }
    }

    pub fn from_label(label: u8) -> Option<Self> {
        match label {
            0 => Some(PredictedClass::Sell),
            1 => Some(PredictedClass::Hold),
            2 => Some(PredictedClass::Buy),
            _ => None,
        }
    }
}
