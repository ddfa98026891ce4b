use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_core::OrderSide;

/// Capital-protection limits. Passed in at construction; there is no
/// ambient global configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Starting budget the daily limits are measured against
    pub trading_budget: f64,
    /// Fraction of the budget risked per trade
    pub max_risk_per_trade: f64,
    /// Fraction of the budget that may be lost in one day
    pub daily_loss_limit: f64,
    /// Fraction of the budget allowed in a single position
    pub max_position_pct: f64,
    /// Smallest order value worth sending to the broker
    pub min_trade_amount: f64,
    pub max_trades_per_day: u32,
    /// Signals below this confidence are vetoed outright
    pub min_confidence: f64,
    /// ATR multiple used for stop distance and derived stops
    pub atr_multiplier: f64,
    /// Take-profit distance as a multiple of the stop distance
    pub risk_reward_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            trading_budget: 100.0,
            max_risk_per_trade: 0.02,
            daily_loss_limit: 0.10,
            max_position_pct: 0.10,
            min_trade_amount: 5.0,
            max_trades_per_day: 20,
            min_confidence: 0.3,
            atr_multiplier: 2.0,
            risk_reward_ratio: 2.0,
        }
    }
}

/// Why the gate refused a trade. A veto is a normal decision outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum VetoReason {
    DailyTradeLimit { count: u32, limit: u32 },
    DailyLossLimit { loss: f64, limit: f64 },
    ConfidenceTooLow { confidence: f64, floor: f64 },
    TradeTooSmall { value: f64, minimum: f64 },
    InsufficientFunds { needed: f64, available: f64 },
    NoPositionToSell { symbol: String },
    PositionAlreadyOpen { symbol: String },
    NoVolatilityData { symbol: String },
    NoPrice { symbol: String },
    NotActionable,
}

impl std::fmt::Display for VetoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VetoReason::DailyTradeLimit { count, limit } => {
                write!(f, "Daily trade limit reached ({count}/{limit})")
            }
            VetoReason::DailyLossLimit { loss, limit } => {
                write!(f, "Daily loss limit reached (${loss:.2} of ${limit:.2})")
            }
            VetoReason::ConfidenceTooLow { confidence, floor } => {
                write!(f, "Confidence {confidence:.2} below floor {floor:.2}")
            }
            VetoReason::TradeTooSmall { value, minimum } => {
                write!(f, "Trade value too small (${value:.2} < ${minimum:.2})")
            }
            VetoReason::InsufficientFunds { needed, available } => {
                write!(f, "Insufficient funds (need ${needed:.2}, have ${available:.2})")
            }
            VetoReason::NoPositionToSell { symbol } => {
                write!(f, "No {symbol} position to sell")
            }
            VetoReason::PositionAlreadyOpen { symbol } => {
                write!(f, "Position already open in {symbol}")
            }
            VetoReason::NoVolatilityData { symbol } => {
                write!(f, "No volatility data for {symbol}, cannot size a stop")
            }
            VetoReason::NoPrice { symbol } => {
                write!(f, "No usable price for {symbol}")
            }
            VetoReason::NotActionable => write!(f, "Hold signals are not tradable"),
        }
    }
}

/// Approved trade with gate-computed size and exit levels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizedTrade {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Notes about silently corrected inputs (e.g. a stop on the wrong
    /// side of price replaced with the ATR-derived one)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<String>,
}

/// The gate's answer to a proposed trade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RiskVerdict {
    Approved(SizedTrade),
    Rejected { reason: VetoReason },
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Read-only aggregation for the status surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub daily_trade_count: u32,
    pub daily_trade_limit: u32,
    pub daily_loss: f64,
    pub daily_loss_limit: f64,
    pub daily_loss_percentage: f64,
    pub open_positions: usize,
    pub total_position_value: f64,
    pub available_cash: f64,
    pub portfolio_value: f64,
    pub risk_level: RiskLevel,
    pub trading_enabled: bool,
}

/// An open position whose stop has been crossed by the market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopHit {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub stop_loss: f64,
    pub current_price: f64,
}

/// One gate-recorded trade outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedTrade {
    pub trade_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub pnl: f64,
    pub timestamp: DateTime<Utc>,
}
