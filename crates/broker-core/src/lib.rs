use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Unified broker types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub account_number: String,
    pub status: String,
    pub currency: String,
    /// Cash available for new orders, as the wire string
    pub buying_power: String,
}

impl BrokerAccount {
    pub fn buying_power_decimal(&self) -> Decimal {
        Decimal::from_str(&self.buying_power).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerHolding {
    pub asset_code: String,
    pub total_quantity: String,
    pub quantity_available_for_trading: String,
}

impl BrokerHolding {
    pub fn total_quantity_decimal(&self) -> Decimal {
        Decimal::from_str(&self.total_quantity).unwrap_or_default()
    }
    pub fn available_quantity_decimal(&self) -> Decimal {
        Decimal::from_str(&self.quantity_available_for_trading).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerOrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for BrokerOrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerOrderSide::Buy => write!(f, "buy"),
            BrokerOrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderRequest {
    /// Caller-supplied idempotency key
    pub client_order_id: String,
    pub symbol: String,
    pub side: BrokerOrderSide,
    pub asset_quantity: Decimal,
}

impl BrokerOrderRequest {
    pub fn market(symbol: impl Into<String>, side: BrokerOrderSide, qty: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            asset_quantity: qty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    /// Broker order state: open, filled, canceled, rejected, ...
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub filled_asset_quantity: Option<String>,
    pub average_price: Option<String>,
}

impl BrokerOrder {
    pub fn filled_quantity_decimal(&self) -> Option<Decimal> {
        self.filled_asset_quantity
            .as_ref()
            .and_then(|q| Decimal::from_str(q).ok())
    }
    pub fn average_price_decimal(&self) -> Option<Decimal> {
        self.average_price
            .as_ref()
            .and_then(|p| Decimal::from_str(p).ok())
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Missing or invalid credentials, or signature rejection. Fatal to
    /// live order placement; never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Request-rate ceiling; the caller should wait, not fail
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer from the broker
    #[error("Broker API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid broker response: {0}")]
    InvalidResponse(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

// ---------------------------------------------------------------------------
// Broker trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Account information (cash, status)
    async fn get_account(&self) -> BrokerResult<BrokerAccount>;

    /// All current asset holdings
    async fn get_holdings(&self) -> BrokerResult<Vec<BrokerHolding>>;

    /// Submit a market order
    async fn submit_market_order(&self, order: BrokerOrderRequest) -> BrokerResult<BrokerOrder>;

    /// Fetch a single order by broker id
    async fn get_order(&self, order_id: &str) -> BrokerResult<BrokerOrder>;

    /// Recent orders, newest first
    async fn get_orders(&self, limit: Option<usize>) -> BrokerResult<Vec<BrokerOrder>>;

    /// Cancel an open order
    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()>;

    /// Cheap connectivity check used by the health monitor
    async fn ping(&self) -> BrokerResult<()>;

    /// Latest observed market price for a symbol. Simulated brokers use
    /// it as the fill/mark price; live brokers ignore it.
    async fn note_market_price(&self, _symbol: &str, _price: f64) {}

    /// Whether this is a simulated account
    fn is_paper(&self) -> bool;

    /// Broker name for logging
    fn broker_name(&self) -> &str;
}
