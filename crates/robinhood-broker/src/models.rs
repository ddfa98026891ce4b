use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard list envelope used by the trading API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account_number: String,
    pub status: String,
    pub buying_power: String,
    pub buying_power_currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingResponse {
    pub asset_code: String,
    pub total_quantity: String,
    pub quantity_available_for_trading: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub asset_code: String,
    pub quote_code: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestBidAsk {
    pub symbol: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub bid_inclusive_of_sell_spread: Option<String>,
    #[serde(default)]
    pub ask_inclusive_of_buy_spread: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatedPrice {
    pub symbol: String,
    pub side: String,
    pub price: String,
    pub quantity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketOrderConfig {
    pub asset_quantity: String,
}

/// Order creation payload. Serialized exactly once; the same byte
/// sequence is signed and transmitted.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub side: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub market_order_config: MarketOrderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    /// open, filled, canceled, rejected, partially_filled
    pub state: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub filled_asset_quantity: Option<String>,
    #[serde(default)]
    pub average_price: Option<String>,
}
