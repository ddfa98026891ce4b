use std::collections::HashMap;

use async_trait::async_trait;
use broker_core::{
    BrokerAccount, BrokerClient, BrokerError, BrokerHolding, BrokerOrder, BrokerOrderRequest,
    BrokerResult,
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory ledger state. One lock guards the whole ledger so a fill
/// debits cash and credits the position atomically.
struct Ledger {
    cash: f64,
    /// asset code -> quantity held
    positions: HashMap<String, f64>,
    /// symbol -> last observed market price
    marks: HashMap<String, f64>,
    orders: Vec<BrokerOrder>,
}

/// Simulated broker: immediate fills against the last observed market
/// price, no real network interaction. Orders with no known price, or
/// buys exceeding cash, are rejected rather than guessed at.
pub struct PaperBroker {
    ledger: Mutex<Ledger>,
}

impl PaperBroker {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                cash: starting_cash,
                positions: HashMap::new(),
                marks: HashMap::new(),
                orders: Vec::new(),
            }),
        }
    }

    fn asset_code(symbol: &str) -> String {
        symbol.split('-').next().unwrap_or(symbol).to_string()
    }

    /// Cash plus mark-to-market of all positions
    pub async fn total_value(&self) -> f64 {
        let ledger = self.ledger.lock().await;
        let positions_value: f64 = ledger
            .positions
            .iter()
            .map(|(code, qty)| {
                let mark = ledger
                    .marks
                    .iter()
                    .find(|(symbol, _)| Self::asset_code(symbol) == *code)
                    .map(|(_, price)| *price)
                    .unwrap_or(0.0);
                qty * mark
            })
            .sum();
        ledger.cash + positions_value
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn get_account(&self) -> BrokerResult<BrokerAccount> {
        let ledger = self.ledger.lock().await;
        Ok(BrokerAccount {
            account_number: "paper".to_string(),
            status: "active".to_string(),
            currency: "USD".to_string(),
            buying_power: format!("{:.8}", ledger.cash),
        })
    }

    async fn get_holdings(&self) -> BrokerResult<Vec<BrokerHolding>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .positions
            .iter()
            .filter(|(_, qty)| **qty > 0.0)
            .map(|(code, qty)| BrokerHolding {
                asset_code: code.clone(),
                total_quantity: format!("{qty:.8}"),
                quantity_available_for_trading: format!("{qty:.8}"),
            })
            .collect())
    }

    async fn submit_market_order(&self, order: BrokerOrderRequest) -> BrokerResult<BrokerOrder> {
        let mut ledger = self.ledger.lock().await;

        let quantity = order.asset_quantity.to_f64().unwrap_or(0.0);
        let code = Self::asset_code(&order.symbol);
        let mark = ledger.marks.get(&order.symbol).copied();

        let mut record = BrokerOrder {
            id: format!("paper-{}", Uuid::new_v4()),
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side.to_string(),
            order_type: "market".to_string(),
            state: "rejected".to_string(),
            created_at: Utc::now(),
            filled_asset_quantity: None,
            average_price: None,
        };

        let Some(price) = mark.filter(|p| p.is_finite() && *p > 0.0) else {
            tracing::warn!(symbol = %order.symbol, "paper order rejected: no market price observed");
            ledger.orders.push(record.clone());
            return Ok(record);
        };

        match order.side {
            broker_core::BrokerOrderSide::Buy => {
                let cost = quantity * price;
                if cost <= ledger.cash && quantity > 0.0 {
                    ledger.cash -= cost;
                    *ledger.positions.entry(code).or_insert(0.0) += quantity;
                    record.state = "filled".to_string();
                    record.filled_asset_quantity = Some(format!("{quantity:.8}"));
                    record.average_price = Some(format!("{price:.8}"));
                    tracing::info!(
                        symbol = %order.symbol, quantity, price,
                        "paper trade executed: buy"
                    );
                } else {
                    tracing::warn!(
                        symbol = %order.symbol, cost, cash = ledger.cash,
                        "paper order rejected: insufficient funds"
                    );
                }
            }
            broker_core::BrokerOrderSide::Sell => {
                let held = ledger.positions.get(&code).copied().unwrap_or(0.0);
                // Never oversold: fill only what is held
                let fill_quantity = quantity.min(held);
                if fill_quantity > 0.0 {
                    ledger.cash += fill_quantity * price;
                    if let Some(position) = ledger.positions.get_mut(&code) {
                        *position -= fill_quantity;
                        if *position <= 1e-12 {
                            ledger.positions.remove(&code);
                        }
                    }
                    record.state = "filled".to_string();
                    record.filled_asset_quantity = Some(format!("{fill_quantity:.8}"));
                    record.average_price = Some(format!("{price:.8}"));
                    tracing::info!(
                        symbol = %order.symbol, quantity = fill_quantity, price,
                        "paper trade executed: sell"
                    );
                } else {
                    tracing::warn!(symbol = %order.symbol, "paper order rejected: nothing held");
                }
            }
        }

        ledger.orders.push(record.clone());
        Ok(record)
    }

    async fn get_order(&self, order_id: &str) -> BrokerResult<BrokerOrder> {
        let ledger = self.ledger.lock().await;
        ledger
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidResponse(format!("unknown order {order_id}")))
    }

    async fn get_orders(&self, limit: Option<usize>) -> BrokerResult<Vec<BrokerOrder>> {
        let ledger = self.ledger.lock().await;
        let mut orders: Vec<_> = ledger.orders.iter().rev().cloned().collect();
        if let Some(limit) = limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }

    async fn cancel_order(&self, _order_id: &str) -> BrokerResult<()> {
        // Paper fills are immediate; there is never anything to cancel
        Ok(())
    }

    async fn ping(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn note_market_price(&self, symbol: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            let mut ledger = self.ledger.lock().await;
            ledger.marks.insert(symbol.to_string(), price);
        }
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::BrokerOrderSide;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn qty(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn round_trip_restores_cash() {
        let broker = PaperBroker::new(100.0);
        broker.note_market_price("BTC-USD", 50_000.0).await;

        let buy = broker
            .submit_market_order(BrokerOrderRequest::market(
                "BTC-USD",
                BrokerOrderSide::Buy,
                qty("0.001"),
            ))
            .await
            .unwrap();
        assert_eq!(buy.state, "filled");

        let sell = broker
            .submit_market_order(BrokerOrderRequest::market(
                "BTC-USD",
                BrokerOrderSide::Sell,
                qty("0.001"),
            ))
            .await
            .unwrap();
        assert_eq!(sell.state, "filled");

        let account = broker.get_account().await.unwrap();
        let cash: f64 = account.buying_power.parse().unwrap();
        assert!((cash - 100.0).abs() < 1e-9, "cash is {cash}");
        assert!(broker.get_holdings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn buy_beyond_cash_is_rejected() {
        let broker = PaperBroker::new(10.0);
        broker.note_market_price("BTC-USD", 50_000.0).await;

        let order = broker
            .submit_market_order(BrokerOrderRequest::market(
                "BTC-USD",
                BrokerOrderSide::Buy,
                qty("0.01"),
            ))
            .await
            .unwrap();

        assert_eq!(order.state, "rejected");
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.buying_power.parse::<f64>().unwrap(), 10.0);
    }

    #[tokio::test]
    async fn sell_clamped_to_held_quantity() {
        let broker = PaperBroker::new(100.0);
        broker.note_market_price("ETH-USD", 2_000.0).await;

        broker
            .submit_market_order(BrokerOrderRequest::market(
                "ETH-USD",
                BrokerOrderSide::Buy,
                qty("0.01"),
            ))
            .await
            .unwrap();

        // Ask to sell ten times the holding; only the holding fills
        let sell = broker
            .submit_market_order(BrokerOrderRequest::market(
                "ETH-USD",
                BrokerOrderSide::Sell,
                qty("0.1"),
            ))
            .await
            .unwrap();

        assert_eq!(sell.state, "filled");
        let filled: f64 = sell.filled_asset_quantity.unwrap().parse().unwrap();
        assert!((filled - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_with_no_position_is_rejected() {
        let broker = PaperBroker::new(100.0);
        broker.note_market_price("BTC-USD", 50_000.0).await;

        let order = broker
            .submit_market_order(BrokerOrderRequest::market(
                "BTC-USD",
                BrokerOrderSide::Sell,
                qty("0.001"),
            ))
            .await
            .unwrap();
        assert_eq!(order.state, "rejected");
    }

    #[tokio::test]
    async fn order_without_observed_price_is_rejected() {
        let broker = PaperBroker::new(100.0);
        let order = broker
            .submit_market_order(BrokerOrderRequest::market(
                "BTC-USD",
                BrokerOrderSide::Buy,
                qty("0.001"),
            ))
            .await
            .unwrap();
        assert_eq!(order.state, "rejected");
    }

    #[tokio::test]
    async fn total_value_marks_to_market() {
        let broker = PaperBroker::new(100.0);
        broker.note_market_price("BTC-USD", 50_000.0).await;
        broker
            .submit_market_order(BrokerOrderRequest::market(
                "BTC-USD",
                BrokerOrderSide::Buy,
                qty("0.001"),
            ))
            .await
            .unwrap();

        // 50 in cash + 0.001 BTC at the new mark of 60k = 110
        broker.note_market_price("BTC-USD", 60_000.0).await;
        let total = broker.total_value().await;
        assert!((total - 110.0).abs() < 1e-9, "total is {total}");
    }
}
