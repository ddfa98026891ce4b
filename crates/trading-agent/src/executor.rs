use std::collections::HashMap;
use std::sync::Arc;

use broker_core::{BrokerClient, BrokerError, BrokerOrderRequest, BrokerOrderSide};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use trading_core::{OrderSide, OrderStatus, OrderType, Portfolio, Trade};
use uuid::Uuid;

/// Dual-mode execution facade. Same interface over the live broker and
/// the paper ledger; every failure is converted into a rejected Trade
/// plus a structured log entry — nothing propagates past this boundary.
pub struct ExecutionAdapter {
    broker: Arc<dyn BrokerClient>,
    starting_budget: f64,
    /// Last observed price per symbol, for mark-to-market
    marks: DashMap<String, f64>,
    history: Mutex<Vec<Trade>>,
    last_good_portfolio: Mutex<Option<Portfolio>>,
    /// (UTC date, portfolio value at day start) for daily P&L
    day_start: Mutex<Option<(NaiveDate, f64)>>,
}

impl ExecutionAdapter {
    pub fn new(broker: Arc<dyn BrokerClient>, starting_budget: f64) -> Self {
        Self {
            broker,
            starting_budget,
            marks: DashMap::new(),
            history: Mutex::new(Vec::new()),
            last_good_portfolio: Mutex::new(None),
            day_start: Mutex::new(None),
        }
    }

    pub fn is_paper(&self) -> bool {
        self.broker.is_paper()
    }

    pub fn broker_name(&self) -> &str {
        self.broker.broker_name()
    }

    /// Record the cycle's observed price and forward it to the broker
    /// (the paper ledger fills against it; live brokers ignore it).
    pub async fn note_price(&self, symbol: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.marks.insert(symbol.to_string(), price);
            self.broker.note_market_price(symbol, price).await;
        }
    }

    /// Submit a market order. Never returns an error: broker acceptance
    /// yields a pending/filled trade keyed by the broker id, every
    /// failure path yields a rejected trade.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price_hint: f64,
    ) -> Trade {
        let broker_side = match side {
            OrderSide::Buy => BrokerOrderSide::Buy,
            OrderSide::Sell => BrokerOrderSide::Sell,
        };

        let trade = match Decimal::from_f64(quantity).filter(|d| d.is_sign_positive() && !d.is_zero())
        {
            None => {
                tracing::error!(symbol, quantity, "order rejected: quantity not representable");
                self.rejected_trade(symbol, side, quantity, price_hint)
            }
            Some(decimal_quantity) => {
                let request = BrokerOrderRequest::market(symbol, broker_side, decimal_quantity);
                match self.broker.submit_market_order(request).await {
                    Ok(order) => {
                        let status = map_order_state(&order.state);
                        Trade {
                            id: order.id,
                            symbol: symbol.to_string(),
                            side,
                            order_type: OrderType::Market,
                            quantity,
                            price: Some(price_hint),
                            status,
                            filled_price: order
                                .average_price
                                .as_deref()
                                .and_then(|p| p.parse().ok()),
                            filled_quantity: order
                                .filled_asset_quantity
                                .as_deref()
                                .and_then(|q| q.parse().ok()),
                            timestamp: Utc::now(),
                        }
                    }
                    Err(e) => {
                        match &e {
                            BrokerError::Auth(detail) => {
                                tracing::error!(symbol, %side, detail = %detail, "order failed: authentication");
                            }
                            other => {
                                tracing::error!(symbol, %side, error = %other, "order failed");
                            }
                        }
                        self.rejected_trade(symbol, side, quantity, price_hint)
                    }
                }
            }
        };

        self.history.lock().await.push(trade.clone());
        trade
    }

    fn rejected_trade(&self, symbol: &str, side: OrderSide, quantity: f64, price: f64) -> Trade {
        Trade {
            id: format!("rejected-{}", Uuid::new_v4()),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: Some(price),
            status: OrderStatus::Rejected,
            filled_price: None,
            filled_quantity: None,
            timestamp: Utc::now(),
        }
    }

    /// Portfolio snapshot recomputed from broker state. On any fetch
    /// failure the most recent known-good snapshot is returned instead
    /// of raising.
    pub async fn get_portfolio(&self) -> Portfolio {
        match self.fetch_portfolio().await {
            Ok(portfolio) => {
                *self.last_good_portfolio.lock().await = Some(portfolio.clone());
                portfolio
            }
            Err(e) => {
                tracing::warn!(error = %e, "portfolio fetch failed, using last known-good state");
                self.last_good_portfolio.lock().await.clone().unwrap_or(Portfolio {
                    total_value: self.starting_budget,
                    available_cash: self.starting_budget,
                    positions: HashMap::new(),
                    daily_pnl: 0.0,
                    total_pnl: 0.0,
                    last_updated: Utc::now(),
                })
            }
        }
    }

    async fn fetch_portfolio(&self) -> Result<Portfolio, BrokerError> {
        let account = self.broker.get_account().await?;
        let holdings = self.broker.get_holdings().await?;

        let available_cash: f64 = account.buying_power.parse().unwrap_or(0.0);

        let mut positions = HashMap::new();
        let mut positions_value = 0.0;
        for holding in holdings {
            let quantity: f64 = holding.total_quantity.parse().unwrap_or(0.0);
            if quantity <= 0.0 {
                continue;
            }
            let symbol = self.symbol_for_asset(&holding.asset_code);
            let mark = self.marks.get(&symbol).map(|m| *m).unwrap_or(0.0);
            positions_value += quantity * mark;
            positions.insert(symbol, quantity);
        }

        let total_value = available_cash + positions_value;

        let today = Utc::now().date_naive();
        let mut day_start = self.day_start.lock().await;
        let daily_pnl = match *day_start {
            Some((date, start_value)) if date == today => total_value - start_value,
            _ => {
                *day_start = Some((today, total_value));
                0.0
            }
        };

        Ok(Portfolio {
            total_value,
            available_cash,
            positions,
            daily_pnl,
            total_pnl: total_value - self.starting_budget,
            last_updated: Utc::now(),
        })
    }

    fn symbol_for_asset(&self, asset_code: &str) -> String {
        if asset_code.contains('-') {
            return asset_code.to_string();
        }
        // Match the asset code back to a symbol we have seen trade
        self.marks
            .iter()
            .map(|entry| entry.key().clone())
            .find(|symbol| symbol.split('-').next() == Some(asset_code))
            .unwrap_or_else(|| format!("{asset_code}-USD"))
    }

    /// Order status by broker id; a fetch failure reports the order as
    /// still pending rather than raising.
    pub async fn get_order_status(&self, order_id: &str) -> OrderStatus {
        match self.broker.get_order(order_id).await {
            Ok(order) => map_order_state(&order.state),
            Err(e) => {
                tracing::warn!(order_id, error = %e, "order status fetch failed");
                OrderStatus::Pending
            }
        }
    }

    pub async fn get_trade_history(&self, limit: usize) -> Vec<Trade> {
        let history = self.history.lock().await;
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    /// Cancel any orders still pending from this session. Used during
    /// shutdown, after the in-flight cycle has completed.
    pub async fn cancel_open_orders(&self) {
        let pending: Vec<String> = {
            let history = self.history.lock().await;
            history
                .iter()
                .filter(|t| t.status == OrderStatus::Pending)
                .map(|t| t.id.clone())
                .collect()
        };

        for order_id in pending {
            if let Err(e) = self.broker.cancel_order(&order_id).await {
                tracing::warn!(order_id, error = %e, "failed to cancel open order");
            } else {
                tracing::info!(order_id, "open order cancelled");
            }
        }
    }

    /// Connectivity check for the health monitor
    pub async fn ping(&self) -> bool {
        match self.broker.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "broker connectivity check failed");
                false
            }
        }
    }
}

fn map_order_state(state: &str) -> OrderStatus {
    match state {
        "filled" | "partially_filled" => OrderStatus::Filled,
        "canceled" | "cancelled" => OrderStatus::Cancelled,
        "rejected" | "failed" => OrderStatus::Rejected,
        // open, pending, new, accepted — still in flight
        _ => OrderStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paper_broker::PaperBroker;

    fn paper_adapter(cash: f64) -> ExecutionAdapter {
        ExecutionAdapter::new(Arc::new(PaperBroker::new(cash)), cash)
    }

    #[tokio::test]
    async fn paper_fill_produces_filled_trade() {
        let adapter = paper_adapter(100.0);
        adapter.note_price("BTC-USD", 50_000.0).await;

        let trade = adapter
            .place_market_order("BTC-USD", OrderSide::Buy, 0.001, 50_000.0)
            .await;

        assert_eq!(trade.status, OrderStatus::Filled);
        assert_eq!(trade.filled_quantity, Some(0.001));
        assert_eq!(adapter.get_trade_history(10).await.len(), 1);
    }

    #[tokio::test]
    async fn broker_rejection_becomes_rejected_trade_not_error() {
        let adapter = paper_adapter(1.0);
        adapter.note_price("BTC-USD", 50_000.0).await;

        // Costs far more than the ledger holds
        let trade = adapter
            .place_market_order("BTC-USD", OrderSide::Buy, 0.01, 50_000.0)
            .await;

        assert_eq!(trade.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn portfolio_round_trip_is_neutral() {
        let adapter = paper_adapter(100.0);
        adapter.note_price("BTC-USD", 50_000.0).await;

        let before = adapter.get_portfolio().await;
        adapter
            .place_market_order("BTC-USD", OrderSide::Buy, 0.001, 50_000.0)
            .await;
        adapter
            .place_market_order("BTC-USD", OrderSide::Sell, 0.001, 50_000.0)
            .await;
        let after = adapter.get_portfolio().await;

        assert!((before.total_value - after.total_value).abs() < 1e-9);
        assert!((after.available_cash - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn portfolio_reflects_open_position() {
        let adapter = paper_adapter(100.0);
        adapter.note_price("ETH-USD", 2_000.0).await;

        adapter
            .place_market_order("ETH-USD", OrderSide::Buy, 0.01, 2_000.0)
            .await;
        let portfolio = adapter.get_portfolio().await;

        assert!((portfolio.available_cash - 80.0).abs() < 1e-9);
        assert!((portfolio.position_quantity("ETH-USD") - 0.01).abs() < 1e-9);
        assert!((portfolio.total_value - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_locally() {
        let adapter = paper_adapter(100.0);
        adapter.note_price("BTC-USD", 50_000.0).await;

        let trade = adapter
            .place_market_order("BTC-USD", OrderSide::Buy, 0.0, 50_000.0)
            .await;
        assert_eq!(trade.status, OrderStatus::Rejected);
    }
}
