use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use risk_manager::{RiskManager, RiskMetrics, RiskVerdict, SizedTrade, StopHit};
use strategy_engine::SignalSynthesizer;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use trading_core::{
    MarketData, MarketDataProvider, OrderSide, OrderStatus, OrderType, Portfolio, Predictor,
    SignalAction, StrategyConfig, Trade, TradeSignal,
};

use crate::config::AgentConfig;
use crate::executor::ExecutionAdapter;
use crate::metrics::AgentMetrics;
use crate::types::{BotStatus, SignalSummary, TradeAttempt};

/// Drives the periodic trading cycle: market data -> signal synthesis
/// -> risk gate -> execution -> stop maintenance -> predictor upkeep.
/// Exposes the start/stop/manual-trade surface consumed by the API
/// layer.
pub struct TradingBot {
    config: AgentConfig,
    data: Arc<dyn MarketDataProvider>,
    predictor: Arc<dyn Predictor>,
    synthesizer: SignalSynthesizer,
    risk: Arc<RiskManager>,
    executor: Arc<ExecutionAdapter>,

    strategy: RwLock<Arc<StrategyConfig>>,
    symbols: RwLock<Arc<Vec<String>>>,

    running: AtomicBool,
    stop_notify: Notify,
    cycles_run: AtomicU64,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
    /// Per-symbol trade throttle, shared between the cycle and manual
    /// trade requests
    last_trade_time: DashMap<String, DateTime<Utc>>,
    last_signals: DashMap<String, SignalSummary>,
    metrics: Mutex<AgentMetrics>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TradingBot {
    pub fn new(
        config: AgentConfig,
        data: Arc<dyn MarketDataProvider>,
        predictor: Arc<dyn Predictor>,
        executor: Arc<ExecutionAdapter>,
        risk: Arc<RiskManager>,
    ) -> Self {
        let symbols = config.symbols.clone();
        Self {
            config,
            data,
            predictor,
            synthesizer: SignalSynthesizer::new(),
            risk,
            executor,
            strategy: RwLock::new(Arc::new(StrategyConfig::default())),
            symbols: RwLock::new(Arc::new(symbols)),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
            cycles_run: AtomicU64::new(0),
            last_cycle_at: Mutex::new(None),
            last_trade_time: DashMap::new(),
            last_signals: DashMap::new(),
            metrics: Mutex::new(AgentMetrics::new(10)),
            loop_handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_cycle_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn strategy_snapshot(&self) -> Arc<StrategyConfig> {
        Arc::clone(
            &self
                .strategy
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn symbols_snapshot(&self) -> Arc<Vec<String>> {
        Arc::clone(
            &self
                .symbols
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Start the trading loop. A no-op when already running.
    pub async fn start(self: &Arc<Self>, symbols: Option<Vec<String>>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("trading bot is already running");
            return Ok(());
        }

        if let Some(symbols) = symbols {
            self.update_symbols(symbols);
        }

        let bot = Arc::clone(self);
        let handle = tokio::spawn(async move { bot.run_loop().await });
        *self.loop_handle.lock().await = Some(handle);

        tracing::info!(
            interval_secs = self.config.cycle_interval_secs,
            broker = self.executor.broker_name(),
            "trading bot started"
        );
        Ok(())
    }

    /// Graceful stop: the in-flight cycle completes, orders are never
    /// aborted mid-request; then any still-pending orders are
    /// cancelled.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_one();

        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "trading loop join failed");
            }
        }

        self.executor.cancel_open_orders().await;
        tracing::info!("trading bot stopped");
    }

    /// Stop the loop and latch the risk gate disabled for the rest of
    /// the day.
    pub async fn emergency_stop(&self, reason: &str) {
        self.risk.emergency_stop(reason);
        self.stop().await;
    }

    async fn run_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.cycle_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    if let Err(e) = self.run_cycle().await {
                        // Unexpected orchestration failure: stop and
                        // leave recovery to the health monitor
                        tracing::error!(error = %e, "trading cycle failed, stopping loop");
                        self.running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
                // Stop requests are honored between cycles only
                _ = self.stop_notify.notified() => break,
            }
        }
        tracing::info!("trading loop exited");
    }

    async fn run_cycle(&self) -> Result<()> {
        let cycle_start = AgentMetrics::start_timer();
        let strategy = self.strategy_snapshot();

        if !strategy.enabled {
            tracing::debug!("strategy disabled, skipping cycle");
            self.finish_cycle(cycle_start);
            return Ok(());
        }

        let symbols = self.symbols_snapshot();
        let market_data = self
            .data
            .market_snapshot(&symbols)
            .await
            .map_err(|e| anyhow!("market data fetch failed: {e}"))?;

        let mut prices: HashMap<String, f64> = HashMap::new();
        for md in &market_data {
            prices.insert(md.symbol.clone(), md.price);
            self.executor.note_price(&md.symbol, md.price).await;
        }

        // Symbols are processed sequentially: an earlier symbol's fill
        // changes the cash and position view the gate applies to later
        // symbols in the same cycle.
        let mut atrs: HashMap<String, f64> = HashMap::new();
        for md in &market_data {
            let portfolio = self.executor.get_portfolio().await;
            let risk_metrics = self.risk.get_risk_metrics(&portfolio);
            if !risk_metrics.trading_enabled {
                tracing::warn!(
                    daily_loss = risk_metrics.daily_loss,
                    trades = risk_metrics.daily_trade_count,
                    "trading disabled by risk gate, skipping remaining symbols"
                );
                break;
            }

            if let Err(e) = self.analyze_and_trade(md, &portfolio, &strategy, &mut atrs).await {
                tracing::error!(symbol = %md.symbol, error = %e, "symbol processing failed");
            }
        }

        self.close_stop_hits(&prices).await;
        self.update_trailing_stops(&prices, &atrs);

        if self.predictor.is_stale(self.config.retrain_hours) {
            tracing::info!("predictor stale, triggering retraining");
            if let Err(e) = self.predictor.trigger_training(&symbols).await {
                tracing::warn!(error = %e, "predictor retraining failed");
            }
        }

        self.finish_cycle(cycle_start);
        Ok(())
    }

    async fn analyze_and_trade(
        &self,
        md: &MarketData,
        portfolio: &Portfolio,
        strategy: &StrategyConfig,
        atrs: &mut HashMap<String, f64>,
    ) -> Result<()> {
        let indicators = match self.data.indicator_snapshot(&md.symbol).await {
            Ok(indicators) => indicators,
            Err(e) => {
                // Missing indicators degrade to hold, never abort the cycle
                tracing::debug!(symbol = %md.symbol, error = %e, "no indicator data, holding");
                return Ok(());
            }
        };
        if let Some(atr) = indicators.atr.filter(|a| a.is_finite() && *a > 0.0) {
            atrs.insert(md.symbol.clone(), atr);
        }

        let ml = match self.data.feature_vector(&md.symbol).await {
            Ok(features) => match self.predictor.predict(&features).await {
                Ok(prediction) => Some(prediction),
                Err(e) => {
                    tracing::warn!(symbol = %md.symbol, error = %e, "prediction failed, using technical only");
                    None
                }
            },
            Err(_) => None,
        };

        let (signal, _breakdown) = self.synthesizer.synthesize(md, &indicators, ml, strategy);
        self.last_signals.insert(
            md.symbol.clone(),
            SignalSummary {
                action: signal.action,
                strength: signal.strength,
                confidence: signal.confidence,
                price: signal.price,
                timestamp: signal.timestamp,
            },
        );
        self.with_metrics(|m| m.signals_generated += 1);

        if signal.action == SignalAction::Hold {
            return Ok(());
        }

        if !self.symbol_tradable(&md.symbol) {
            tracing::info!(
                symbol = %md.symbol,
                "trade throttled: minimum per-symbol interval not elapsed"
            );
            return Ok(());
        }

        // Strategy-level exits are proposals; the gate sanity-checks
        // them and substitutes ATR-derived levels when invalid
        let stop_pct = strategy.risk_limit("stop_loss_pct", 0.02);
        let take_pct = strategy.risk_limit("take_profit_pct", 0.05);
        let (proposed_stop, proposed_take) = match signal.action {
            SignalAction::Buy => (md.price * (1.0 - stop_pct), md.price * (1.0 + take_pct)),
            _ => (md.price * (1.0 + stop_pct), md.price * (1.0 - take_pct)),
        };

        let verdict = self.risk.validate_and_size(
            &signal,
            portfolio,
            md.price,
            indicators.atr,
            Some(proposed_stop),
            Some(proposed_take),
            None,
        );

        match verdict {
            RiskVerdict::Rejected { reason } => {
                tracing::info!(symbol = %md.symbol, %reason, "trade vetoed by risk gate");
                self.with_metrics(|m| m.signals_vetoed += 1);
            }
            RiskVerdict::Approved(sized) => {
                self.execute_sized(&signal, sized, portfolio).await;
            }
        }
        Ok(())
    }

    /// Place an approved, sized order and feed the outcome back into
    /// the gate's state.
    async fn execute_sized(
        &self,
        signal: &TradeSignal,
        sized: SizedTrade,
        portfolio_before: &Portfolio,
    ) -> TradeAttempt {
        let trade = self
            .executor
            .place_market_order(&sized.symbol, sized.side, sized.quantity, signal.price)
            .await;
        let portfolio_after = self.executor.get_portfolio().await;

        self.risk
            .record_trade(&trade, portfolio_before, &portfolio_after);

        if trade.status == OrderStatus::Filled && sized.side == OrderSide::Buy {
            self.risk.assign_stop(&sized.symbol, sized.stop_loss);
        }

        self.last_trade_time.insert(sized.symbol.clone(), Utc::now());
        let pnl = portfolio_after.total_value - portfolio_before.total_value;

        match trade.status {
            OrderStatus::Rejected => {
                self.with_metrics(|m| m.trades_rejected += 1);
                tracing::warn!(
                    symbol = %trade.symbol,
                    side = %trade.side,
                    "order rejected by broker"
                );
                TradeAttempt::RejectedByBroker { trade }
            }
            _ => {
                self.with_metrics(|m| {
                    m.trades_executed += 1;
                    m.record_trade_result(pnl);
                });
                tracing::info!(
                    symbol = %trade.symbol,
                    side = %trade.side,
                    quantity = trade.quantity,
                    status = ?trade.status,
                    "trade executed"
                );
                TradeAttempt::Executed { trade }
            }
        }
    }

    /// Close any position whose stop the market has crossed.
    async fn close_stop_hits(&self, prices: &HashMap<String, f64>) {
        let hits: Vec<StopHit> = self.risk.stop_hits(prices);
        for hit in hits {
            let close_side = match hit.side {
                OrderSide::Buy => OrderSide::Sell,
                OrderSide::Sell => OrderSide::Buy,
            };
            tracing::info!(
                symbol = %hit.symbol,
                stop = hit.stop_loss,
                price = hit.current_price,
                "stop loss hit, closing position"
            );

            let before = self.executor.get_portfolio().await;
            let trade = self
                .executor
                .place_market_order(&hit.symbol, close_side, hit.quantity, hit.current_price)
                .await;
            let after = self.executor.get_portfolio().await;
            self.risk.record_trade(&trade, &before, &after);
            self.with_metrics(|m| m.record_trade_result(after.total_value - before.total_value));
        }
    }

    fn update_trailing_stops(&self, prices: &HashMap<String, f64>, atrs: &HashMap<String, f64>) {
        for position in self.risk.open_positions() {
            let Some(price) = prices.get(&position.symbol).copied() else {
                continue;
            };
            let atr = atrs.get(&position.symbol).copied();
            self.risk
                .update_trailing_stop(&position.symbol, price, atr);
        }
    }

    fn symbol_tradable(&self, symbol: &str) -> bool {
        match self.last_trade_time.get(symbol) {
            None => true,
            Some(last) => {
                let elapsed = Utc::now() - *last;
                elapsed.num_seconds() >= self.config.min_trade_interval_secs as i64
            }
        }
    }

    fn with_metrics(&self, f: impl FnOnce(&mut AgentMetrics)) {
        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics);
    }

    fn finish_cycle(&self, start: std::time::Instant) {
        self.cycles_run.fetch_add(1, Ordering::SeqCst);
        *self
            .last_cycle_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.with_metrics(|m| m.finish_cycle(start));
    }

    // -----------------------------------------------------------------
    // Operations exposed to the API layer
    // -----------------------------------------------------------------

    /// Manual trade: bypasses the signal synthesizer, still passes
    /// through the risk gate with the caller's quantity.
    pub async fn manual_trade(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        order_type: OrderType,
    ) -> Result<TradeAttempt> {
        if order_type != OrderType::Market {
            bail!("only market orders are supported for manual trades");
        }

        // No silent price fallback: a symbol we cannot price is an error
        let price = self
            .data
            .latest_price(symbol)
            .await
            .map_err(|e| anyhow!("cannot price {symbol}: {e}"))?;
        self.executor.note_price(symbol, price).await;

        let atr = match self.data.indicator_snapshot(symbol).await {
            Ok(indicators) => indicators.atr,
            Err(_) => None,
        };

        let signal = TradeSignal {
            symbol: symbol.to_string(),
            action: match side {
                OrderSide::Buy => SignalAction::Buy,
                OrderSide::Sell => SignalAction::Sell,
            },
            strength: 1.0,
            confidence: 1.0,
            price,
            timestamp: Utc::now(),
        };

        let portfolio = self.executor.get_portfolio().await;
        let verdict = self.risk.validate_and_size(
            &signal,
            &portfolio,
            price,
            atr,
            None,
            None,
            Some(quantity),
        );

        match verdict {
            RiskVerdict::Rejected { reason } => {
                tracing::info!(symbol, %reason, "manual trade vetoed");
                Ok(TradeAttempt::Vetoed {
                    reason: reason.to_string(),
                })
            }
            RiskVerdict::Approved(sized) => Ok(self.execute_sized(&signal, sized, &portfolio).await),
        }
    }

    /// Swap in a new strategy snapshot; the next cycle picks it up.
    pub fn update_strategy(&self, config: StrategyConfig) {
        tracing::info!(name = %config.name, enabled = config.enabled, "strategy configuration updated");
        *self
            .strategy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    pub fn update_symbols(&self, symbols: Vec<String>) {
        tracing::info!(?symbols, "trading symbols updated");
        *self
            .symbols
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(symbols);
    }

    pub async fn get_status(&self) -> BotStatus {
        let portfolio = self.executor.get_portfolio().await;
        BotStatus {
            running: self.is_running(),
            paper_trading: self.executor.is_paper(),
            symbols: self.symbols_snapshot().as_ref().clone(),
            cycles_run: self.cycles_run.load(Ordering::SeqCst),
            last_cycle_at: self.last_cycle_at(),
            open_positions: self.risk.open_positions().len(),
            last_signals: self
                .last_signals
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            risk_metrics: self.risk.get_risk_metrics(&portfolio),
            strategy: self.strategy_snapshot().as_ref().clone(),
        }
    }

    pub async fn get_portfolio(&self) -> Portfolio {
        self.executor.get_portfolio().await
    }

    pub async fn get_trade_history(&self, limit: usize) -> Vec<Trade> {
        self.executor.get_trade_history(limit).await
    }

    pub async fn get_risk_metrics(&self) -> RiskMetrics {
        let portfolio = self.executor.get_portfolio().await;
        self.risk.get_risk_metrics(&portfolio)
    }
}
