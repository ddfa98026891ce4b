use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{NaiveDate, Utc};
use trading_core::{OrderSide, OrderStatus, Portfolio, Position, SignalAction, Trade, TradeSignal};

use crate::models::*;

/// Process-wide risk state. Exclusively owned by the gate; every
/// read-then-write sequence happens under one lock so two concurrent
/// callers cannot both pass a limit check before either increments a
/// counter.
pub(crate) struct RiskState {
    pub(crate) daily_trade_count: u32,
    pub(crate) daily_loss: f64,
    pub(crate) last_reset_date: NaiveDate,
    pub(crate) open_positions: HashMap<String, Position>,
    pub(crate) trade_log: Vec<RecordedTrade>,
}

/// Validates, sizes, and tracks every trade the system attempts. Can
/// veto or shrink any proposal; transitions to disabled on any limit
/// breach and only re-enables on UTC day rollover.
pub struct RiskManager {
    config: RiskConfig,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RiskState {
                daily_trade_count: 0,
                daily_loss: 0.0,
                last_reset_date: Utc::now().date_naive(),
                open_positions: HashMap::new(),
                trade_log: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, RiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Zero the daily counters on the first operation after a UTC
    /// calendar-date transition. Exactly once per transition.
    fn roll_daily(state: &mut RiskState, today: NaiveDate) {
        if today > state.last_reset_date {
            state.daily_trade_count = 0;
            state.daily_loss = 0.0;
            state.last_reset_date = today;
            tracing::info!(%today, "daily risk counters reset");
        }
    }

    /// Validate a proposed trade against every limit and compute its
    /// size and exit levels. Vetoes are values, never errors.
    ///
    /// `requested_quantity` is for manual trades: the caller's quantity
    /// is validated and clamped instead of risk-sized from scratch.
    pub fn validate_and_size(
        &self,
        signal: &TradeSignal,
        portfolio: &Portfolio,
        current_price: f64,
        atr: Option<f64>,
        proposed_stop: Option<f64>,
        proposed_take_profit: Option<f64>,
        requested_quantity: Option<f64>,
    ) -> RiskVerdict {
        let mut state = self.state();
        Self::roll_daily(&mut state, Utc::now().date_naive());

        let symbol = &signal.symbol;
        let side = match signal.action {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
            SignalAction::Hold => {
                return RiskVerdict::Rejected {
                    reason: VetoReason::NotActionable,
                }
            }
        };

        if !current_price.is_finite() || current_price <= 0.0 {
            return RiskVerdict::Rejected {
                reason: VetoReason::NoPrice {
                    symbol: symbol.clone(),
                },
            };
        }

        if state.daily_trade_count >= self.config.max_trades_per_day {
            return RiskVerdict::Rejected {
                reason: VetoReason::DailyTradeLimit {
                    count: state.daily_trade_count,
                    limit: self.config.max_trades_per_day,
                },
            };
        }

        let loss_limit = self.config.trading_budget * self.config.daily_loss_limit;
        if state.daily_loss >= loss_limit {
            return RiskVerdict::Rejected {
                reason: VetoReason::DailyLossLimit {
                    loss: state.daily_loss,
                    limit: loss_limit,
                },
            };
        }

        if signal.confidence < self.config.min_confidence {
            return RiskVerdict::Rejected {
                reason: VetoReason::ConfidenceTooLow {
                    confidence: signal.confidence,
                    floor: self.config.min_confidence,
                },
            };
        }

        if side == OrderSide::Buy && state.open_positions.contains_key(symbol) {
            return RiskVerdict::Rejected {
                reason: VetoReason::PositionAlreadyOpen {
                    symbol: symbol.clone(),
                },
            };
        }

        let atr = atr.filter(|a| a.is_finite() && *a > 0.0);
        let mut adjustments = Vec::new();

        // A stop on the wrong side of price is replaced with the
        // ATR-derived one. An adjustment, not a rejection.
        let stop_loss = match validated_stop(side, current_price, proposed_stop) {
            Some(stop) => stop,
            None => match atr {
                Some(atr) => {
                    let derived = atr_stop(side, current_price, atr, self.config.atr_multiplier);
                    if proposed_stop.is_some() {
                        let note = format!(
                            "stop {:.4} on wrong side of price {:.4}, replaced with {:.4}",
                            proposed_stop.unwrap_or_default(),
                            current_price,
                            derived
                        );
                        tracing::warn!(symbol = %symbol, "{note}");
                        adjustments.push(note);
                    }
                    derived
                }
                None => {
                    return RiskVerdict::Rejected {
                        reason: VetoReason::NoVolatilityData {
                            symbol: symbol.clone(),
                        },
                    }
                }
            },
        };

        // The ATR floor keeps an unrealistically tight stop from
        // inflating the position size.
        let stop_distance = match atr {
            Some(atr) => (current_price - stop_loss)
                .abs()
                .max(atr * self.config.atr_multiplier),
            None => (current_price - stop_loss).abs(),
        };
        if stop_distance <= 0.0 {
            return RiskVerdict::Rejected {
                reason: VetoReason::NoVolatilityData {
                    symbol: symbol.clone(),
                },
            };
        }

        let risk_amount = self.config.trading_budget * self.config.max_risk_per_trade;
        let max_position_value = self.config.trading_budget * self.config.max_position_pct;
        let mut quantity = match requested_quantity.filter(|q| q.is_finite() && *q > 0.0) {
            // Manual quantity: honor it up to the position-value cap
            Some(requested) => {
                let capped = requested.min(max_position_value / current_price);
                if capped < requested {
                    adjustments.push(format!(
                        "requested quantity {requested:.8} capped at {capped:.8}"
                    ));
                }
                capped
            }
            None => (risk_amount / stop_distance).min(max_position_value / current_price),
        };

        if side == OrderSide::Sell {
            let held = {
                let gate_held = state
                    .open_positions
                    .get(symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(0.0);
                if gate_held > 0.0 {
                    gate_held
                } else {
                    portfolio.position_quantity(symbol)
                }
            };
            if held <= 0.0 {
                return RiskVerdict::Rejected {
                    reason: VetoReason::NoPositionToSell {
                        symbol: symbol.clone(),
                    },
                };
            }
            // Never oversold: clamp to what is actually held
            if quantity > held {
                adjustments.push(format!(
                    "sell quantity {quantity:.8} clamped to held {held:.8}"
                ));
                quantity = held;
            }
        }

        let trade_value = quantity * current_price;
        if trade_value < self.config.min_trade_amount {
            if side == OrderSide::Buy && self.config.min_trade_amount <= max_position_value {
                quantity = self.config.min_trade_amount / current_price;
                adjustments.push(format!(
                    "size raised to minimum trade amount (${:.2})",
                    self.config.min_trade_amount
                ));
            } else {
                return RiskVerdict::Rejected {
                    reason: VetoReason::TradeTooSmall {
                        value: trade_value,
                        minimum: self.config.min_trade_amount,
                    },
                };
            }
        }

        if side == OrderSide::Buy {
            let cost = quantity * current_price;
            if cost > portfolio.available_cash {
                return RiskVerdict::Rejected {
                    reason: VetoReason::InsufficientFunds {
                        needed: cost,
                        available: portfolio.available_cash,
                    },
                };
            }
        }

        let take_profit = match validated_take_profit(side, current_price, proposed_take_profit) {
            Some(tp) => tp,
            None => {
                let risk = (current_price - stop_loss).abs();
                let derived = match side {
                    OrderSide::Buy => current_price + risk * self.config.risk_reward_ratio,
                    OrderSide::Sell => current_price - risk * self.config.risk_reward_ratio,
                };
                if proposed_take_profit.is_some() {
                    adjustments.push(format!(
                        "take profit replaced with risk/reward derived {derived:.4}"
                    ));
                }
                derived
            }
        };

        tracing::info!(
            symbol = %symbol,
            %side,
            quantity,
            stop_loss,
            take_profit,
            "trade approved by risk gate"
        );

        RiskVerdict::Approved(SizedTrade {
            symbol: symbol.clone(),
            side,
            quantity,
            stop_loss,
            take_profit,
            adjustments,
        })
    }

    /// Record a completed order attempt. Realized P&L is the portfolio
    /// value delta; only losses accumulate into the daily loss bucket.
    pub fn record_trade(
        &self,
        trade: &Trade,
        portfolio_before: &Portfolio,
        portfolio_after: &Portfolio,
    ) {
        let mut state = self.state();
        Self::roll_daily(&mut state, Utc::now().date_naive());

        let pnl = portfolio_after.total_value - portfolio_before.total_value;
        if pnl < 0.0 {
            state.daily_loss += pnl.abs();
        }

        if trade.status == OrderStatus::Filled {
            state.daily_trade_count += 1;

            let quantity = trade.filled_quantity.unwrap_or(trade.quantity);
            let price = trade
                .filled_price
                .or(trade.price)
                .unwrap_or_default();

            match trade.side {
                OrderSide::Buy => {
                    state.open_positions.insert(
                        trade.symbol.clone(),
                        Position {
                            symbol: trade.symbol.clone(),
                            side: OrderSide::Buy,
                            quantity,
                            entry_price: price,
                            entry_time: trade.timestamp,
                            stop_loss: None,
                        },
                    );
                }
                OrderSide::Sell => {
                    if let Some(position) = state.open_positions.get_mut(&trade.symbol) {
                        position.quantity -= quantity;
                        if position.quantity <= 1e-12 {
                            state.open_positions.remove(&trade.symbol);
                        }
                    }
                }
            }
        }

        tracing::info!(
            symbol = %trade.symbol,
            side = %trade.side,
            status = ?trade.status,
            pnl,
            daily_loss = state.daily_loss,
            "trade recorded"
        );

        state.trade_log.push(RecordedTrade {
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.filled_quantity.unwrap_or(trade.quantity),
            pnl,
            timestamp: trade.timestamp,
        });
    }

    /// Install the gate-approved stop on a freshly opened position.
    /// A position that already has a stop keeps it (the trailing
    /// ratchet is the only thing allowed to move an existing stop).
    pub fn assign_stop(&self, symbol: &str, stop_loss: f64) {
        let mut state = self.state();
        if let Some(position) = state.open_positions.get_mut(symbol) {
            if position.stop_loss.is_none() {
                position.stop_loss = Some(stop_loss);
            }
        }
    }

    /// Trailing-stop ratchet: a long's stop may only rise, a short's
    /// may only fall. Returns the stop in effect, or None when there is
    /// no open position for the symbol.
    pub fn update_trailing_stop(
        &self,
        symbol: &str,
        current_price: f64,
        atr: Option<f64>,
    ) -> Option<f64> {
        let mut state = self.state();
        Self::roll_daily(&mut state, Utc::now().date_naive());

        let position = state.open_positions.get_mut(symbol)?;
        let Some(atr) = atr.filter(|a| a.is_finite() && *a > 0.0) else {
            // Without volatility data the stop stays where it is
            return position.stop_loss;
        };

        let candidate = atr_stop(position.side, current_price, atr, self.config.atr_multiplier);

        let updated = match position.stop_loss {
            None => {
                position.stop_loss = Some(candidate);
                true
            }
            Some(current) => {
                let improves = match position.side {
                    OrderSide::Buy => candidate > current,
                    OrderSide::Sell => candidate < current,
                };
                if improves {
                    position.stop_loss = Some(candidate);
                }
                improves
            }
        };

        if updated {
            tracing::info!(symbol, new_stop = candidate, "trailing stop updated");
        }
        position.stop_loss
    }

    /// Positions whose stop has been crossed by the given prices
    pub fn stop_hits(&self, prices: &HashMap<String, f64>) -> Vec<StopHit> {
        let state = self.state();
        state
            .open_positions
            .values()
            .filter_map(|position| {
                let stop = position.stop_loss?;
                let price = prices.get(&position.symbol).copied()?;
                let crossed = match position.side {
                    OrderSide::Buy => price <= stop,
                    OrderSide::Sell => price >= stop,
                };
                crossed.then(|| StopHit {
                    symbol: position.symbol.clone(),
                    side: position.side,
                    quantity: position.quantity,
                    stop_loss: stop,
                    current_price: price,
                })
            })
            .collect()
    }

    pub fn get_risk_metrics(&self, portfolio: &Portfolio) -> RiskMetrics {
        let mut state = self.state();
        Self::roll_daily(&mut state, Utc::now().date_naive());

        let loss_limit = self.config.trading_budget * self.config.daily_loss_limit;
        let loss_ratio = if loss_limit > 0.0 {
            state.daily_loss / loss_limit
        } else {
            0.0
        };

        let risk_level = if loss_ratio >= 0.8 {
            RiskLevel::High
        } else if loss_ratio >= 0.5 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let trading_enabled = state.daily_trade_count < self.config.max_trades_per_day
            && state.daily_loss < loss_limit
            && portfolio.total_value >= self.config.trading_budget * 0.5;

        let total_position_value = state
            .open_positions
            .values()
            .map(|p| p.quantity * p.entry_price)
            .sum();

        RiskMetrics {
            daily_trade_count: state.daily_trade_count,
            daily_trade_limit: self.config.max_trades_per_day,
            daily_loss: state.daily_loss,
            daily_loss_limit: loss_limit,
            daily_loss_percentage: loss_ratio * 100.0,
            open_positions: state.open_positions.len(),
            total_position_value,
            available_cash: portfolio.available_cash,
            portfolio_value: portfolio.total_value,
            risk_level,
            trading_enabled,
        }
    }

    /// Latch the daily loss at its limit, guaranteeing trading stays
    /// disabled until the next UTC day rollover. Idempotent.
    pub fn emergency_stop(&self, reason: &str) {
        let mut state = self.state();
        Self::roll_daily(&mut state, Utc::now().date_naive());

        let loss_limit = self.config.trading_budget * self.config.daily_loss_limit;
        state.daily_loss = state.daily_loss.max(loss_limit);
        tracing::error!(reason, "EMERGENCY STOP: trading disabled until day rollover");
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.state().open_positions.values().cloned().collect()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state().open_positions.get(symbol).cloned()
    }

    pub fn recorded_trades(&self, limit: usize) -> Vec<RecordedTrade> {
        let state = self.state();
        let start = state.trade_log.len().saturating_sub(limit);
        state.trade_log[start..].to_vec()
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_reset(&self, date: NaiveDate) {
        self.state().last_reset_date = date;
    }

    #[cfg(test)]
    pub(crate) fn snapshot_counters(&self) -> (u32, f64) {
        let state = self.state();
        (state.daily_trade_count, state.daily_loss)
    }
}

/// A proposed stop is valid only on the loss side of the current price.
fn validated_stop(side: OrderSide, price: f64, proposed: Option<f64>) -> Option<f64> {
    let stop = proposed.filter(|s| s.is_finite())?;
    match side {
        OrderSide::Buy if stop < price => Some(stop),
        OrderSide::Sell if stop > price => Some(stop),
        _ => None,
    }
}

fn validated_take_profit(side: OrderSide, price: f64, proposed: Option<f64>) -> Option<f64> {
    let tp = proposed.filter(|t| t.is_finite())?;
    match side {
        OrderSide::Buy if tp > price => Some(tp),
        OrderSide::Sell if tp < price => Some(tp),
        _ => None,
    }
}

fn atr_stop(side: OrderSide, price: f64, atr: f64, multiplier: f64) -> f64 {
    match side {
        OrderSide::Buy => price - atr * multiplier,
        OrderSide::Sell => price + atr * multiplier,
    }
}
