use std::collections::HashMap;

use chrono::{Duration, Utc};
use trading_core::{
    OrderSide, OrderStatus, OrderType, Portfolio, SignalAction, Trade, TradeSignal,
};

use crate::{RiskConfig, RiskManager, RiskVerdict, VetoReason};

fn signal(symbol: &str, action: SignalAction, confidence: f64, price: f64) -> TradeSignal {
    TradeSignal {
        symbol: symbol.to_string(),
        action,
        strength: 0.8,
        confidence,
        price,
        timestamp: Utc::now(),
    }
}

fn portfolio(cash: f64, positions: &[(&str, f64)]) -> Portfolio {
    Portfolio {
        total_value: cash,
        available_cash: cash,
        positions: positions
            .iter()
            .map(|(s, q)| (s.to_string(), *q))
            .collect(),
        daily_pnl: 0.0,
        total_pnl: 0.0,
        last_updated: Utc::now(),
    }
}

fn filled_trade(symbol: &str, side: OrderSide, quantity: f64, price: f64) -> Trade {
    Trade {
        id: format!("t-{symbol}-{side}"),
        symbol: symbol.to_string(),
        side,
        order_type: OrderType::Market,
        quantity,
        price: Some(price),
        status: OrderStatus::Filled,
        filled_price: Some(price),
        filled_quantity: Some(quantity),
        timestamp: Utc::now(),
    }
}

/// Config with a position cap loose enough that the worked sizing
/// numbers come straight from the risk formula.
fn sizing_config() -> RiskConfig {
    RiskConfig {
        max_position_pct: 1.0,
        ..RiskConfig::default()
    }
}

#[test]
fn worked_sizing_example() {
    // budget=100, risk=0.02, entry=50000, stop=49000, ATR=800:
    // risk_amount=2, stop_distance=max(1000, 1600)=1600, size=0.00125
    let gate = RiskManager::new(sizing_config());
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.9, 50_000.0),
        &portfolio(100.0, &[]),
        50_000.0,
        Some(800.0),
        Some(49_000.0),
        None,
        None,
    );

    match verdict {
        RiskVerdict::Approved(sized) => {
            assert!((sized.quantity - 0.00125).abs() < 1e-9, "got {}", sized.quantity);
        }
        RiskVerdict::Rejected { reason } => panic!("unexpected veto: {reason}"),
    }
}

#[test]
fn too_small_trade_raised_to_minimum_when_cap_allows() {
    // Huge stop distance shrinks the raw size below the $5 floor
    let gate = RiskManager::new(sizing_config());
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.9, 50_000.0),
        &portfolio(100.0, &[]),
        50_000.0,
        Some(15_000.0),
        None,
        None,
        None,
    );

    match verdict {
        RiskVerdict::Approved(sized) => {
            // raised to min_trade_amount / entry = 5 / 50000
            assert!((sized.quantity - 0.0001).abs() < 1e-12);
            assert!(!sized.adjustments.is_empty());
        }
        RiskVerdict::Rejected { reason } => panic!("unexpected veto: {reason}"),
    }
}

#[test]
fn too_small_trade_rejected_when_minimum_exceeds_cap() {
    let config = RiskConfig {
        // cap of $2 per position, below the $5 minimum
        max_position_pct: 0.02,
        ..RiskConfig::default()
    };
    let gate = RiskManager::new(config);
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.9, 50_000.0),
        &portfolio(100.0, &[]),
        50_000.0,
        Some(800.0),
        Some(49_000.0),
        None,
        None,
    );

    assert!(matches!(
        verdict,
        RiskVerdict::Rejected {
            reason: VetoReason::TradeTooSmall { .. }
        }
    ));
}

#[test]
fn sell_without_position_is_vetoed() {
    let gate = RiskManager::new(sizing_config());
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Sell, 0.9, 50_000.0),
        &portfolio(100.0, &[]),
        50_000.0,
        Some(800.0),
        None,
        None,
        None,
    );

    assert!(matches!(
        verdict,
        RiskVerdict::Rejected {
            reason: VetoReason::NoPositionToSell { .. }
        }
    ));
}

#[test]
fn oversized_sell_clamped_to_held_quantity() {
    let gate = RiskManager::new(sizing_config());
    let buy = filled_trade("BTC-USD", OrderSide::Buy, 0.0004, 50_000.0);
    gate.record_trade(&buy, &portfolio(100.0, &[]), &portfolio(100.0, &[]));

    // Tiny ATR makes the stop distance tight, pushing the raw risk
    // size far above the 0.0004 actually held
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Sell, 0.9, 50_000.0),
        &portfolio(80.0, &[("BTC-USD", 0.0004)]),
        50_000.0,
        Some(1.0),
        None,
        None,
        None,
    );

    match verdict {
        RiskVerdict::Approved(sized) => {
            assert!((sized.quantity - 0.0004).abs() < 1e-12, "got {}", sized.quantity);
        }
        RiskVerdict::Rejected { reason } => panic!("unexpected veto: {reason}"),
    }
}

#[test]
fn at_most_one_position_per_symbol() {
    let gate = RiskManager::new(sizing_config());
    let buy = filled_trade("BTC-USD", OrderSide::Buy, 0.001, 50_000.0);
    gate.record_trade(&buy, &portfolio(100.0, &[]), &portfolio(100.0, &[]));

    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.9, 50_000.0),
        &portfolio(50.0, &[("BTC-USD", 0.001)]),
        50_000.0,
        Some(800.0),
        None,
        None,
        None,
    );

    assert!(matches!(
        verdict,
        RiskVerdict::Rejected {
            reason: VetoReason::PositionAlreadyOpen { .. }
        }
    ));
    assert_eq!(gate.open_positions().len(), 1);
}

#[test]
fn position_closed_after_full_sell() {
    let gate = RiskManager::new(sizing_config());
    gate.record_trade(
        &filled_trade("ETH-USD", OrderSide::Buy, 0.5, 2_000.0),
        &portfolio(2_000.0, &[]),
        &portfolio(2_000.0, &[]),
    );
    assert!(gate.position("ETH-USD").is_some());

    gate.record_trade(
        &filled_trade("ETH-USD", OrderSide::Sell, 0.5, 2_100.0),
        &portfolio(2_000.0, &[]),
        &portfolio(2_050.0, &[]),
    );
    assert!(gate.position("ETH-USD").is_none());
}

#[test]
fn daily_loss_accumulates_only_on_losses() {
    let gate = RiskManager::new(RiskConfig::default());

    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Buy, 0.001, 50_000.0),
        &portfolio(100.0, &[]),
        &portfolio(97.0, &[]),
    );
    let (count, loss) = gate.snapshot_counters();
    assert_eq!(count, 1);
    assert!((loss - 3.0).abs() < 1e-9);

    // A winning trade must not shrink the loss bucket
    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Sell, 0.001, 55_000.0),
        &portfolio(97.0, &[]),
        &portfolio(102.0, &[]),
    );
    let (count, loss) = gate.snapshot_counters();
    assert_eq!(count, 2);
    assert!((loss - 3.0).abs() < 1e-9);
}

#[test]
fn counters_reset_exactly_once_on_day_rollover() {
    let gate = RiskManager::new(RiskConfig::default());
    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Buy, 0.001, 50_000.0),
        &portfolio(100.0, &[]),
        &portfolio(95.0, &[]),
    );
    let (count, loss) = gate.snapshot_counters();
    assert_eq!(count, 1);
    assert!(loss > 0.0);

    // Pretend the last reset was yesterday; the next operation rolls
    gate.backdate_last_reset(Utc::now().date_naive() - Duration::days(1));
    let metrics = gate.get_risk_metrics(&portfolio(95.0, &[]));
    assert_eq!(metrics.daily_trade_count, 0);
    assert_eq!(metrics.daily_loss, 0.0);
    assert!(metrics.trading_enabled);

    // A second read on the same day must not reset anything extra
    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Sell, 0.001, 49_000.0),
        &portfolio(95.0, &[]),
        &portfolio(94.0, &[]),
    );
    let (count, _) = gate.snapshot_counters();
    assert_eq!(count, 1);
}

#[test]
fn trailing_stop_ratchets_up_for_longs() {
    let gate = RiskManager::new(RiskConfig::default());
    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Buy, 0.001, 50_000.0),
        &portfolio(100.0, &[]),
        &portfolio(100.0, &[]),
    );

    let first = gate
        .update_trailing_stop("BTC-USD", 50_000.0, Some(800.0))
        .expect("position exists");
    assert!((first - 48_400.0).abs() < 1e-9);

    let higher = gate
        .update_trailing_stop("BTC-USD", 52_000.0, Some(800.0))
        .expect("position exists");
    assert!(higher > first);

    // Price falling back must not lower the stop
    let after_drop = gate
        .update_trailing_stop("BTC-USD", 49_000.0, Some(800.0))
        .expect("position exists");
    assert_eq!(after_drop, higher);
}

#[test]
fn trailing_stop_without_position_is_none() {
    let gate = RiskManager::new(RiskConfig::default());
    assert!(gate
        .update_trailing_stop("BTC-USD", 50_000.0, Some(800.0))
        .is_none());
}

#[test]
fn emergency_stop_latches_until_rollover() {
    let gate = RiskManager::new(RiskConfig::default());
    let healthy = portfolio(100.0, &[]);

    assert!(gate.get_risk_metrics(&healthy).trading_enabled);

    gate.emergency_stop("manual halt");
    assert!(!gate.get_risk_metrics(&healthy).trading_enabled);

    // Idempotent, and vetoes every proposal for the rest of the day
    gate.emergency_stop("again");
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.95, 50_000.0),
        &healthy,
        50_000.0,
        Some(800.0),
        None,
        None,
        None,
    );
    assert!(matches!(
        verdict,
        RiskVerdict::Rejected {
            reason: VetoReason::DailyLossLimit { .. }
        }
    ));

    // Only the calendar rollover re-enables trading
    gate.backdate_last_reset(Utc::now().date_naive() - Duration::days(1));
    assert!(gate.get_risk_metrics(&healthy).trading_enabled);
}

#[test]
fn risk_level_bands() {
    let gate = RiskManager::new(RiskConfig::default());
    let pf = portfolio(100.0, &[]);

    assert_eq!(
        gate.get_risk_metrics(&pf).risk_level,
        crate::RiskLevel::Low
    );

    // Loss of $6 = 60% of the $10 daily limit
    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Buy, 0.001, 50_000.0),
        &portfolio(100.0, &[]),
        &portfolio(94.0, &[]),
    );
    assert_eq!(
        gate.get_risk_metrics(&pf).risk_level,
        crate::RiskLevel::Medium
    );

    // Another $3 pushes it to 90%
    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Sell, 0.001, 50_000.0),
        &portfolio(94.0, &[]),
        &portfolio(91.0, &[]),
    );
    assert_eq!(
        gate.get_risk_metrics(&pf).risk_level,
        crate::RiskLevel::High
    );
}

#[test]
fn shrunken_portfolio_disables_trading() {
    let gate = RiskManager::new(RiskConfig::default());
    // Below 50% of the starting budget
    let metrics = gate.get_risk_metrics(&portfolio(49.0, &[]));
    assert!(!metrics.trading_enabled);
}

#[test]
fn low_confidence_vetoed() {
    let gate = RiskManager::new(sizing_config());
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.2, 50_000.0),
        &portfolio(100.0, &[]),
        50_000.0,
        Some(800.0),
        None,
        None,
        None,
    );
    assert!(matches!(
        verdict,
        RiskVerdict::Rejected {
            reason: VetoReason::ConfidenceTooLow { .. }
        }
    ));
}

#[test]
fn daily_trade_limit_vetoes_after_cap() {
    let config = RiskConfig {
        max_trades_per_day: 2,
        max_position_pct: 1.0,
        ..RiskConfig::default()
    };
    let gate = RiskManager::new(config);
    let pf = portfolio(100.0, &[]);

    for symbol in ["BTC-USD", "ETH-USD"] {
        gate.record_trade(
            &filled_trade(symbol, OrderSide::Buy, 0.0001, 50_000.0),
            &pf,
            &pf,
        );
    }

    let verdict = gate.validate_and_size(
        &signal("XRP-USD", SignalAction::Buy, 0.9, 1.0),
        &pf,
        1.0,
        Some(0.05),
        None,
        None,
        None,
    );
    assert!(matches!(
        verdict,
        RiskVerdict::Rejected {
            reason: VetoReason::DailyTradeLimit { .. }
        }
    ));
}

#[test]
fn wrong_side_stop_replaced_not_rejected() {
    let gate = RiskManager::new(sizing_config());
    // A "stop" above the entry price for a buy is invalid
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.9, 50_000.0),
        &portfolio(100.0, &[]),
        50_000.0,
        Some(800.0),
        Some(51_000.0),
        None,
        None,
    );

    match verdict {
        RiskVerdict::Approved(sized) => {
            // Replaced with the ATR-derived stop below price
            assert!((sized.stop_loss - 48_400.0).abs() < 1e-9);
            assert!(sized
                .adjustments
                .iter()
                .any(|a| a.contains("wrong side")));
        }
        RiskVerdict::Rejected { reason } => panic!("unexpected veto: {reason}"),
    }
}

#[test]
fn insufficient_cash_vetoes_buy() {
    let gate = RiskManager::new(sizing_config());
    let verdict = gate.validate_and_size(
        &signal("BTC-USD", SignalAction::Buy, 0.9, 50_000.0),
        &portfolio(1.0, &[]),
        50_000.0,
        Some(800.0),
        Some(49_000.0),
        None,
        None,
    );
    assert!(matches!(
        verdict,
        RiskVerdict::Rejected {
            reason: VetoReason::InsufficientFunds { .. }
        }
    ));
}

#[test]
fn stop_hits_detects_crossed_longs() {
    let gate = RiskManager::new(RiskConfig::default());
    gate.record_trade(
        &filled_trade("BTC-USD", OrderSide::Buy, 0.001, 50_000.0),
        &portfolio(100.0, &[]),
        &portfolio(100.0, &[]),
    );
    gate.assign_stop("BTC-USD", 48_500.0);

    let mut prices = HashMap::new();
    prices.insert("BTC-USD".to_string(), 48_000.0);
    let hits = gate.stop_hits(&prices);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].symbol, "BTC-USD");

    prices.insert("BTC-USD".to_string(), 49_000.0);
    assert!(gate.stop_hits(&prices).is_empty());
}
