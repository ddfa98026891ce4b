use chrono::Utc;
use trading_core::{
    IndicatorSnapshot, MarketData, PredictedClass, SignalAction, StrategyConfig,
};

use crate::SignalSynthesizer;

fn market(symbol: &str, price: f64) -> MarketData {
    MarketData {
        symbol: symbol.to_string(),
        price,
        volume: 1_000_000.0,
        change_24h: Some(1.5),
        timestamp: Utc::now(),
    }
}

fn bullish_indicators(symbol: &str) -> IndicatorSnapshot {
    IndicatorSnapshot {
        symbol: symbol.to_string(),
        rsi: Some(25.0),
        macd: Some(12.0),
        macd_signal: Some(10.0),
        prev_macd: Some(9.0),
        prev_macd_signal: Some(9.5),
        ema_12: Some(50_200.0),
        ema_26: Some(49_800.0),
        atr: Some(800.0),
        sentiment_ratio: None,
        timestamp: Some(Utc::now()),
    }
}

fn bearish_indicators(symbol: &str) -> IndicatorSnapshot {
    IndicatorSnapshot {
        symbol: symbol.to_string(),
        rsi: Some(78.0),
        macd: Some(9.0),
        macd_signal: Some(10.0),
        prev_macd: Some(11.0),
        prev_macd_signal: Some(10.5),
        ema_12: Some(49_500.0),
        ema_26: Some(49_900.0),
        atr: Some(800.0),
        sentiment_ratio: None,
        timestamp: Some(Utc::now()),
    }
}

#[test]
fn ml_buy_with_confirming_technicals_yields_buy() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();

    let (signal, breakdown) = synth.synthesize(
        &market("BTC-USD", 50_000.0),
        &bullish_indicators("BTC-USD"),
        Some((PredictedClass::Buy, 0.8)),
        &config,
    );

    // technical +1 * 0.3 + buy(2) * 0.7 = 1.7 >= 1.2
    assert_eq!(breakdown.technical_signal, 1);
    assert!((breakdown.weighted_score - 1.7).abs() < 1e-9);
    assert_eq!(signal.action, SignalAction::Buy);
    assert!(signal.strength > 0.0 && signal.strength <= 1.0);
}

#[test]
fn ml_sell_with_confirming_technicals_yields_sell() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();

    let (signal, breakdown) = synth.synthesize(
        &market("ETH-USD", 2_500.0),
        &bearish_indicators("ETH-USD"),
        Some((PredictedClass::Sell, 0.7)),
        &config,
    );

    // technical -1 * 0.3 + sell(0) * 0.7 = -0.3 <= 0.8
    assert_eq!(breakdown.technical_signal, -1);
    assert_eq!(signal.action, SignalAction::Sell);
    assert!(signal.strength > 0.0 && signal.strength <= 1.0);
}

#[test]
fn low_confidence_holds_even_on_strong_score() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();

    let (signal, _) = synth.synthesize(
        &market("BTC-USD", 50_000.0),
        &bullish_indicators("BTC-USD"),
        Some((PredictedClass::Buy, 0.4)),
        &config,
    );

    assert_eq!(signal.action, SignalAction::Hold);
    assert_eq!(signal.strength, 0.0);
}

#[test]
fn missing_ml_defaults_to_neutral_hold() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();

    // hold(1) * 0.7 + 1 * 0.3 = 1.0, inside the hold band
    let (signal, breakdown) = synth.synthesize(
        &market("BTC-USD", 50_000.0),
        &bullish_indicators("BTC-USD"),
        None,
        &config,
    );

    assert_eq!(breakdown.ml_class, PredictedClass::Hold);
    assert!((breakdown.weighted_score - 1.0).abs() < 1e-9);
    assert_eq!(signal.action, SignalAction::Hold);
}

#[test]
fn nan_indicators_degrade_to_neutral_technical() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();

    let mut indicators = bullish_indicators("BTC-USD");
    indicators.rsi = Some(f64::NAN);

    let (_, breakdown) = synth.synthesize(
        &market("BTC-USD", 50_000.0),
        &indicators,
        Some((PredictedClass::Hold, 0.6)),
        &config,
    );

    assert_eq!(breakdown.technical_signal, 0);
}

#[test]
fn empty_snapshot_never_panics_and_holds() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();

    let (signal, breakdown) = synth.synthesize(
        &market("BTC-USD", 50_000.0),
        &IndicatorSnapshot::default(),
        None,
        &config,
    );

    assert_eq!(breakdown.technical_signal, 0);
    assert_eq!(signal.action, SignalAction::Hold);
}

#[test]
fn contrarian_sentiment_cancels_rule_buy() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();

    let mut indicators = bullish_indicators("BTC-USD");
    indicators.sentiment_ratio = Some(0.2);

    let (_, breakdown) = synth.synthesize(
        &market("BTC-USD", 50_000.0),
        &indicators,
        Some((PredictedClass::Buy, 0.8)),
        &config,
    );

    assert_eq!(breakdown.technical_signal, 0);
    // ML alone still clears the buy threshold: 0 * 0.3 + 2 * 0.7 = 1.4
    assert!((breakdown.weighted_score - 1.4).abs() < 1e-9);
}

#[test]
fn determinism_same_inputs_same_signal() {
    let synth = SignalSynthesizer::new();
    let config = StrategyConfig::default();
    let md = market("BTC-USD", 50_000.0);
    let ind = bullish_indicators("BTC-USD");

    let (a, _) = synth.synthesize(&md, &ind, Some((PredictedClass::Buy, 0.8)), &config);
    let (b, _) = synth.synthesize(&md, &ind, Some((PredictedClass::Buy, 0.8)), &config);

    assert_eq!(a.action, b.action);
    assert_eq!(a.strength, b.strength);
    assert_eq!(a.confidence, b.confidence);
}

#[test]
fn custom_weights_shift_the_decision() {
    let synth = SignalSynthesizer::new();
    let mut config = StrategyConfig::default();
    config
        .parameters
        .insert("technical_weight".to_string(), 0.0);
    config.parameters.insert("ml_weight".to_string(), 1.0);

    // Pure ML weighting: hold class lands exactly at 1.0
    let (signal, breakdown) = synth.synthesize(
        &market("BTC-USD", 50_000.0),
        &bullish_indicators("BTC-USD"),
        Some((PredictedClass::Buy, 0.9)),
        &config,
    );

    assert!((breakdown.weighted_score - 2.0).abs() < 1e-9);
    assert_eq!(signal.action, SignalAction::Buy);
}
