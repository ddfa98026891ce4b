use chrono::Utc;
use trading_core::{
    IndicatorSnapshot, MarketData, PredictedClass, SignalAction, StrategyConfig, TradeSignal,
};

/// Fuses the technical rule signal with the ML class/confidence pair
/// into one directional decision per symbol. Stateless: the same inputs
/// always produce the same signal.
pub struct SignalSynthesizer;

/// Intermediate scores, kept for status reporting and logging
#[derive(Debug, Clone, serde::Serialize)]
pub struct SignalBreakdown {
    pub technical_signal: i8,
    pub ml_class: PredictedClass,
    pub ml_confidence: f64,
    pub weighted_score: f64,
}

impl SignalSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Produce the signal for one symbol. Missing or NaN indicator
    /// values degrade the affected rule to neutral; an absent ML
    /// prediction defaults to hold at 0.5 confidence. Never fails.
    pub fn synthesize(
        &self,
        market: &MarketData,
        indicators: &IndicatorSnapshot,
        ml: Option<(PredictedClass, f64)>,
        config: &StrategyConfig,
    ) -> (TradeSignal, SignalBreakdown) {
        let technical = technical_signal(indicators, config);
        let (ml_class, ml_confidence) = ml.unwrap_or((PredictedClass::Hold, 0.5));

        let w_technical = config.parameter("technical_weight", 0.3);
        let w_ml = config.parameter("ml_weight", 0.7);
        let weighted = f64::from(technical) * w_technical + ml_class.score() * w_ml;

        let buy_threshold = config.parameter("buy_threshold", 1.2);
        let sell_threshold = config.parameter("sell_threshold", 0.8);
        let confidence_floor = config.parameter("confidence_threshold", 0.55);

        let (action, strength) = if weighted >= buy_threshold && ml_confidence >= confidence_floor {
            let strength = ((weighted - sell_threshold) * ml_confidence).clamp(0.0, 1.0);
            (SignalAction::Buy, strength)
        } else if weighted <= sell_threshold && ml_confidence >= confidence_floor {
            let strength = ((buy_threshold - weighted) * ml_confidence).clamp(0.0, 1.0);
            (SignalAction::Sell, strength)
        } else {
            (SignalAction::Hold, 0.0)
        };

        tracing::debug!(
            symbol = %market.symbol,
            %action,
            technical,
            ml_class = ml_class.score(),
            ml_confidence,
            weighted,
            "signal synthesized"
        );

        let signal = TradeSignal {
            symbol: market.symbol.clone(),
            action,
            strength,
            confidence: ml_confidence,
            price: market.price,
            timestamp: Utc::now(),
        };
        let breakdown = SignalBreakdown {
            technical_signal: technical,
            ml_class,
            ml_confidence,
            weighted_score: weighted,
        };
        (signal, breakdown)
    }
}

impl Default for SignalSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Technical sub-signal in {-1, 0, +1}. Buy requires RSI oversold AND a
/// bullish MACD crossover AND EMA12 above EMA26; sell is symmetric. A
/// strongly contrarian sentiment ratio cancels the rule signal.
fn technical_signal(ind: &IndicatorSnapshot, config: &StrategyConfig) -> i8 {
    let rsi_oversold = config.parameter("rsi_oversold", 30.0);
    let rsi_overbought = config.parameter("rsi_overbought", 70.0);

    let rsi = IndicatorSnapshot::finite(ind.rsi);
    let macd = IndicatorSnapshot::finite(ind.macd);
    let macd_signal = IndicatorSnapshot::finite(ind.macd_signal);
    let prev_macd = IndicatorSnapshot::finite(ind.prev_macd);
    let prev_macd_signal = IndicatorSnapshot::finite(ind.prev_macd_signal);
    let ema_12 = IndicatorSnapshot::finite(ind.ema_12);
    let ema_26 = IndicatorSnapshot::finite(ind.ema_26);

    let rsi_buy = rsi.is_some_and(|r| r < rsi_oversold);
    let rsi_sell = rsi.is_some_and(|r| r > rsi_overbought);

    let (macd_bullish, macd_bearish) = match (macd, macd_signal, prev_macd, prev_macd_signal) {
        (Some(m), Some(s), Some(pm), Some(ps)) => (m > s && pm <= ps, m < s && pm >= ps),
        _ => (false, false),
    };

    let (ema_bullish, ema_bearish) = match (ema_12, ema_26) {
        (Some(fast), Some(slow)) => (fast > slow, fast < slow),
        _ => (false, false),
    };

    let mut signal: i8 = if rsi_buy && macd_bullish && ema_bullish {
        1
    } else if rsi_sell && macd_bearish && ema_bearish {
        -1
    } else {
        0
    };

    // Strongly contrarian news sentiment cancels the rule signal
    if let Some(ratio) = IndicatorSnapshot::finite(ind.sentiment_ratio) {
        if (signal > 0 && ratio <= 0.4) || (signal < 0 && ratio >= 0.6) {
            tracing::debug!(
                symbol = %ind.symbol,
                ratio,
                "sentiment contradicts rule signal, degrading to neutral"
            );
            signal = 0;
        }
    }

    signal
}
