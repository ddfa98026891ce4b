use std::collections::HashMap;

use async_trait::async_trait;

use crate::{CoreError, IndicatorSnapshot, MarketData, PredictedClass};

/// Supplier of market snapshots and precomputed indicator series.
/// Historical storage and indicator math live behind this boundary.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn market_snapshot(&self, symbols: &[String]) -> Result<Vec<MarketData>, CoreError>;

    async fn latest_price(&self, symbol: &str) -> Result<f64, CoreError>;

    async fn indicator_snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, CoreError>;

    /// Feature vector for the ML predictor, keyed by feature name
    async fn feature_vector(&self, symbol: &str) -> Result<HashMap<String, f64>, CoreError>;
}

/// Black-box ensemble classifier: class + confidence per prediction,
/// retrained out of band.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(
        &self,
        features: &HashMap<String, f64>,
    ) -> Result<(PredictedClass, f64), CoreError>;

    /// Kick off (re)training for the given symbols; returns once the
    /// request is accepted, not once training finishes.
    async fn trigger_training(&self, symbols: &[String]) -> Result<(), CoreError>;

    /// Whether the model is older than the given threshold (or untrained)
    fn is_stale(&self, hours_threshold: i64) -> bool;
}
