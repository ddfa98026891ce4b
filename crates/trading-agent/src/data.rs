use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use trading_core::{CoreError, IndicatorSnapshot, MarketData, MarketDataProvider};

/// Thin client for the market-data service that supplies quotes,
/// indicator snapshots, and ML feature vectors. Indicator math and
/// bar storage live on the other side of this boundary.
pub struct DataServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl DataServiceClient {
    pub fn new(base_url: String) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::DataSource(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, CoreError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| CoreError::DataSource(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::DataSource(format!(
                "data service returned {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::InvalidData(e.to_string()))
    }
}

#[async_trait]
impl MarketDataProvider for DataServiceClient {
    async fn market_snapshot(&self, symbols: &[String]) -> Result<Vec<MarketData>, CoreError> {
        let query = symbols.join(",");
        self.get_json(&format!("/market_data?symbols={query}")).await
    }

    async fn latest_price(&self, symbol: &str) -> Result<f64, CoreError> {
        let snapshot = self.market_snapshot(&[symbol.to_string()]).await?;
        snapshot
            .into_iter()
            .find(|m| m.symbol == symbol)
            .map(|m| m.price)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| CoreError::PriceUnavailable(symbol.to_string()))
    }

    async fn indicator_snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, CoreError> {
        self.get_json(&format!("/indicators/{symbol}")).await
    }

    async fn feature_vector(&self, symbol: &str) -> Result<HashMap<String, f64>, CoreError> {
        self.get_json(&format!("/features/{symbol}")).await
    }
}
