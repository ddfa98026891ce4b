use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_core::{CoreError, PredictedClass, Predictor};

use crate::error::{MlError, MlResult};

#[derive(Debug, Clone, Serialize)]
struct PredictRequest {
    features: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictResponse {
    /// Class label: 0=sell, 1=hold, 2=buy
    class_label: u8,
    confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
struct TrainRequest {
    symbols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TrainResponse {
    status: String,
    #[serde(default)]
    accuracy: Option<f64>,
}

/// Client for the ensemble classifier service. The model itself is a
/// black box; this tracks when it was last trained so the orchestrator
/// can trigger retraining once it goes stale.
pub struct PredictorClient {
    client: reqwest::Client,
    base_url: String,
    last_trained: Mutex<Option<DateTime<Utc>>>,
}

impl PredictorClient {
    pub fn new(base_url: String, timeout: Duration) -> MlResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            last_trained: Mutex::new(None),
        })
    }

    pub async fn health(&self) -> MlResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MlError::ServiceUnavailable(format!(
                "status: {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn predict_raw(
        &self,
        features: &HashMap<String, f64>,
    ) -> MlResult<(PredictedClass, f64)> {
        let request = PredictRequest {
            features: features.clone(),
        };

        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MlError::ServiceUnavailable(format!(
                "status: {}",
                response.status()
            )));
        }

        let result = response.json::<PredictResponse>().await?;
        let class = PredictedClass::from_label(result.class_label).ok_or_else(|| {
            MlError::InvalidResponse(format!("unknown class label {}", result.class_label))
        })?;
        Ok((class, result.confidence.clamp(0.0, 1.0)))
    }

    pub async fn train_raw(&self, symbols: &[String]) -> MlResult<()> {
        let request = TrainRequest {
            symbols: symbols.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/train", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MlError::ServiceUnavailable(format!(
                "status: {}",
                response.status()
            )));
        }

        let result = response.json::<TrainResponse>().await?;
        tracing::info!(
            status = %result.status,
            accuracy = result.accuracy,
            "predictor training triggered"
        );

        let mut last_trained = self
            .last_trained
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last_trained = Some(Utc::now());
        Ok(())
    }

    pub fn last_trained(&self) -> Option<DateTime<Utc>> {
        *self
            .last_trained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Predictor for PredictorClient {
    async fn predict(
        &self,
        features: &HashMap<String, f64>,
    ) -> Result<(PredictedClass, f64), CoreError> {
        self.predict_raw(features)
            .await
            .map_err(|e| CoreError::DataSource(e.to_string()))
    }

    async fn trigger_training(&self, symbols: &[String]) -> Result<(), CoreError> {
        self.train_raw(symbols)
            .await
            .map_err(|e| CoreError::DataSource(e.to_string()))
    }

    fn is_stale(&self, hours_threshold: i64) -> bool {
        match self.last_trained() {
            None => true,
            Some(at) => (Utc::now() - at).num_hours() >= hours_threshold,
        }
    }
}
