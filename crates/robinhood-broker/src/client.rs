use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use broker_core::{
    BrokerAccount, BrokerClient, BrokerError, BrokerHolding, BrokerOrder, BrokerOrderRequest,
    BrokerResult,
};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use reqwest::{header, Client, Method};

use crate::models::*;
use crate::rate_limit::SlidingWindowLimiter;

const DEFAULT_BASE_URL: &str = "https://trading.robinhood.com";
const API_ROOT: &str = "/api/v1/crypto/trading";

#[derive(Debug)]
pub struct RobinhoodClient {
    client: Client,
    base_url: String,
    api_key: String,
    signing_key: SigningKey,
    limiter: SlidingWindowLimiter,
}

impl RobinhoodClient {
    /// Create a client from an API key and the base64-encoded Ed25519
    /// private key seed.
    pub fn new(
        api_key: String,
        private_key_base64: &str,
        base_url: Option<String>,
    ) -> BrokerResult<Self> {
        let seed = BASE64
            .decode(private_key_base64.trim())
            .map_err(|e| BrokerError::Auth(format!("private key is not valid base64: {e}")))?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| BrokerError::Auth("private key seed must be 32 bytes".to_string()))?;
        let signing_key = SigningKey::from_bytes(&seed);

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            signing_key,
            limiter: SlidingWindowLimiter::per_minute(100),
        })
    }

    /// Create client from environment variables
    /// (ROBINHOOD_API_KEY / ROBINHOOD_PRIVATE_KEY / ROBINHOOD_BASE_URL).
    pub fn from_env() -> BrokerResult<Self> {
        let api_key = std::env::var("ROBINHOOD_API_KEY")
            .map_err(|_| BrokerError::Auth("ROBINHOOD_API_KEY not set".to_string()))?;
        let private_key = std::env::var("ROBINHOOD_PRIVATE_KEY")
            .map_err(|_| BrokerError::Auth("ROBINHOOD_PRIVATE_KEY not set".to_string()))?;
        let base_url = std::env::var("ROBINHOOD_BASE_URL").ok();
        Self::new(api_key, &private_key, base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sign `api_key ∥ timestamp ∥ path ∥ method ∥ body` with Ed25519
    /// and return the base64 signature. The body string must be the
    /// exact bytes that go on the wire; signing anything else silently
    /// invalidates the signature.
    fn sign(&self, method: &str, path: &str, body: &str, timestamp: &str) -> String {
        let message = format!("{}{}{}{}{}", self.api_key, timestamp, path, method, body);
        let signature = self.signing_key.sign(message.as_bytes());
        BASE64.encode(signature.to_bytes())
    }

    fn signed_headers(&self, method: &str, path: &str, body: &str) -> header::HeaderMap {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(method, path, body, &timestamp);

        let mut headers = header::HeaderMap::new();
        // API keys and base64 signatures are plain ASCII; a key that is
        // not would never have authenticated anyway
        if let Ok(v) = header::HeaderValue::from_str(&self.api_key) {
            headers.insert("x-api-key", v);
        }
        if let Ok(v) = header::HeaderValue::from_str(&timestamp) {
            headers.insert("x-timestamp", v);
        }
        if let Ok(v) = header::HeaderValue::from_str(&signature) {
            headers.insert("x-signature", v);
        }
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers
    }

    /// Rate-limited, signed request. `path` includes the query string,
    /// since the query is part of the signed message.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> BrokerResult<reqwest::Response> {
        self.limiter.acquire().await;

        let body_str = body.unwrap_or_default();
        let headers = self.signed_headers(method.as_str(), path, &body_str);
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.client.request(method, &url).headers(headers);
        if !body_str.is_empty() {
            request = request.body(body_str);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Auth(body));
        }
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(BrokerError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    pub async fn get_account_raw(&self) -> BrokerResult<AccountResponse> {
        let response = self
            .request(Method::GET, &format!("{API_ROOT}/accounts/"), None)
            .await?;
        Ok(response.json::<AccountResponse>().await?)
    }

    pub async fn get_holdings_raw(&self) -> BrokerResult<Vec<HoldingResponse>> {
        let response = self
            .request(Method::GET, &format!("{API_ROOT}/holdings/"), None)
            .await?;
        let page = response.json::<Paginated<HoldingResponse>>().await?;
        Ok(page.results)
    }

    pub async fn get_trading_pairs(&self) -> BrokerResult<Vec<TradingPair>> {
        let response = self
            .request(Method::GET, &format!("{API_ROOT}/trading_pairs/"), None)
            .await?;
        let page = response.json::<Paginated<TradingPair>>().await?;
        Ok(page.results)
    }

    pub async fn get_best_bid_ask(&self, symbols: &[String]) -> BrokerResult<Vec<BestBidAsk>> {
        let query = symbols
            .iter()
            .map(|s| format!("symbol={s}"))
            .collect::<Vec<_>>()
            .join("&");
        let response = self
            .request(
                Method::GET,
                &format!("{API_ROOT}/best_bid_ask/?{query}"),
                None,
            )
            .await?;
        let page = response.json::<Paginated<BestBidAsk>>().await?;
        Ok(page.results)
    }

    pub async fn get_estimated_price(
        &self,
        symbol: &str,
        side: &str,
        quantity: &str,
    ) -> BrokerResult<Vec<EstimatedPrice>> {
        let path = format!(
            "{API_ROOT}/estimated_price/?symbol={symbol}&side={side}&quantity={quantity}"
        );
        let response = self.request(Method::GET, &path, None).await?;
        let page = response.json::<Paginated<EstimatedPrice>>().await?;
        Ok(page.results)
    }

    pub async fn place_order_raw(&self, order: &OrderRequest) -> BrokerResult<OrderResponse> {
        // One serialization: these exact bytes are signed and sent
        let body = serde_json::to_string(order)
            .map_err(|e| BrokerError::InvalidResponse(format!("order serialization: {e}")))?;

        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.market_order_config.asset_quantity,
            "submitting market order"
        );

        let response = self
            .request(Method::POST, &format!("{API_ROOT}/orders/"), Some(body))
            .await?;
        let order = response.json::<OrderResponse>().await?;
        tracing::info!(order_id = %order.id, state = %order.state, "order accepted");
        Ok(order)
    }

    pub async fn get_order_raw(&self, order_id: &str) -> BrokerResult<OrderResponse> {
        let response = self
            .request(Method::GET, &format!("{API_ROOT}/orders/{order_id}/"), None)
            .await?;
        Ok(response.json::<OrderResponse>().await?)
    }

    pub async fn get_orders_raw(&self, limit: Option<usize>) -> BrokerResult<Vec<OrderResponse>> {
        let path = match limit {
            Some(limit) => format!("{API_ROOT}/orders/?limit={limit}"),
            None => format!("{API_ROOT}/orders/"),
        };
        let response = self.request(Method::GET, &path, None).await?;
        let page = response.json::<Paginated<OrderResponse>>().await?;
        Ok(page.results)
    }

    pub async fn cancel_order_raw(&self, order_id: &str) -> BrokerResult<()> {
        self.request(
            Method::POST,
            &format!("{API_ROOT}/orders/{order_id}/cancel/"),
            None,
        )
        .await?;
        tracing::info!(order_id, "order cancelled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversion helpers: wire types -> unified broker types
// ---------------------------------------------------------------------------

fn account_to_broker(a: AccountResponse) -> BrokerAccount {
    BrokerAccount {
        account_number: a.account_number,
        status: a.status,
        currency: a.buying_power_currency,
        buying_power: a.buying_power,
    }
}

fn holding_to_broker(h: HoldingResponse) -> BrokerHolding {
    BrokerHolding {
        asset_code: h.asset_code,
        total_quantity: h.total_quantity,
        quantity_available_for_trading: h.quantity_available_for_trading,
    }
}

fn order_to_broker(o: OrderResponse) -> BrokerOrder {
    BrokerOrder {
        id: o.id,
        client_order_id: o.client_order_id,
        symbol: o.symbol,
        side: o.side,
        order_type: o.order_type,
        state: o.state,
        created_at: o.created_at,
        filled_asset_quantity: o.filled_asset_quantity,
        average_price: o.average_price,
    }
}

#[async_trait]
impl BrokerClient for RobinhoodClient {
    async fn get_account(&self) -> BrokerResult<BrokerAccount> {
        self.get_account_raw().await.map(account_to_broker)
    }

    async fn get_holdings(&self) -> BrokerResult<Vec<BrokerHolding>> {
        self.get_holdings_raw()
            .await
            .map(|hs| hs.into_iter().map(holding_to_broker).collect())
    }

    async fn submit_market_order(&self, order: BrokerOrderRequest) -> BrokerResult<BrokerOrder> {
        let request = OrderRequest {
            client_order_id: order.client_order_id,
            side: order.side.to_string(),
            symbol: order.symbol,
            order_type: "market".to_string(),
            market_order_config: MarketOrderConfig {
                asset_quantity: order.asset_quantity.to_string(),
            },
        };
        self.place_order_raw(&request).await.map(order_to_broker)
    }

    async fn get_order(&self, order_id: &str) -> BrokerResult<BrokerOrder> {
        self.get_order_raw(order_id).await.map(order_to_broker)
    }

    async fn get_orders(&self, limit: Option<usize>) -> BrokerResult<Vec<BrokerOrder>> {
        self.get_orders_raw(limit)
            .await
            .map(|os| os.into_iter().map(order_to_broker).collect())
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        self.cancel_order_raw(order_id).await
    }

    async fn ping(&self) -> BrokerResult<()> {
        self.get_account_raw().await.map(|_| ())
    }

    fn is_paper(&self) -> bool {
        false
    }

    fn broker_name(&self) -> &str {
        "robinhood"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Verifier, VerifyingKey};

    // Seed from the broker's public documentation example
    const DOC_PRIVATE_KEY: &str = "xQnTJVeQLmw1/Mg2YimEViSpw/SdJcgNXZ5kQkAXNPU=";

    fn doc_client() -> RobinhoodClient {
        RobinhoodClient::new(
            "rh-api-6148effc-c0b1-486c-8940-a1d099456be6".to_string(),
            DOC_PRIVATE_KEY,
            None,
        )
        .unwrap()
    }

    #[test]
    fn rejects_malformed_private_key() {
        let err = RobinhoodClient::new("key".to_string(), "not base64!!!", None).unwrap_err();
        assert!(matches!(err, BrokerError::Auth(_)));

        // Valid base64 but wrong length
        let err = RobinhoodClient::new("key".to_string(), "AAAA", None).unwrap_err();
        assert!(matches!(err, BrokerError::Auth(_)));
    }

    #[test]
    fn signature_verifies_against_the_public_key() {
        let client = doc_client();
        let body = r#"{"client_order_id":"131de903-5a9c-4260-abc1-28d562a5dcf0","side":"buy","symbol":"BTC-USD","type":"market","market_order_config":{"asset_quantity":"0.1"}}"#;
        let timestamp = "1698708981";
        let path = "/api/v1/crypto/trading/orders/";

        let signature_b64 = client.sign("POST", path, body, timestamp);
        let signature_bytes: [u8; 64] = BASE64
            .decode(signature_b64)
            .unwrap()
            .try_into()
            .unwrap();

        let verifying_key: VerifyingKey = client.signing_key.verifying_key();
        let message = format!(
            "{}{}{}{}{}",
            "rh-api-6148effc-c0b1-486c-8940-a1d099456be6", timestamp, path, "POST", body
        );
        verifying_key
            .verify(
                message.as_bytes(),
                &ed25519_dalek::Signature::from_bytes(&signature_bytes),
            )
            .expect("signature must verify");
    }

    #[test]
    fn signing_is_deterministic() {
        let client = doc_client();
        let a = client.sign("GET", "/api/v1/crypto/trading/accounts/", "", "1698708981");
        let b = client.sign("GET", "/api/v1/crypto/trading/accounts/", "", "1698708981");
        assert_eq!(a, b);

        // Any component change must change the signature
        let c = client.sign("GET", "/api/v1/crypto/trading/accounts/", "", "1698708982");
        assert_ne!(a, c);
    }

    #[test]
    fn order_request_serializes_to_the_documented_shape() {
        let request = OrderRequest {
            client_order_id: "131de903-5a9c-4260-abc1-28d562a5dcf0".to_string(),
            side: "buy".to_string(),
            symbol: "BTC-USD".to_string(),
            order_type: "market".to_string(),
            market_order_config: MarketOrderConfig {
                asset_quantity: "0.1".to_string(),
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""type":"market""#));
        assert!(json.contains(r#""market_order_config":{"asset_quantity":"0.1"}"#));
    }

    #[test]
    fn order_response_parses() {
        let json = r#"{
            "id": "5a3bd972-ae64-4f3f-8d7c-2b6e25e1a4c3",
            "client_order_id": "131de903-5a9c-4260-abc1-28d562a5dcf0",
            "symbol": "BTC-USD",
            "side": "buy",
            "type": "market",
            "state": "open",
            "created_at": "2024-01-15T10:30:00Z",
            "filled_asset_quantity": "0.0",
            "average_price": null
        }"#;

        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order.state, "open");
        assert_eq!(order.symbol, "BTC-USD");
        assert!(order.average_price.is_none());
    }

    #[tokio::test]
    #[ignore] // Only run with valid credentials
    async fn live_get_account() {
        let client = RobinhoodClient::from_env().unwrap();
        let account = client.get_account_raw().await.unwrap();
        println!("Account: {} ({})", account.account_number, account.status);
        assert!(!account.account_number.is_empty());
    }

    #[tokio::test]
    #[ignore] // Only run with valid credentials
    async fn live_get_trading_pairs() {
        let client = RobinhoodClient::from_env().unwrap();
        let pairs = client.get_trading_pairs().await.unwrap();
        println!("{} trading pairs", pairs.len());
        assert!(!pairs.is_empty());
    }
}
