use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rate_limiter::{RateLimitTable, RateLimiter};
use super::signer::{now_millis, Credentials};
use super::transport::{HttpTransport, ReqwestTransport};
use super::types::*;
use crate::core::error::{EMPTY_RESPONSE, INVALID_JSON};
use crate::core::{ClientConfig, ClientMetrics, Config, IcrypexError, Result};

/// Backoff unit between attempts; attempt `i` waits `(i + 1)` units.
pub const RETRY_BACKOFF_MS: u64 = 1_000;

pub struct IcrypexClient {
    transport: Arc<dyn HttpTransport>,
    config: ClientConfig,
    credentials: Option<Credentials>,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<ClientMetrics>,
    cancellation_token: CancellationToken,
}

impl IcrypexClient {
    /// Client for public endpoints only.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            transport: Arc::new(ReqwestTransport::new()),
            config,
            credentials: None,
            rate_limiter: Arc::new(RateLimiter::new(RateLimitTable::icrypex())),
            metrics: Arc::new(ClientMetrics::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Fails with a configuration error when `api_secret` is not base64.
    pub fn with_credentials(api_key: &str, api_secret: &str, config: ClientConfig) -> Result<Self> {
        let credentials = Credentials::new(api_key, api_secret)?;
        Ok(Self {
            credentials: Some(credentials),
            ..Self::new(config)
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        match (&config.credentials.api_key, &config.credentials.api_secret) {
            (Some(key), Some(secret)) => Self::with_credentials(key, secret, config.client.clone()),
            _ => Ok(Self::new(config.client.clone())),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_rate_limits(mut self, table: RateLimitTable) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(table));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.metrics.clone()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Cancels every in-flight and future call made through [`execute`](Self::execute).
    pub fn cancel_all_requests(&self) {
        self.cancellation_token.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Runs `spec` with rate limiting, a per-attempt deadline and linear backoff.
    ///
    /// Returns the last attempt's error unchanged once `max_retries` attempts have failed.
    /// A deadline expiry is returned at once as [`IcrypexError::Timeout`] and is not retried.
    pub async fn execute(&self, spec: &RequestSpec, max_retries: u32, timeout: Duration) -> Result<Value> {
        self.execute_with_cancel(spec, max_retries, timeout, &self.cancellation_token)
            .await
    }

    /// Same as [`execute`](Self::execute) but aborts with [`IcrypexError::Cancelled`] as soon as
    /// `cancel` fires, whether mid-request or mid-backoff.
    pub async fn execute_with_cancel(
        &self,
        spec: &RequestSpec,
        max_retries: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let attempts = max_retries.max(1);
        let url = format!("{}{}", self.config.base_url, spec.path);

        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IcrypexError::Cancelled),
                result = self.attempt(&url, spec, timeout) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            self.metrics.increment_failed_attempts();
            tracing::error!("Attempt {} failed for {}: {}", attempt + 1, spec.path, err);

            // An expired deadline ends the call: no backoff, no further attempts.
            if attempt + 1 >= attempts || matches!(err, IcrypexError::Timeout { .. }) {
                return Err(err);
            }

            let backoff = Duration::from_millis(RETRY_BACKOFF_MS * (attempt as u64 + 1));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IcrypexError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }

            self.metrics.increment_retries();
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str, spec: &RequestSpec, timeout: Duration) -> Result<Value> {
        self.rate_limiter.acquire(&spec.path).await;

        tracing::debug!("Sending request to {} {}", spec.method, spec.path);
        self.metrics.increment_requests_sent();
        let started = Instant::now();

        let response = match tokio::time::timeout(timeout, self.transport.send(url, spec)).await {
            Ok(response) => response?,
            Err(_) => {
                let timeout_ms = timeout_millis(timeout);
                self.metrics.increment_timeouts();
                tracing::error!("Request timed out after {}ms", timeout_ms);
                return Err(IcrypexError::Timeout { timeout_ms });
            }
        };

        if !response.is_success() {
            tracing::error!(
                "HTTP error! status: {}, body: {}",
                response.status,
                response.body
            );
            return Err(IcrypexError::Api {
                status: response.status,
                body: response.body,
            });
        }

        let value = parse_body(&response.body)?;
        self.metrics.record_success(started.elapsed());
        Ok(value)
    }

    /// Signs and sends `method path` with the configured retries and timeout.
    pub async fn authenticated_execute(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            IcrypexError::Configuration(
                "API key and secret are required for authenticated endpoints".to_string(),
            )
        })?;

        let timestamp = now_millis();
        let headers = credentials.auth_headers(timestamp, now_millis())?;

        let mut spec = RequestSpec::new(method, path).with_headers(headers);
        if let Some(body) = body.filter(|b| !b.is_null()) {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| IcrypexError::Parse(format!("cannot serialize body: {e}")))?;
            spec = spec.with_body(bytes);
        }

        self.execute(&spec, self.config.max_retries, self.config.timeout())
            .await
    }

    async fn public_get(&self, path: &str) -> Result<Value> {
        self.execute(
            &RequestSpec::get(path),
            self.config.max_retries,
            self.config.timeout(),
        )
        .await
    }

    // Public endpoints

    pub async fn get_exchange_info(&self) -> Result<Value> {
        tracing::debug!("Getting exchange info");
        self.public_get("/v1/exchange/info").await
    }

    pub async fn get_tickers(&self) -> Result<Value> {
        tracing::debug!("Getting tickers");
        self.public_get("/v1/tickers").await
    }

    pub async fn get_order_book(&self, symbol: &str) -> Result<Value> {
        tracing::debug!("Getting order book for {}", symbol);
        let path = with_query("/v1/orderbook", &[("symbol", symbol)])?;
        self.public_get(&path).await
    }

    pub async fn get_last_trades(&self, symbol: &str) -> Result<Value> {
        tracing::debug!("Getting last trades for {}", symbol);
        let path = with_query("/v1/trades/last", &[("symbol", symbol)])?;
        self.public_get(&path).await
    }

    pub async fn get_kline_data(&self, params: &KLineParams) -> Result<Value> {
        params.validate()?;
        tracing::debug!("Getting K-Line data for {}", params.symbol);
        let path = with_query("/v1/trades/kline", params)?;
        self.public_get(&path).await
    }

    pub async fn get_kline_history(&self, params: &KLineParams) -> Result<Value> {
        tracing::debug!("Getting K-Line history for {}", params.symbol);
        let path = with_query("/sapi/v1/trades/kline/history", params)?;
        self.public_get(&path).await
    }

    /// OHLC bars for a period. `None` when the venue has nothing for it.
    ///
    /// An empty body is read as "no data". This conflates a transport-level empty
    /// response with an empty result and applies to this endpoint only.
    pub async fn get_ohlc(&self, params: &OhlcParams) -> Result<Option<Value>> {
        tracing::debug!("Getting OHLC for {}", params.symbol);
        let path = with_query("/sapi/v1/trades/ohlc", params)?;

        match self.public_get(&path).await {
            Ok(value) if is_empty_value(&value) => {
                tracing::warn!("Empty OHLC response received for {}", params.symbol);
                Ok(None)
            }
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_empty_response() => {
                tracing::warn!("Empty OHLC response received for {}", params.symbol);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    // Authenticated endpoints

    pub async fn get_spot_balance(&self) -> Result<Value> {
        tracing::debug!("Getting spot balance");
        self.authenticated_execute(HttpMethod::Get, "/sapi/v1/wallet", None)
            .await
    }

    pub async fn place_order(&self, params: &PlaceOrderParams) -> Result<Value> {
        tracing::debug!("Placing order: {:?}", params);
        let body = serde_json::to_value(params)
            .map_err(|e| IcrypexError::InvalidParameters(format!("cannot encode order: {e}")))?;
        self.authenticated_execute(HttpMethod::Post, "/sapi/v1/orders", Some(&body))
            .await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<Value> {
        tracing::debug!("Cancelling order {}", order_id);
        let path = with_query("/sapi/v1/orders", &[("orderId", order_id)])?;
        self.authenticated_execute(HttpMethod::Delete, &path, None)
            .await
    }

    pub async fn get_open_orders(&self, params: &GetOpenOrdersParams) -> Result<Value> {
        tracing::debug!("Getting open orders: {:?}", params);
        let path = with_query("/sapi/v1/orders", params)?;
        self.authenticated_execute(HttpMethod::Get, &path, None)
            .await
    }

    pub async fn get_all_orders(&self, params: &GetAllOrdersParams) -> Result<Value> {
        tracing::debug!("Getting all orders: {:?}", params);
        let path = with_query("/sapi/v1/orders/history", params)?;
        self.authenticated_execute(HttpMethod::Get, &path, None)
            .await
    }

    pub async fn get_user_trades(&self, params: &GetUserTradesParams) -> Result<Value> {
        tracing::debug!("Getting user trades: {:?}", params);
        let path = with_query("/sapi/v1/trades", params)?;
        self.authenticated_execute(HttpMethod::Get, &path, None)
            .await
    }
}

fn parse_body(body: &str) -> Result<Value> {
    if body.is_empty() {
        return Err(IcrypexError::Parse(EMPTY_RESPONSE.to_string()));
    }

    serde_json::from_str(body).map_err(|_| {
        tracing::error!("Failed to parse JSON: {}", body);
        IcrypexError::Parse(INVALID_JSON.to_string())
    })
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
