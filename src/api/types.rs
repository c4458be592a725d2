use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::{IcrypexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One REST call: path (with query string), verb, headers and an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub path: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Raw HTTP outcome handed back by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Appends `params` as a URL-encoded query string.
pub fn with_query<P: Serialize + ?Sized>(path: &str, params: &P) -> Result<String> {
    let query = serde_urlencoded::to_string(params)
        .map_err(|e| IcrypexError::InvalidParameters(format!("cannot encode query: {e}")))?;

    if query.is_empty() {
        Ok(path.to_string())
    } else {
        Ok(format!("{}?{}", path, query))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    StopMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Fill,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InsertType {
    Default,
    Borrow,
    Repay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaginationType {
    Limit,
    Market,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KLineParams {
    pub symbol: String,
    pub from: u64,
    pub to: u64,
    /// One of `1`, `5`, `15`, `60`, `240`, `1D`, `1W`.
    pub resolution: String,
}

impl KLineParams {
    pub fn new(symbol: impl Into<String>, from: u64, to: u64, resolution: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            from,
            to,
            resolution: resolution.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.symbol.is_empty() {
            missing.push("symbol");
        }
        if self.from == 0 {
            missing.push("from");
        }
        if self.to == 0 {
            missing.push("to");
        }
        if self.resolution.is_empty() {
            missing.push("resolution");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(IcrypexError::InvalidParameters(missing.join(", ")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OhlcParams {
    pub symbol: String,
    pub from: u64,
    pub to: u64,
}

impl OhlcParams {
    pub fn new(symbol: impl Into<String>, from: u64, to: u64) -> Self {
        Self {
            symbol: symbol.into(),
            from,
            to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderParams {
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_type: Option<InsertType>,
}

impl PlaceOrderParams {
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        price: impl Into<String>,
        quantity: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            order_type: OrderType::Limit,
            side,
            price: Some(price.into()),
            quantity: Some(quantity.into()),
            total: None,
            trigger_price: None,
            client_id: None,
            insert_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOpenOrdersParams {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub pagination_type: Option<PaginationType>,
    pub page: u32,
    pub limit: u32,
}

impl Default for GetOpenOrdersParams {
    fn default() -> Self {
        Self {
            pagination_type: None,
            page: 1,
            limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllOrdersParams {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub pagination_type: Option<PaginationType>,
    pub page: u32,
    pub limit: u32,
    pub from: u64,
    pub to: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<OrderSide>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserTradesParams {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub pagination_type: Option<PaginationType>,
    pub page: u32,
    pub limit: u32,
    pub from: u64,
    pub to: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<OrderSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}
