// Fixed-window request limiter, one window per endpoint key.
//
// Bursts that straddle a window boundary can briefly exceed the nominal rate.
// That is the accepted behavior of a fixed window; switching to a sliding log
// changes what callers observe at the edges.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl EndpointLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: window.max(Duration::from_millis(1)),
        }
    }

    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }
}

/// Static limit table. Always has a `"default"` entry.
#[derive(Debug, Clone)]
pub struct RateLimitTable {
    default: EndpointLimit,
    limits: HashMap<String, EndpointLimit>,
}

impl RateLimitTable {
    pub fn new(default: EndpointLimit) -> Self {
        Self {
            default,
            limits: HashMap::new(),
        }
    }

    pub fn with_limit(mut self, key: impl Into<String>, limit: EndpointLimit) -> Self {
        let key = key.into();
        if key == DEFAULT_KEY {
            self.default = limit;
        } else {
            self.limits.insert(key, limit);
        }
        self
    }

    /// Published iCrypex REST limits.
    pub fn icrypex() -> Self {
        let public = EndpointLimit::per_second(10);
        let private = EndpointLimit::per_second(5);

        Self::new(public)
            // Public endpoints
            .with_limit("/v1/exchange/info", public)
            .with_limit("/v1/tickers", public)
            .with_limit("/v1/orderbook", public)
            .with_limit("/v1/trades/last", public)
            .with_limit("/v1/trades/kline", public)
            .with_limit("/sapi/v1/trades/kline/history", private)
            .with_limit("/sapi/v1/trades/ohlc", private)
            // Authenticated endpoints
            .with_limit("/sapi/v1/wallet", private)
            .with_limit("/sapi/v1/orders", private)
            .with_limit("/sapi/v1/orders/history", private)
            .with_limit("/sapi/v1/trades", private)
    }

    pub fn limit_for(&self, key: &str) -> EndpointLimit {
        self.limits.get(key).copied().unwrap_or(self.default)
    }
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self::icrypex()
    }
}

/// Window state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub window_start: Instant,
    pub count: u32,
}

type Slot = Arc<Mutex<Option<WindowState>>>;

pub struct RateLimiter {
    table: RateLimitTable,
    windows: RwLock<HashMap<String, Slot>>,
    total_acquired: AtomicU64,
    total_delayed: AtomicU64,
}

/// Strips the query string so `/v1/orderbook?symbol=X` shares the `/v1/orderbook` bucket.
pub fn endpoint_key(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

impl RateLimiter {
    pub fn new(table: RateLimitTable) -> Self {
        tracing::debug!(
            "Rate limiter initialized (default {} req / {:?})",
            table.default.max_requests,
            table.default.window
        );

        Self {
            table,
            windows: RwLock::new(HashMap::new()),
            total_acquired: AtomicU64::new(0),
            total_delayed: AtomicU64::new(0),
        }
    }

    /// Waits until `key` has room in its window. Never fails.
    ///
    /// The query string is dropped before lookup (see [`endpoint_key`]), so
    /// `/sapi/v1/orders?orderId=1` draws from the `/sapi/v1/orders` limit rather than
    /// getting a per-URL bucket that would fall back to `default`.
    pub async fn acquire(&self, key: &str) {
        let key = endpoint_key(key);
        let limit = self.table.limit_for(key);
        let slot = self.slot(key).await;

        // Held across the sleep: concurrent callers on this key queue behind us.
        let mut guard = slot.lock().await;
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let first_use = guard.is_none();
        let state = guard.get_or_insert(WindowState {
            window_start: now,
            count: 1,
        });
        if first_use {
            return;
        }

        let elapsed = now.duration_since(state.window_start);
        if elapsed > limit.window {
            state.window_start = now;
            state.count = 1;
            return;
        }

        state.count += 1;

        if state.count > limit.max_requests {
            let wait = limit.window.saturating_sub(elapsed);
            self.total_delayed.fetch_add(1, Ordering::Relaxed);

            tracing::warn!(
                "⏳ Rate limit reached for {} ({}/{}), waiting {:?}",
                key,
                state.count - 1,
                limit.max_requests,
                wait
            );

            tokio::time::sleep(wait).await;

            state.window_start = Instant::now();
            state.count = 1;
        }
    }

    async fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.windows.read().await.get(key) {
            return slot.clone();
        }

        let mut windows = self.windows.write().await;
        windows
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    pub async fn window_state(&self, key: &str) -> Option<WindowState> {
        let slot = self.windows.read().await.get(endpoint_key(key)).cloned()?;
        let state = *slot.lock().await;
        state
    }

    pub fn limit_for(&self, key: &str) -> EndpointLimit {
        self.table.limit_for(endpoint_key(key))
    }

    pub fn get_stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_delayed: self.total_delayed.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitTable::icrypex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_acquired: u64,
    pub total_delayed: u64,
}
