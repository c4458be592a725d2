use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.icrypex.com";
pub const DEFAULT_WS_URL: &str = "wss://istream.icrypex.com";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const RECONNECT_INTERVAL_MS: u64 = 5_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub credentials: CredentialsConfig,
    pub client: ClientConfig,
    pub websocket: WsConfig,
    pub log_level: String,
}

/// Raw API key pair as read from the environment. The secret is still base64 here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub replay_subscriptions: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            reconnect_interval_ms: RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            replay_subscriptions: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let timeout_ms = parse_var("ICRYPEX_TIMEOUT_MS", DEFAULT_TIMEOUT_MS);

        Config {
            credentials: CredentialsConfig {
                api_key: non_empty_var("ICRYPEX_API_KEY"),
                api_secret: non_empty_var("ICRYPEX_API_SECRET"),
            },
            client: ClientConfig {
                base_url: env::var("ICRYPEX_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
                timeout_ms,
                max_retries: parse_var("ICRYPEX_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            },
            websocket: WsConfig {
                url: env::var("ICRYPEX_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string()),
                connect_timeout_ms: timeout_ms,
                ..WsConfig::default()
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

// Zero counts as unset, same as an absent or malformed value.
fn parse_var<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialEq + Default,
{
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .filter(|v| *v != T::default())
        .unwrap_or(default)
}
