use thiserror::Error;

pub type Result<T> = std::result::Result<T, IcrypexError>;

/// Every failure the client surfaces to its callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IcrypexError {
    /// Transport could not reach the venue.
    #[error("Network error: {0}")]
    Network(String),

    /// The request deadline fired. Treated as a network failure.
    #[error("Network error: request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error! status: {status}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("WebSocket is not connected")]
    NotConnected,

    #[error("Missing required parameters: {0}")]
    InvalidParameters(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

pub(crate) const EMPTY_RESPONSE: &str = "Empty response received";
pub(crate) const INVALID_JSON: &str = "Invalid JSON response";

impl IcrypexError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout { .. })
    }

    pub fn is_empty_response(&self) -> bool {
        matches!(self, Self::Parse(msg) if msg == EMPTY_RESPONSE)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IcrypexError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest has no per-request deadline configured; the pipeline owns timeouts
            Self::Network(format!("transport timeout: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for IcrypexError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
