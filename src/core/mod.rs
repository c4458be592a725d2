pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{ClientConfig, Config, CredentialsConfig, WsConfig};
pub use error::{IcrypexError, Result};
pub use metrics::ClientMetrics;
