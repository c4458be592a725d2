pub mod client;
pub mod rate_limiter;
pub mod signer;
pub mod transport;
pub mod types;

pub use client::IcrypexClient;
pub use rate_limiter::{EndpointLimit, RateLimitTable, RateLimiter};
pub use signer::{sign, Credentials};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::*;
