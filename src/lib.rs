//! Client for the iCrypex REST API and WebSocket feed.
//!
//! [`IcrypexClient`] runs every REST call through a per-endpoint rate limiter,
//! a per-attempt deadline and linear retry backoff. [`IcrypexWebSocket`] keeps
//! one feed connection alive, logs in when credentials are present and
//! restores subscriptions after a reconnect.

pub mod api;
pub mod core;
pub mod streaming;

pub use api::{Credentials, IcrypexClient, RequestSpec};
pub use crate::core::{ClientConfig, Config, IcrypexError, Result, WsConfig};
pub use streaming::{IcrypexWebSocket, SessionState, WsEvent};
