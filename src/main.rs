use anyhow::Result;
use icrypex_client::core::{logging, Config};
use icrypex_client::streaming::{IcrypexWebSocket, WsEvent};
use icrypex_client::IcrypexClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    logging::init_logging(&config.log_level);

    tracing::info!("🚀 iCrypex client starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("REST: {} | WS: {}", config.client.base_url, config.websocket.url);

    let client = IcrypexClient::from_config(&config)?;

    let tickers = client.get_tickers().await?;
    let count = tickers.as_array().map(|t| t.len()).unwrap_or(0);
    tracing::info!("✅ Fetched {} tickers", count);

    if client.has_credentials() {
        let balance = client.get_spot_balance().await?;
        tracing::info!("Spot balance: {}", balance);
    }

    let (ws, mut events) = IcrypexWebSocket::from_config(&config)?;
    ws.connect().await?;
    ws.subscribe_tickers().await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(WsEvent::Message { message_type, payload }) => {
                    tracing::info!("{}: {}", message_type, payload);
                }
                Some(WsEvent::ReconnectFailed { attempts }) => {
                    tracing::error!("Feed lost after {} reconnect attempts", attempts);
                    break;
                }
                Some(other) => tracing::debug!("Feed event: {:?}", other),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    ws.disconnect().await;
    Ok(())
}
