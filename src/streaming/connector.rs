use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, warn};

use crate::core::Result;

/// Frame or control message headed to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutgoing {
    Text(String),
    Pong(Vec<u8>),
    Close,
}

/// What the socket delivered. The inbound channel ending means the socket closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsIncoming {
    Text(String),
    Error(String),
}

/// Both directions of one open socket.
pub struct WsChannel {
    pub outbound: mpsc::UnboundedSender<WsOutgoing>,
    pub inbound: mpsc::UnboundedReceiver<WsIncoming>,
}

#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<WsChannel>;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<WsChannel> {
        debug!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsOutgoing>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WsIncoming>();
        let pong_tx = outbound_tx.clone();

        tokio::spawn(async move {
            while let Some(outgoing) = outbound_rx.recv().await {
                let result = match outgoing {
                    WsOutgoing::Text(text) => write.send(Message::Text(text)).await,
                    WsOutgoing::Pong(data) => write.send(Message::Pong(data)).await,
                    WsOutgoing::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };

                if let Err(e) = result {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(WsIncoming::Text(text)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(WsOutgoing::Pong(data));
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("🔌 WebSocket closed by server: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        error!("❌ WebSocket error: {}", e);
                        let _ = inbound_tx.send(WsIncoming::Error(e.to_string()));
                        break;
                    }
                    _ => {}
                }
            }
            // Dropping inbound_tx tells the session the socket is gone.
        });

        Ok(WsChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
