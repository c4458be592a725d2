use async_trait::async_trait;
use icrypex_client::streaming::{
    CloseReason, IcrypexWebSocket, SessionState, WsChannel, WsConnector, WsEvent, WsIncoming,
    WsOutgoing,
};
use icrypex_client::{Credentials, IcrypexError, Result, WsConfig};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server end of one mocked socket.
struct ServerSide {
    from_client: mpsc::UnboundedReceiver<WsOutgoing>,
    to_client: mpsc::UnboundedSender<WsIncoming>,
}

impl ServerSide {
    fn next_frame(&mut self) -> Option<(String, Value)> {
        match self.from_client.try_recv().ok()? {
            WsOutgoing::Text(text) => {
                let (kind, json) = text.split_once('|')?;
                Some((kind.to_string(), serde_json::from_str(json).ok()?))
            }
            _ => None,
        }
    }
}

/// Accepts or refuses connects in script order; refuses once the script runs out.
struct MockConnector {
    script: Mutex<VecDeque<bool>>,
    attempts: Mutex<Vec<Instant>>,
    handshake: Duration,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl MockConnector {
    fn new(script: Vec<bool>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        Self::slow(script, Duration::ZERO)
    }

    /// Every connect takes `handshake` before it is accepted or refused.
    fn slow(script: Vec<bool>, handshake: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            attempts: Mutex::new(Vec::new()),
            handshake,
            servers,
        });
        (connector, accepted)
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WsConnector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<WsChannel> {
        self.attempts.lock().unwrap().push(Instant::now());
        if !self.handshake.is_zero() {
            tokio::time::sleep(self.handshake).await;
        }
        let accept = self.script.lock().unwrap().pop_front().unwrap_or(false);
        if !accept {
            return Err(IcrypexError::WebSocket("connection refused".to_string()));
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.servers.send(ServerSide {
            from_client,
            to_client,
        });

        Ok(WsChannel { outbound, inbound })
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<WsEvent>) -> Vec<WsEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn connect_with_credentials_sends_login_first() {
    let (connector, mut accepted) = MockConnector::new(vec![true]);
    let credentials = Credentials::new("apikey", "YXBpc2VjcmV0").unwrap();
    let (ws, mut events) =
        IcrypexWebSocket::with_connector(WsConfig::default(), Some(credentials), connector);

    tokio_test::assert_ok!(ws.connect().await);
    let mut server = accepted.recv().await.unwrap();

    let (kind, login) = server.next_frame().unwrap();
    assert_eq!(kind, "api-login");
    assert_eq!(login["pk"], "apikey");
    assert_eq!(login["n"], 15000);
    assert!(login["s"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(login["ts"].as_u64().is_some());

    assert_eq!(ws.state().await, SessionState::Ready);
    assert_eq!(drain(&mut events), vec![WsEvent::Connected]);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_framed_and_tracked() {
    let (connector, mut accepted) = MockConnector::new(vec![true]);
    let (ws, _events) = IcrypexWebSocket::with_connector(WsConfig::default(), None, connector);

    ws.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();

    ws.subscribe_order_book("BTCUSDT").await.unwrap();
    ws.subscribe_tradingview("ETHUSDT", "15").await.unwrap();
    assert_eq!(
        server.next_frame().unwrap(),
        ("subscribe".to_string(), json!({"c": "orderbook@btcusdt", "s": true}))
    );
    assert_eq!(
        server.next_frame().unwrap(),
        ("subscribe".to_string(), json!({"c": "tradingview@ethusdt_15", "s": true}))
    );
    assert_eq!(
        ws.subscriptions().await,
        vec!["orderbook@btcusdt".to_string(), "tradingview@ethusdt_15".to_string()]
    );

    ws.unsubscribe("orderbook@btcusdt").await.unwrap();
    assert_eq!(
        server.next_frame().unwrap(),
        ("subscribe".to_string(), json!({"c": "orderbook@btcusdt", "s": false}))
    );
    assert_eq!(ws.subscriptions().await, vec!["tradingview@ethusdt_15".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_are_dispatched_by_type() {
    let (connector, mut accepted) = MockConnector::new(vec![true]);
    let (ws, mut events) = IcrypexWebSocket::with_connector(WsConfig::default(), None, connector);

    ws.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();
    assert_eq!(events.recv().await, Some(WsEvent::Connected));

    server
        .to_client
        .send(WsIncoming::Text(r#"ticker|{"s":"BTCUSDT","p":"50000"}"#.to_string()))
        .unwrap();

    assert_eq!(
        events.recv().await,
        Some(WsEvent::Message {
            message_type: "ticker".to_string(),
            payload: json!({"s": "BTCUSDT", "p": "50000"}),
        })
    );
    assert_eq!(ws.metrics().get_frames_received(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_is_rejected() {
    let (connector, _accepted) = MockConnector::new(vec![false]);
    let (ws, _events) = IcrypexWebSocket::with_connector(WsConfig::default(), None, connector);

    let err = tokio_test::assert_err!(ws.connect().await);

    assert!(matches!(err, IcrypexError::WebSocket(_)));
    assert_eq!(ws.state().await, SessionState::Disconnected);
    assert_eq!(ws.send("ping", &json!({})).await, Err(IcrypexError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn unexpected_close_retries_every_five_seconds_then_gives_up() {
    let (connector, mut accepted) = MockConnector::new(vec![true]);
    let (ws, mut events) =
        IcrypexWebSocket::with_connector(WsConfig::default(), None, connector.clone());

    ws.connect().await.unwrap();
    let server = accepted.recv().await.unwrap();

    let closed_at = Instant::now();
    drop(server);
    tokio::time::sleep(Duration::from_secs(60)).await;

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 6, "initial connect plus five retries");
    for (i, at) in attempts[1..].iter().enumerate() {
        assert_eq!(*at - closed_at, Duration::from_secs(5 * (i as u64 + 1)));
    }

    let seen = drain(&mut events);
    assert!(seen.contains(&WsEvent::Disconnected {
        reason: CloseReason::Unexpected
    }));
    assert!(seen.contains(&WsEvent::Reconnecting {
        attempt: 5,
        max_attempts: 5,
        delay_ms: 5000
    }));
    assert_eq!(seen.last(), Some(&WsEvent::ReconnectFailed { attempts: 5 }));
    assert_eq!(ws.state().await, SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn caller_disconnect_never_reconnects() {
    let (connector, mut accepted) = MockConnector::new(vec![true, true]);
    let (ws, mut events) =
        IcrypexWebSocket::with_connector(WsConfig::default(), None, connector.clone());

    ws.connect().await.unwrap();
    let mut server = accepted.recv().await.unwrap();

    ws.disconnect().await;
    assert_eq!(server.from_client.recv().await, Some(WsOutgoing::Close));
    drop(server);

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempts().len(), 1);
    assert!(!ws.is_connected().await);
    assert_eq!(ws.state().await, SessionState::Disconnected);
    let seen = drain(&mut events);
    assert!(seen.contains(&WsEvent::Disconnected {
        reason: CloseReason::Requested
    }));
    assert!(!seen.iter().any(|e| matches!(e, WsEvent::Reconnecting { .. })));
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_subscriptions_and_resets_attempts() {
    let (connector, mut accepted) = MockConnector::new(vec![true, false, true]);
    let (ws, _events) =
        IcrypexWebSocket::with_connector(WsConfig::default(), None, connector.clone());

    ws.connect().await.unwrap();
    let mut first = accepted.recv().await.unwrap();
    ws.subscribe_trades("BTCUSDT").await.unwrap();
    assert!(first.next_frame().is_some());

    drop(first);
    let mut second = accepted.recv().await.unwrap();
    // Give the session a moment to finish its replay after the handshake.
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        second.next_frame().unwrap(),
        ("subscribe".to_string(), json!({"c": "trade@btcusdt", "s": true}))
    );
    assert_eq!(connector.attempts().len(), 3);
    assert_eq!(ws.reconnect_attempts(), 0);
    assert_eq!(ws.state().await, SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_handshake() {
    let (connector, mut accepted) = MockConnector::slow(vec![true, true], Duration::from_secs(2));
    let (ws, mut events) =
        IcrypexWebSocket::with_connector(WsConfig::default(), None, connector.clone());

    let (first, second) = tokio::join!(ws.connect(), ws.connect());
    tokio_test::assert_ok!(first);
    tokio_test::assert_ok!(second);

    assert_eq!(connector.attempts().len(), 1);
    assert!(accepted.recv().await.is_some());
    assert!(accepted.try_recv().is_err());
    assert_eq!(drain(&mut events), vec![WsEvent::Connected]);
    assert_eq!(ws.state().await, SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_reconnect_handshake_stays_down() {
    let (connector, mut accepted) = MockConnector::slow(vec![true, true], Duration::from_secs(2));
    let (ws, mut events) =
        IcrypexWebSocket::with_connector(WsConfig::default(), None, connector.clone());

    ws.connect().await.unwrap();
    let first = accepted.recv().await.unwrap();
    drop(first);

    // Reconnect fires 5s after the close and its handshake takes another 2s.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(connector.attempts().len(), 2);
    ws.disconnect().await;

    tokio::time::sleep(Duration::from_secs(60)).await;

    let mut late = accepted.recv().await.unwrap();
    assert_eq!(late.from_client.recv().await, Some(WsOutgoing::Close));
    assert_eq!(connector.attempts().len(), 2);
    assert!(!ws.is_connected().await);
    assert_eq!(ws.state().await, SessionState::Disconnected);

    let connected = drain(&mut events)
        .into_iter()
        .filter(|e| *e == WsEvent::Connected)
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_connect_cancels_it() {
    let (connector, mut accepted) = MockConnector::slow(vec![true], Duration::from_secs(2));
    let (ws, _events) = IcrypexWebSocket::with_connector(WsConfig::default(), None, connector);
    let ws = Arc::new(ws);

    let pending = {
        let ws = ws.clone();
        tokio::spawn(async move { ws.connect().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    ws.disconnect().await;

    assert_eq!(pending.await.unwrap(), Err(IcrypexError::Cancelled));
    let mut server = accepted.recv().await.unwrap();
    assert_eq!(server.from_client.recv().await, Some(WsOutgoing::Close));
    assert!(!ws.is_connected().await);
    assert_eq!(ws.state().await, SessionState::Disconnected);
}
