use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::connector::{TungsteniteConnector, WsConnector, WsIncoming, WsOutgoing};
use super::state::{CloseReason, SessionState};
use crate::api::signer::{now_millis, Credentials};
use crate::core::{ClientMetrics, Config, IcrypexError, Result, WsConfig};

pub const LOGIN_MESSAGE_TYPE: &str = "api-login";
pub const SUBSCRIBE_MESSAGE_TYPE: &str = "subscribe";

/// What the session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    Connected,
    Message { message_type: String, payload: Value },
    Disconnected { reason: CloseReason },
    Reconnecting { attempt: u32, max_attempts: u32, delay_ms: u64 },
    ReconnectFailed { attempts: u32 },
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
struct SubscribeFrame<'a> {
    c: &'a str,
    s: bool,
}

/// Channel names understood by the feed. Symbols are lowercased.
pub mod channels {
    pub const TICKERS: &str = "tickers";

    pub fn ticker(symbol: &str) -> String {
        format!("ticker@{}", symbol.to_lowercase())
    }

    pub fn order_book(symbol: &str) -> String {
        format!("orderbook@{}", symbol.to_lowercase())
    }

    pub fn order_book_short(symbol: &str) -> String {
        format!("orderbook-short@{}", symbol.to_lowercase())
    }

    pub fn trades(symbol: &str) -> String {
        format!("trade@{}", symbol.to_lowercase())
    }

    pub fn tradingview(symbol: &str, resolution: &str) -> String {
        format!("tradingview@{}_{}", symbol.to_lowercase(), resolution)
    }
}

/// Formats `"<type>|<json>"`.
pub fn encode_frame<T: Serialize + ?Sized>(message_type: &str, payload: &T) -> Result<String> {
    let json = serde_json::to_string(payload)
        .map_err(|e| IcrypexError::Parse(format!("cannot encode {message_type} frame: {e}")))?;
    Ok(format!("{}|{}", message_type, json))
}

/// Splits `"<type>|<json>"` at the first separator and parses the payload.
pub fn parse_frame(text: &str) -> Result<(String, Value)> {
    let (message_type, data) = text
        .split_once('|')
        .ok_or_else(|| IcrypexError::Parse(format!("frame without type separator: {text}")))?;

    let payload = if data.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(data).map_err(|e| {
            IcrypexError::Parse(format!("invalid {message_type} payload: {e}"))
        })?
    };

    Ok((message_type.to_string(), payload))
}

struct ActiveConnection {
    generation: u64,
    outbound: mpsc::UnboundedSender<WsOutgoing>,
}

struct Session {
    config: WsConfig,
    credentials: Option<Credentials>,
    connector: Arc<dyn WsConnector>,
    state: RwLock<SessionState>,
    connection: Mutex<Option<ActiveConnection>>,
    subscriptions: RwLock<BTreeSet<String>>,
    // Held for the whole of a connect so two connects never overlap.
    connect_lock: Mutex<()>,
    reconnect_attempts: AtomicU32,
    close_requested: AtomicBool,
    // Bumped by every disconnect so an in-flight connect can tell it was overtaken.
    close_epoch: AtomicU64,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<WsEvent>,
    metrics: Arc<ClientMetrics>,
}

/// One long-lived feed connection with login, subscription tracking and reconnect.
pub struct IcrypexWebSocket {
    session: Arc<Session>,
}

impl IcrypexWebSocket {
    pub fn new(
        config: WsConfig,
        credentials: Option<Credentials>,
    ) -> (Self, mpsc::UnboundedReceiver<WsEvent>) {
        Self::with_connector(config, credentials, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(
        config: WsConfig,
        credentials: Option<Credentials>,
        connector: Arc<dyn WsConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<WsEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();

        let session = Arc::new(Session {
            config,
            credentials,
            connector,
            state: RwLock::new(SessionState::Disconnected),
            connection: Mutex::new(None),
            subscriptions: RwLock::new(BTreeSet::new()),
            connect_lock: Mutex::new(()),
            reconnect_attempts: AtomicU32::new(0),
            close_requested: AtomicBool::new(false),
            close_epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            events,
            metrics: Arc::new(ClientMetrics::new()),
        });

        (Self { session }, receiver)
    }

    pub fn from_config(config: &Config) -> Result<(Self, mpsc::UnboundedReceiver<WsEvent>)> {
        let credentials = match (&config.credentials.api_key, &config.credentials.api_secret) {
            (Some(key), Some(secret)) => Some(Credentials::new(key.as_str(), secret)?),
            _ => None,
        };
        Ok(Self::new(config.websocket.clone(), credentials))
    }

    /// Opens the socket and logs in when credentials are present. A no-op when already open.
    ///
    /// Concurrent calls share one attempt. Fails with [`IcrypexError::Cancelled`] when
    /// [`disconnect`](Self::disconnect) is called before the socket is ready.
    pub async fn connect(&self) -> Result<()> {
        self.session.open(false).await
    }

    /// Closes the socket on request. Never triggers a reconnect.
    pub async fn disconnect(&self) {
        self.session.close().await
    }

    pub async fn send<T: Serialize + ?Sized>(&self, message_type: &str, payload: &T) -> Result<()> {
        let frame = encode_frame(message_type, payload)?;
        self.session.send_frame(message_type, frame).await
    }

    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        self.session.set_subscription(channel, true).await
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.session.set_subscription(channel, false).await
    }

    pub async fn subscribe_tickers(&self) -> Result<()> {
        self.subscribe(channels::TICKERS).await
    }

    pub async fn subscribe_ticker(&self, symbol: &str) -> Result<()> {
        self.subscribe(&channels::ticker(symbol)).await
    }

    pub async fn subscribe_order_book(&self, symbol: &str) -> Result<()> {
        self.subscribe(&channels::order_book(symbol)).await
    }

    pub async fn subscribe_order_book_short(&self, symbol: &str) -> Result<()> {
        self.subscribe(&channels::order_book_short(symbol)).await
    }

    pub async fn subscribe_trades(&self, symbol: &str) -> Result<()> {
        self.subscribe(&channels::trades(symbol)).await
    }

    pub async fn subscribe_tradingview(&self, symbol: &str, resolution: &str) -> Result<()> {
        self.subscribe(&channels::tradingview(symbol, resolution)).await
    }

    pub async fn state(&self) -> SessionState {
        *self.session.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.session.connection.lock().await.is_some()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.session.subscriptions.read().await.iter().cloned().collect()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.session.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> Arc<ClientMetrics> {
        self.session.metrics.clone()
    }
}

impl Drop for IcrypexWebSocket {
    fn drop(&mut self) {
        self.session.close_requested.store(true, Ordering::SeqCst);
        self.session.close_epoch.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut connection) = self.session.connection.try_lock() {
            if let Some(active) = connection.take() {
                let _ = active.outbound.send(WsOutgoing::Close);
            }
        }
    }
}

impl Session {
    async fn open(self: &Arc<Self>, reconnecting: bool) -> Result<()> {
        let _flight = self.connect_lock.lock().await;

        if reconnecting && self.close_requested.load(Ordering::SeqCst) {
            return Err(IcrypexError::Cancelled);
        }
        if self.connection.lock().await.is_some() {
            return Ok(());
        }
        if !reconnecting {
            self.close_requested.store(false, Ordering::SeqCst);
        }
        let epoch = self.close_epoch.load(Ordering::SeqCst);

        self.transition(SessionState::Connecting).await;

        let deadline = Duration::from_millis(self.config.connect_timeout_ms);
        let outcome = tokio::time::timeout(deadline, self.connector.connect(&self.config.url)).await;
        let channel = match outcome {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return Err(self.connect_failed(e).await),
            Err(_) => {
                let e = IcrypexError::Timeout {
                    timeout_ms: self.config.connect_timeout_ms,
                };
                return Err(self.connect_failed(e).await);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut connection = self.connection.lock().await;
            if self.close_epoch.load(Ordering::SeqCst) != epoch {
                info!("Disconnect requested while connecting, dropping new socket");
                let _ = channel.outbound.send(WsOutgoing::Close);
                drop(connection);
                self.transition(SessionState::Disconnected).await;
                return Err(IcrypexError::Cancelled);
            }
            *connection = Some(ActiveConnection {
                generation,
                outbound: channel.outbound,
            });
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        info!("✅ WebSocket connected to {}", self.config.url);

        if let Some(credentials) = &self.credentials {
            if !self.transition_unless_closed(epoch, SessionState::Authenticating).await {
                return Err(IcrypexError::Cancelled);
            }
            if let Err(e) = self.authenticate(credentials).await {
                error!("WebSocket login failed: {}", e);
                self.emit(WsEvent::Error(e.to_string()));
            }
        }

        if !self.transition_unless_closed(epoch, SessionState::Ready).await {
            return Err(IcrypexError::Cancelled);
        }

        if self.config.replay_subscriptions {
            self.replay_subscriptions().await;
        }

        self.spawn_reader(generation, channel.inbound);
        self.emit(WsEvent::Connected);
        Ok(())
    }

    async fn connect_failed(&self, e: IcrypexError) -> IcrypexError {
        error!("WebSocket error: {}", e);
        self.transition(SessionState::Disconnected).await;
        self.emit(WsEvent::Error(e.to_string()));
        e
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        let login = credentials.login_frame(now_millis())?;
        let frame = encode_frame(LOGIN_MESSAGE_TYPE, &login)?;
        self.send_frame(LOGIN_MESSAGE_TYPE, frame).await
    }

    async fn replay_subscriptions(&self) {
        let channels: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();

        for channel in channels {
            debug!("Restoring subscription {}", channel);
            let frame = SubscribeFrame { c: &channel, s: true };
            let result = match encode_frame(SUBSCRIBE_MESSAGE_TYPE, &frame) {
                Ok(frame) => self.send_frame(SUBSCRIBE_MESSAGE_TYPE, frame).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Failed to restore subscription {}: {}", channel, e);
            }
        }
    }

    async fn send_frame(&self, message_type: &str, frame: String) -> Result<()> {
        let connection = self.connection.lock().await;
        let active = connection.as_ref().ok_or(IcrypexError::NotConnected)?;

        debug!("Sending {}: {}", message_type, frame);
        active
            .outbound
            .send(WsOutgoing::Text(frame))
            .map_err(|_| IcrypexError::NotConnected)?;

        self.metrics.increment_frames_sent();
        Ok(())
    }

    async fn set_subscription(&self, channel: &str, subscribe: bool) -> Result<()> {
        debug!(
            "{} {}",
            if subscribe { "Subscribing to" } else { "Unsubscribing from" },
            channel
        );

        let frame = encode_frame(SUBSCRIBE_MESSAGE_TYPE, &SubscribeFrame { c: channel, s: subscribe })?;
        self.send_frame(SUBSCRIBE_MESSAGE_TYPE, frame).await?;

        let mut subscriptions = self.subscriptions.write().await;
        if subscribe {
            subscriptions.insert(channel.to_string());
        } else {
            subscriptions.remove(channel);
        }
        Ok(())
    }

    fn spawn_reader(self: &Arc<Self>, generation: u64, mut inbound: mpsc::UnboundedReceiver<WsIncoming>) {
        let session = self.clone();

        tokio::spawn(async move {
            while let Some(incoming) = inbound.recv().await {
                match incoming {
                    WsIncoming::Text(text) => session.dispatch(&text),
                    WsIncoming::Error(e) => session.emit(WsEvent::Error(e)),
                }
            }
            session.handle_close(generation).await;
        });
    }

    fn dispatch(&self, text: &str) {
        self.metrics.increment_frames_received();

        match parse_frame(text) {
            Ok((message_type, payload)) => {
                debug!("Received {}: {}", message_type, payload);
                self.emit(WsEvent::Message {
                    message_type,
                    payload,
                });
            }
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                self.emit(WsEvent::Error(e.to_string()));
            }
        }
    }

    async fn handle_close(self: &Arc<Self>, generation: u64) {
        {
            let mut connection = self.connection.lock().await;
            let current = matches!(connection.as_ref(), Some(active) if active.generation == generation);
            // Already closed by disconnect() or superseded by a newer socket.
            if !current {
                return;
            }
            *connection = None;
        }

        warn!("🔌 WebSocket disconnected");
        self.transition(SessionState::Disconnected).await;
        self.emit(WsEvent::Disconnected {
            reason: CloseReason::Unexpected,
        });

        if !self.close_requested.load(Ordering::SeqCst) {
            tokio::spawn(self.clone().reconnect());
        }
    }

    fn reconnect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let max_attempts = self.config.max_reconnect_attempts;
            let delay_ms = self.config.reconnect_interval_ms;

            loop {
                if self.close_requested.load(Ordering::SeqCst) {
                    return;
                }

                let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
                if attempts >= max_attempts {
                    error!("Max reconnection attempts reached");
                    self.emit(WsEvent::ReconnectFailed { attempts });
                    return;
                }

                let attempt = attempts + 1;
                self.reconnect_attempts.store(attempt, Ordering::SeqCst);
                self.transition(SessionState::Reconnecting).await;
                self.metrics.increment_reconnects();
                info!(
                    "⏳ Attempting to reconnect ({}/{}) in {}ms...",
                    attempt, max_attempts, delay_ms
                );
                self.emit(WsEvent::Reconnecting {
                    attempt,
                    max_attempts,
                    delay_ms,
                });

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                match self.open(true).await {
                    Ok(()) | Err(IcrypexError::Cancelled) => return,
                    Err(e) => error!("Reconnection failed: {}", e),
                }
            }
        }
        .boxed()
    }

    async fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.close_epoch.fetch_add(1, Ordering::SeqCst);
        let active = self.connection.lock().await.take();

        if let Some(active) = active {
            info!("Disconnecting WebSocket");
            let _ = active.outbound.send(WsOutgoing::Close);
            self.emit(WsEvent::Disconnected {
                reason: CloseReason::Requested,
            });
        }

        self.transition(SessionState::Disconnected).await;
    }

    /// Moves the session to `next`. An edge outside [`SessionState::can_transition_to`] is
    /// logged and still applied: the socket's actual condition wins over the expected order.
    async fn transition(&self, next: SessionState) {
        let mut state = self.state.write().await;
        Self::apply_transition(&mut state, next);
    }

    /// Like [`transition`](Self::transition), unless a disconnect happened after `epoch`
    /// was read. Returns whether the session moved.
    async fn transition_unless_closed(&self, epoch: u64, next: SessionState) -> bool {
        let mut state = self.state.write().await;
        if self.close_epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        Self::apply_transition(&mut state, next);
        true
    }

    fn apply_transition(state: &mut SessionState, next: SessionState) {
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            warn!("Unexpected session transition {} -> {}", *state, next);
        }
        debug!("Session {} -> {}", *state, next);
        *state = next;
    }

    fn emit(&self, event: WsEvent) {
        // The owner may have dropped the receiver; events are best effort.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_names() {
        assert_eq!(channels::ticker("BTCUSDT"), "ticker@btcusdt");
        assert_eq!(channels::order_book("BTCUSDT"), "orderbook@btcusdt");
        assert_eq!(channels::order_book_short("EthUsdt"), "orderbook-short@ethusdt");
        assert_eq!(channels::trades("BTCUSDT"), "trade@btcusdt");
        assert_eq!(channels::tradingview("BTCUSDT", "15"), "tradingview@btcusdt_15");
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(SUBSCRIBE_MESSAGE_TYPE, &SubscribeFrame { c: "tickers", s: true }).unwrap();
        assert_eq!(frame, r#"subscribe|{"c":"tickers","s":true}"#);
    }

    #[test]
    fn test_parse_frame_splits_on_first_separator() {
        let (message_type, payload) = parse_frame(r#"ticker|{"note":"a|b"}"#).unwrap();
        assert_eq!(message_type, "ticker");
        assert_eq!(payload, json!({"note": "a|b"}));
    }

    #[test]
    fn test_parse_frame_rejects_garbage() {
        assert!(matches!(parse_frame("no separator"), Err(IcrypexError::Parse(_))));
        assert!(matches!(parse_frame("ticker|{oops"), Err(IcrypexError::Parse(_))));
        assert_eq!(parse_frame("pong|").unwrap(), ("pong".to_string(), Value::Null));
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let (ws, _events) = IcrypexWebSocket::new(WsConfig::default(), None);

        let err = ws.send("ping", &json!({})).await.unwrap_err();
        assert_eq!(err, IcrypexError::NotConnected);

        let err = ws.subscribe_tickers().await.unwrap_err();
        assert_eq!(err, IcrypexError::NotConnected);
        assert!(ws.subscriptions().await.is_empty());
        assert_eq!(ws.state().await, SessionState::Disconnected);
    }

    #[test]
    fn test_off_order_transition_is_still_applied() {
        let mut state = SessionState::Ready;
        assert!(!state.can_transition_to(SessionState::Connecting));

        Session::apply_transition(&mut state, SessionState::Connecting);
        assert_eq!(state, SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_transition_skipped_after_disconnect() {
        let (ws, _events) = IcrypexWebSocket::new(WsConfig::default(), None);
        let session = &ws.session;
        let epoch = session.close_epoch.load(Ordering::SeqCst);

        assert!(session.transition_unless_closed(epoch, SessionState::Connecting).await);
        ws.disconnect().await;
        assert!(!session.transition_unless_closed(epoch, SessionState::Ready).await);
        assert_eq!(ws.state().await, SessionState::Disconnected);
    }
}
