pub mod connector;
pub mod state;
pub mod websocket;

pub use connector::{TungsteniteConnector, WsChannel, WsConnector, WsIncoming, WsOutgoing};
pub use state::{CloseReason, SessionState};
pub use websocket::{channels, IcrypexWebSocket, WsEvent};
