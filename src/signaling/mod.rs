//! Signaling channel: transport, wire protocol and the pub/sub client.

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{SignalingClient, Subscription};
pub use protocol::{ClientMessage, Envelope, ServerEvent, CONNECT_EVENT, DISCONNECT_EVENT};
pub use transport::{
    MemoryConnection, MemoryTransport, SignalingTransport, TransportLink, WebSocketTransport,
};
