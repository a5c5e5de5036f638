//! Link establishment.
//!
//! A [`Connector`] performs the WebSocket upgrade plus the STOMP
//! CONNECT/CONNECTED exchange and hands back a [`Link`]: a pair of frame
//! channels. The connection driver never sees sockets, which lets tests drive
//! it through the in-memory connector (`test-util` feature).

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod websocket;

use crate::stomp::Frame;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryConnector, MemoryServer};
pub use websocket::WebSocketConnector;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("broker rejected connect: {0}")]
    Rejected(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
}

/// An established session with the broker
///
/// Dropping `outbound` closes the socket; `inbound` yields `None` once the
/// remote side is gone.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a link, presenting `credential` as the bearer token when present
    async fn open(&self, credential: Option<String>) -> Result<Link, TransportError>;
}
