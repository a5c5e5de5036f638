use super::{Connector, Link, TransportError};
use crate::config::LiveConfig;
use crate::stomp::{Command, Frame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

/// STOMP-over-WebSocket connector for the helpdesk broker
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            handshake_timeout,
        }
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(config.ws_url.clone(), config.handshake_timeout)
    }

    async fn handshake(&self, credential: Option<String>) -> Result<Link, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let host = request.uri().host().unwrap_or("localhost").to_string();

        if let Some(token) = credential.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Handshake(format!("invalid credential: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, response) = connect_async(request).await.map_err(|e| match e {
            WsError::Http(resp) => TransportError::Rejected(format!("http {}", resp.status())),
            other => TransportError::Unavailable(other.to_string()),
        })?;
        debug!(url = %self.url, status = %response.status(), "websocket upgraded");

        let (mut sink, mut stream) = ws.split();

        let connect = Frame::connect(&host, credential.as_deref());
        sink.send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        loop {
            let message = stream
                .next()
                .await
                .ok_or_else(|| TransportError::Handshake("closed before CONNECTED".into()))?
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;

            let text = match classify(message) {
                Incoming::Text(text) => text,
                Incoming::Control => continue,
                Incoming::Closed => {
                    return Err(TransportError::Handshake("closed before CONNECTED".into()))
                }
            };

            match Frame::decode(&text).map_err(|e| TransportError::Handshake(e.to_string()))? {
                None => continue,
                Some(frame) if frame.command == Command::Connected => {
                    debug!(version = frame.get("version").unwrap_or("?"), "stomp session established");
                    break;
                }
                Some(frame) if frame.command == Command::Error => {
                    let reason = frame.get("message").unwrap_or(&frame.body).to_string();
                    return Err(TransportError::Rejected(reason));
                }
                Some(frame) => {
                    return Err(TransportError::Handshake(format!(
                        "unexpected {} before CONNECTED",
                        frame.command
                    )))
                }
            }
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.encode().into())).await {
                    warn!(error = %e, command = %frame.command, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                };
                let text = match classify(message) {
                    Incoming::Text(text) => text,
                    Incoming::Control => continue,
                    Incoming::Closed => {
                        debug!("websocket closed by server");
                        break;
                    }
                };
                match Frame::decode(&text) {
                    Ok(Some(frame)) => {
                        if in_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "dropping undecodable stomp frame"),
                }
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

enum Incoming {
    Text(String),
    Control,
    Closed,
}

fn classify(message: Message) -> Incoming {
    match message {
        Message::Text(text) => Incoming::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => Incoming::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Message::Close(_) => Incoming::Closed,
        _ => Incoming::Control,
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, credential: Option<String>) -> Result<Link, TransportError> {
        match timeout(self.handshake_timeout, self.handshake(credential)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.handshake_timeout)),
        }
    }
}
