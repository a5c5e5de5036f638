//! In-process broker double, a test fixture only built with `test-util`.
//!
//! Every successful `open` produces a [`MemoryServer`] queued for the test to
//! pick up with [`MemoryConnector::next_server`]. The server side sees exactly
//! the frames the driver writes and can push `MESSAGE` frames back.

use super::{Connector, Link, TransportError};
use crate::stomp::{Command, Frame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct State {
    fail_next: u32,
    refuse: bool,
    delay: Option<Duration>,
    attempts: u32,
    credentials: Vec<Option<String>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    accepted_tx: mpsc::UnboundedSender<MemoryServer>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryServer>>,
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                accepted_tx,
                accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            }),
        }
    }

    /// Fail the next `n` opens
    pub fn fail_next(&self, n: u32) {
        self.shared.state.lock().fail_next = n;
    }

    /// Fail every open until switched back
    pub fn refuse(&self, refuse: bool) {
        self.shared.state.lock().refuse = refuse;
    }

    /// Hold each open for `delay` before answering
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.shared.state.lock().delay = delay;
    }

    /// Opens attempted so far, failed ones included
    pub fn attempts(&self) -> u32 {
        self.shared.state.lock().attempts
    }

    /// Credential presented by each open, in order
    pub fn credentials(&self) -> Vec<Option<String>> {
        self.shared.state.lock().credentials.clone()
    }

    /// Wait for the server side of the next accepted link
    pub async fn next_server(&self) -> Option<MemoryServer> {
        self.shared.accepted_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, credential: Option<String>) -> Result<Link, TransportError> {
        let delay = {
            let mut state = self.shared.state.lock();
            state.attempts += 1;
            state.credentials.push(credential);
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.shared.state.lock();
            if state.refuse {
                return Err(TransportError::Unavailable("connection refused".into()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransportError::Unavailable("connection refused".into()));
            }
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let server = MemoryServer {
            to_client: server_tx,
            from_client: server_rx,
            seq: 0,
        };
        self.shared
            .accepted_tx
            .send(server)
            .map_err(|_| TransportError::Unavailable("memory broker gone".into()))?;

        Ok(Link {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

/// Broker end of one in-memory link
#[derive(Debug)]
pub struct MemoryServer {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
    seq: u64,
}

impl MemoryServer {
    /// Next frame written by the client; `None` once the client dropped the link
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Frames already written by the client, without waiting
    pub fn try_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Push a `MESSAGE` frame; returns false when the client is gone
    pub fn deliver(&mut self, destination: &str, subscription: Option<&str>, body: &str) -> bool {
        self.seq += 1;
        let mut frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("message-id", format!("m-{}", self.seq));
        if let Some(id) = subscription {
            frame = frame.header("subscription", id);
        }
        self.push(frame.with_body(body))
    }

    pub fn push(&self, frame: Frame) -> bool {
        self.to_client.send(frame).is_ok()
    }

    /// Whether the client still holds its end
    pub fn is_open(&self) -> bool {
        !self.to_client.is_closed()
    }

    /// Drop the link from the server side
    pub fn close(self) {}
}
