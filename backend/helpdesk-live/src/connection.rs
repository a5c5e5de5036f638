//! Connection manager
//!
//! One driver task owns the link, the connection state machine and the
//! subscription registry. Handles talk to it over a command channel, so the
//! single-transport rule is enforced by construction:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                               │                  │ link lost
//!                               └──fail──▶ Reconnecting ◀┘
//!                                              │  ├──ok──▶ Connected
//!                                              │  └──ceiling──▶ Failed ──retry──▶ Connecting
//! ```
//!
//! Every attempt is tagged with an epoch. `disconnect()` and fresh attempts
//! bump it, so an outcome arriving for a superseded attempt is discarded.

use crate::auth::CredentialSupplier;
use crate::error::{LiveError, LiveResult};
use crate::registry::{Handler, SubscriptionRegistry};
use crate::stomp::{Command as StompCommand, Frame};
use crate::topic::{Scope, Topic};
use crate::transport::{Connector, Link, TransportError};
use resilience::ReconnectPolicy;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
        }
    }
}

enum Command {
    Connect {
        reply: oneshot::Sender<LiveResult<()>>,
    },
    Retry {
        reply: oneshot::Sender<LiveResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        topic: Topic,
        handler: Handler,
        scope: Scope,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        topic: Topic,
        reply: oneshot::Sender<bool>,
    },
    Send {
        destination: String,
        body: String,
        reply: oneshot::Sender<LiveResult<()>>,
    },
    Topics {
        reply: oneshot::Sender<Vec<Topic>>,
    },
}

type AttemptOutcome = (u64, Result<Link, TransportError>);

struct Driver {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSupplier>,
    policy: ReconnectPolicy,
    registry: SubscriptionRegistry,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    epoch: u64,
    attempt_in_flight: bool,
    retry_at: Option<Instant>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    inbound: Option<mpsc::UnboundedReceiver<Frame>>,
    waiters: Vec<oneshot::Sender<LiveResult<()>>>,
    pending_sends: Vec<(Frame, oneshot::Sender<LiveResult<()>>)>,
    attempt_tx: mpsc::UnboundedSender<AttemptOutcome>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptOutcome>,
}

async fn next_inbound(inbound: &mut Option<mpsc::UnboundedReceiver<Frame>>) -> Option<Frame> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown(LiveError::DriverStopped);
                        debug!("all connection handles dropped, driver exiting");
                        return;
                    }
                },
                Some((epoch, outcome)) = self.attempt_rx.recv() => {
                    self.handle_attempt(epoch, outcome);
                }
                frame = next_inbound(&mut self.inbound) => match frame {
                    Some(frame) => self.handle_inbound(frame),
                    None => self.link_lost("link closed"),
                },
                _ = retry_timer(self.retry_at) => {
                    self.retry_at = None;
                    self.start_attempt();
                }
            }
        }
    }

    fn online(&self) -> bool {
        self.state.status == ConnectionStatus::Connected && self.outbound.is_some()
    }

    fn set_state(&mut self, status: ConnectionStatus, reconnect_attempts: u32) {
        let next = ConnectionState {
            status,
            reconnect_attempts,
        };
        if next == self.state {
            return;
        }
        info!(
            from = %self.state.status,
            status = %status,
            attempt = reconnect_attempts,
            "connection status changed"
        );
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.connect(reply),
            Command::Retry { reply } => self.retry(reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Subscribe {
                topic,
                handler,
                scope,
                reply,
            } => {
                let online = self.online();
                debug!(topic = %topic, ?scope, online, "subscribe");
                if let Some(control) = self.registry.subscribe(topic, handler, scope, online) {
                    let _ = self.write(control.into_frame());
                }
                if !online {
                    self.ensure_connecting();
                }
                let _ = reply.send(());
            }
            Command::Unsubscribe { topic, reply } => {
                let online = self.online();
                let (removed, control) = self.registry.unsubscribe(&topic, online);
                if let Some(control) = control {
                    let _ = self.write(control.into_frame());
                }
                debug!(topic = %topic, removed, "unsubscribe");
                let _ = reply.send(removed);
            }
            Command::Send {
                destination,
                body,
                reply,
            } => {
                let frame = Frame::send(&destination, body);
                match self.state.status {
                    ConnectionStatus::Connected => {
                        let _ = reply.send(self.write(frame));
                    }
                    ConnectionStatus::Failed => {
                        let _ = reply.send(Err(LiveError::ReconnectExhausted {
                            attempts: self.state.reconnect_attempts,
                        }));
                    }
                    _ => {
                        self.pending_sends.push((frame, reply));
                        self.ensure_connecting();
                    }
                }
            }
            Command::Topics { reply } => {
                let _ = reply.send(self.registry.topics());
            }
        }
    }

    fn connect(&mut self, reply: oneshot::Sender<LiveResult<()>>) {
        match self.state.status {
            ConnectionStatus::Connected => {
                let _ = reply.send(Ok(()));
            }
            ConnectionStatus::Failed => {
                let _ = reply.send(Err(LiveError::ReconnectExhausted {
                    attempts: self.state.reconnect_attempts,
                }));
            }
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                self.waiters.push(reply);
            }
            ConnectionStatus::Disconnected => {
                self.waiters.push(reply);
                self.ensure_connecting();
            }
        }
    }

    fn retry(&mut self, reply: oneshot::Sender<LiveResult<()>>) {
        match self.state.status {
            ConnectionStatus::Failed | ConnectionStatus::Disconnected => {
                info!("manual retry requested");
                self.set_state(ConnectionStatus::Connecting, 0);
                self.waiters.push(reply);
                self.start_attempt();
            }
            ConnectionStatus::Reconnecting if !self.attempt_in_flight => {
                info!("manual retry requested, skipping backoff");
                self.retry_at = None;
                self.set_state(ConnectionStatus::Connecting, 0);
                self.waiters.push(reply);
                self.start_attempt();
            }
            _ => self.connect(reply),
        }
    }

    /// Kick off a first attempt when idle; in-flight and scheduled attempts are joined
    fn ensure_connecting(&mut self) {
        if self.state.status == ConnectionStatus::Disconnected {
            self.set_state(ConnectionStatus::Connecting, 0);
            self.start_attempt();
        }
    }

    fn start_attempt(&mut self) {
        self.epoch += 1;
        self.attempt_in_flight = true;

        let epoch = self.epoch;
        let attempt = self.state.reconnect_attempts;
        let connector = Arc::clone(&self.connector);
        let credential = self.credentials.bearer_token();
        let outcomes = self.attempt_tx.clone();
        debug!(epoch, attempt, has_credential = credential.is_some(), "opening link");

        tokio::spawn(async move {
            let outcome = connector.open(credential).await;
            let _ = outcomes.send((epoch, outcome));
        });
    }

    fn handle_attempt(&mut self, epoch: u64, outcome: Result<Link, TransportError>) {
        if epoch != self.epoch || !self.attempt_in_flight {
            debug!(epoch, current = self.epoch, "discarding superseded attempt");
            return;
        }
        self.attempt_in_flight = false;

        match outcome {
            Ok(link) => {
                self.outbound = Some(link.outbound);
                self.inbound = Some(link.inbound);
                self.set_state(ConnectionStatus::Connected, 0);

                let replay = self.registry.replay();
                info!(topics = replay.len(), "connected, replaying subscriptions");
                for control in replay {
                    let _ = self.write(control.into_frame());
                }
                for (frame, reply) in std::mem::take(&mut self.pending_sends) {
                    let _ = reply.send(self.write(frame));
                }
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(error = %e, attempt = self.state.reconnect_attempts, "connect attempt failed");
                let failure = LiveError::from(e);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(failure.clone()));
                }
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.policy.next_attempt(self.state.reconnect_attempts) {
            Some((attempt, delay)) => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.retry_at = Some(Instant::now() + delay);
                self.set_state(ConnectionStatus::Reconnecting, attempt);
            }
            None => {
                let attempts = self.state.reconnect_attempts;
                warn!(attempts, "reconnect ceiling reached, giving up until retry");
                self.retry_at = None;
                self.set_state(ConnectionStatus::Failed, attempts);
                for (_, reply) in self.pending_sends.drain(..) {
                    let _ = reply.send(Err(LiveError::ReconnectExhausted { attempts }));
                }
            }
        }
    }

    fn handle_inbound(&mut self, frame: Frame) {
        match frame.command {
            StompCommand::Message => {
                let delivered = self.registry.dispatch(
                    frame.get("subscription"),
                    frame.get("destination"),
                    &frame.body,
                );
                if !delivered {
                    debug!(
                        destination = frame.get("destination").unwrap_or(""),
                        "no registration for message, dropped"
                    );
                }
            }
            StompCommand::Error => {
                warn!(
                    message = frame.get("message").unwrap_or(""),
                    body = %frame.body,
                    "broker sent ERROR frame"
                );
                self.link_lost("broker error");
            }
            other => debug!(command = %other, "ignoring frame"),
        }
    }

    fn link_lost(&mut self, reason: &str) {
        if self.outbound.is_none() && self.inbound.is_none() {
            return;
        }
        warn!(reason, "link lost");
        self.outbound = None;
        self.inbound = None;
        self.registry.mark_offline();
        self.schedule_reconnect();
    }

    fn write(&self, frame: Frame) -> LiveResult<()> {
        match &self.outbound {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| LiveError::Transport("link writer closed".into())),
            None => Err(LiveError::Transport("not connected".into())),
        }
    }

    fn disconnect(&mut self) {
        let idle = self.state.status == ConnectionStatus::Disconnected
            && self.outbound.is_none()
            && !self.attempt_in_flight;
        if idle {
            return;
        }
        self.teardown(LiveError::Disconnected);
        self.registry.clear();
        self.set_state(ConnectionStatus::Disconnected, 0);
        info!("disconnected");
    }

    fn teardown(&mut self, reason: LiveError) {
        self.epoch += 1;
        self.attempt_in_flight = false;
        self.retry_at = None;
        if self.outbound.is_some() {
            let _ = self.write(Frame::disconnect());
        }
        self.outbound = None;
        self.inbound = None;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(reason.clone()));
        }
        for (_, reply) in self.pending_sends.drain(..) {
            let _ = reply.send(Err(reason.clone()));
        }
    }
}

/// Cloneable handle to the connection driver
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the driver on the current runtime
    pub fn spawn(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSupplier>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            connector,
            credentials,
            policy,
            registry: SubscriptionRegistry::new(),
            state: ConnectionState::default(),
            state_tx,
            epoch: 0,
            attempt_in_flight: false,
            retry_at: None,
            outbound: None,
            inbound: None,
            waiters: Vec::new(),
            pending_sends: Vec::new(),
            attempt_tx,
            attempt_rx,
        };
        tokio::spawn(driver.run(commands_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> LiveResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| LiveError::DriverStopped)?;
        rx.await.map_err(|_| LiveError::DriverStopped)
    }

    /// Resolve once connected; joins an attempt already in progress
    pub async fn connect(&self) -> LiveResult<()> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// Leave `Failed` with a fresh attempt budget
    pub async fn retry(&self) -> LiveResult<()> {
        self.request(|reply| Command::Retry { reply }).await?
    }

    /// Tear down the link and forget every registration
    pub async fn disconnect(&self) -> LiveResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn subscribe(&self, topic: Topic, handler: Handler, scope: Scope) -> LiveResult<()> {
        self.request(|reply| Command::Subscribe {
            topic,
            handler,
            scope,
            reply,
        })
        .await
    }

    /// Returns whether the topic was registered
    pub async fn unsubscribe(&self, topic: &Topic) -> LiveResult<bool> {
        let topic = topic.clone();
        self.request(|reply| Command::Unsubscribe { topic, reply }).await
    }

    /// Publish a JSON body to an application destination, connecting first if needed
    pub async fn send<T: Serialize>(&self, destination: &str, body: &T) -> LiveResult<()> {
        let body = serde_json::to_string(body)?;
        let destination = destination.to_string();
        self.request(|reply| Command::Send {
            destination,
            body,
            reply,
        })
        .await?
    }

    /// Registered topics in registration order
    pub async fn topics(&self) -> LiveResult<Vec<Topic>> {
        self.request(|reply| Command::Topics { reply }).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().status == ConnectionStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoCredentials;
    use crate::transport::MemoryConnector;
    use std::time::Duration;

    fn manager(connector: &MemoryConnector) -> ConnectionManager {
        ConnectionManager::spawn(
            Arc::new(connector.clone()),
            Arc::new(NoCredentials),
            ReconnectPolicy::default(),
        )
    }

    fn noop() -> Handler {
        Arc::new(|_| {})
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok() && b.is_ok());
        manager.connect().await.unwrap();

        assert_eq!(connector.attempts(), 1);
        assert_eq!(
            manager.state(),
            ConnectionState {
                status: ConnectionStatus::Connected,
                reconnect_attempts: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_schedules_reconnect() {
        let connector = MemoryConnector::new();
        connector.fail_next(1);
        let manager = manager(&connector);

        assert!(matches!(manager.connect().await, Err(LiveError::Transport(_))));
        assert_eq!(manager.state().status, ConnectionStatus::Reconnecting);
        assert_eq!(manager.state().reconnect_attempts, 1);

        // the joined waiter resolves on the scheduled attempt
        manager.connect().await.unwrap();
        assert_eq!(manager.state().reconnect_attempts, 0);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_while_offline_connects_and_subscribes_once() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector);

        manager
            .subscribe(Topic::user("42"), noop(), Scope::Persistent)
            .await
            .unwrap();
        manager
            .subscribe(Topic::user("42"), noop(), Scope::Persistent)
            .await
            .unwrap();
        manager.connect().await.unwrap();

        let mut server = connector.next_server().await.unwrap();
        let frame = server.next_frame().await.unwrap();
        assert_eq!(frame.command, StompCommand::Subscribe);
        assert_eq!(frame.get("destination"), Some("/topic/user/42"));

        manager.topics().await.unwrap();
        assert!(server.try_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_attempt_after_disconnect_is_discarded() {
        let connector = MemoryConnector::new();
        connector.set_delay(Some(Duration::from_secs(1)));
        let manager = manager(&connector);

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };
        manager
            .watch()
            .wait_for(|s| s.status == ConnectionStatus::Connecting)
            .await
            .unwrap();
        manager.disconnect().await.unwrap();

        assert_eq!(pending.await.unwrap(), Err(LiveError::Disconnected));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_failed_is_rejected() {
        let connector = MemoryConnector::new();
        connector.refuse(true);
        let manager = ConnectionManager::spawn(
            Arc::new(connector.clone()),
            Arc::new(NoCredentials),
            ReconnectPolicy::linear(Duration::from_millis(10), 1),
        );

        let _ = manager.connect().await;
        let mut status = manager.watch();
        status
            .wait_for(|s| s.status == ConnectionStatus::Failed)
            .await
            .unwrap();

        let err = manager
            .send("/app/ticket/update", &serde_json::json!({"id": 1}))
            .await
            .unwrap_err();
        assert_eq!(err, LiveError::ReconnectExhausted { attempts: 1 });
    }
}
