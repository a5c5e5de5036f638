//! The ticket currently open in the UI and its live update buffer.
//!
//! Only one ticket topic is subscribed at a time. Focus changes are serialized
//! through an async mutex so the old topic is always unsubscribed before the
//! new one is subscribed, however fast the user clicks.

use crate::alerts::{Alert, AlertBus, AlertLevel};
use crate::connection::ConnectionManager;
use crate::error::LiveResult;
use crate::registry::{Handler, Payload};
use crate::topic::{Scope, Topic};
use chrono::Utc;
use event_schema::EventKind;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// One live change to the active ticket
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdate {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub title: String,
    pub message: String,
    /// Acting user, when the server names one
    pub user: Option<String>,
    pub timestamp: String,
}

impl TicketUpdate {
    pub fn from_payload(payload: &Payload) -> Self {
        match payload.as_event() {
            Some(event) => Self {
                kind: event.kind(),
                title: event
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "Ticket Updated".to_string()),
                message: event.display_message(),
                user: event.user.clone(),
                timestamp: event
                    .timestamp_string()
                    .unwrap_or_else(|| Utc::now().to_rfc3339()),
            },
            None => Self {
                kind: EventKind::TicketUpdated,
                title: "Ticket Updated".to_string(),
                message: match payload {
                    Payload::Raw(text) => text.clone(),
                    Payload::Json(value) => value.to_string(),
                },
                user: None,
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }
}

type Buffers = Arc<RwLock<HashMap<String, Vec<TicketUpdate>>>>;

pub struct ActiveTicket {
    connection: ConnectionManager,
    alerts: AlertBus,
    current: Mutex<Option<String>>,
    buffers: Buffers,
    revision: Arc<watch::Sender<u64>>,
}

impl ActiveTicket {
    pub fn new(connection: ConnectionManager, alerts: AlertBus) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            connection,
            alerts,
            current: Mutex::new(None),
            buffers: Arc::new(RwLock::new(HashMap::new())),
            revision: Arc::new(revision),
        }
    }

    /// Focus `ticket_id`; `None` or an empty id only drops the current one
    pub async fn set_active(&self, ticket_id: Option<&str>) -> LiveResult<()> {
        let next = ticket_id.map(str::trim).filter(|id| !id.is_empty());
        let mut current = self.current.lock().await;

        if current.as_deref() == next {
            if let Some(id) = next {
                self.mark_seen(id);
            }
            return Ok(());
        }

        if let Some(previous) = current.take() {
            self.connection.unsubscribe(&Topic::ticket(previous.as_str())).await?;
            self.buffers.write().remove(&previous);
            self.revision.send_modify(|rev| *rev += 1);
            debug!(ticket_id = %previous, "ticket deactivated");
        }

        let Some(id) = next else {
            return Ok(());
        };

        self.buffers.write().insert(id.to_string(), Vec::new());
        self.connection
            .subscribe(Topic::ticket(id), self.handler(id.to_string()), Scope::Transient)
            .await?;
        *current = Some(id.to_string());
        info!(ticket_id = %id, "ticket activated");
        Ok(())
    }

    fn handler(&self, ticket_id: String) -> Handler {
        let buffers = Arc::clone(&self.buffers);
        let revision = Arc::clone(&self.revision);
        let alerts = self.alerts.clone();

        Arc::new(move |payload| {
            let update = TicketUpdate::from_payload(&payload);
            {
                let mut buffers = buffers.write();
                let Some(buffer) = buffers.get_mut(&ticket_id) else {
                    debug!(ticket_id = %ticket_id, "update for inactive ticket dropped");
                    return;
                };
                buffer.push(update.clone());
            }
            revision.send_modify(|rev| *rev += 1);
            alerts.raise(
                Alert::new(AlertLevel::Info, update.title, update.message).for_ticket(ticket_id.clone()),
            );
        })
    }

    /// Buffered updates for `ticket_id`, oldest first
    pub fn updates(&self, ticket_id: &str) -> Vec<TicketUpdate> {
        self.buffers
            .read()
            .get(ticket_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The user has looked at the updates; empty the buffer but keep listening
    pub fn mark_seen(&self, ticket_id: &str) {
        let cleared = match self.buffers.write().get_mut(ticket_id) {
            Some(buffer) if !buffer.is_empty() => {
                buffer.clear();
                true
            }
            _ => false,
        };
        if cleared {
            self.revision.send_modify(|rev| *rev += 1);
        }
    }

    pub async fn current(&self) -> Option<String> {
        self.current.lock().await.clone()
    }

    /// Forget focus and buffers without touching the wire; used after the
    /// connection has already dropped every registration
    pub async fn reset(&self) {
        let mut current = self.current.lock().await;
        *current = None;
        self.buffers.write().clear();
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Revision counter that ticks whenever any buffer changes
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoCredentials;
    use crate::stomp::Command;
    use crate::transport::MemoryConnector;
    use resilience::ReconnectPolicy;

    async fn setup() -> (MemoryConnector, ConnectionManager, ActiveTicket) {
        let connector = MemoryConnector::new();
        let manager = ConnectionManager::spawn(
            Arc::new(connector.clone()),
            Arc::new(NoCredentials),
            ReconnectPolicy::default(),
        );
        manager.connect().await.unwrap();
        let active = ActiveTicket::new(manager.clone(), AlertBus::new());
        (connector, manager, active)
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_unsubscribes_before_subscribing() {
        let (connector, manager, active) = setup().await;
        let mut server = connector.next_server().await.unwrap();

        active.set_active(Some("t1")).await.unwrap();
        active.set_active(Some("t2")).await.unwrap();
        manager.topics().await.unwrap();

        let frames = server.try_frames();
        let commands: Vec<_> = frames.iter().map(|f| f.command).collect();
        assert_eq!(
            commands,
            [Command::Subscribe, Command::Unsubscribe, Command::Subscribe]
        );
        assert_eq!(frames[0].get("destination"), Some("/topic/ticket/t1"));
        assert_eq!(frames[1].get("id"), frames[0].get("id"));
        assert_eq!(frames[2].get("destination"), Some("/topic/ticket/t2"));
        assert_eq!(manager.topics().await.unwrap(), vec![Topic::ticket("t2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_buffer_until_seen() {
        let (connector, _manager, active) = setup().await;
        let mut server = connector.next_server().await.unwrap();

        active.set_active(Some("t1")).await.unwrap();
        let mut revision = active.watch();
        let sub = server.next_frame().await.unwrap();
        server.deliver(
            "/topic/ticket/t1",
            sub.get("id"),
            r#"{"type":"RESPONSE_ADDED","title":"New reply","message":"hi","user":"ana","timestamp":"T1"}"#,
        );
        revision.changed().await.unwrap();

        let updates = active.updates("t1");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, EventKind::ResponseAdded);
        assert_eq!(updates[0].user.as_deref(), Some("ana"));

        active.mark_seen("t1");
        assert!(active.updates("t1").is_empty());
        assert_eq!(active.current().await.as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_focus_drops_buffer() {
        let (_connector, manager, active) = setup().await;

        active.set_active(Some("t1")).await.unwrap();
        active.set_active(Some("  ")).await.unwrap();

        assert_eq!(active.current().await, None);
        assert!(manager.topics().await.unwrap().is_empty());
        assert!(active.updates("t1").is_empty());
    }

    #[test]
    fn test_raw_update_is_kept() {
        let update = TicketUpdate::from_payload(&Payload::Raw("status: closed".into()));
        assert_eq!(update.title, "Ticket Updated");
        assert_eq!(update.message, "status: closed");
    }
}
