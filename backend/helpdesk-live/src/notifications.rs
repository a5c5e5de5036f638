//! Bounded, deduplicated notification feed.

use crate::alerts::{Alert, AlertBus, AlertLevel};
use crate::registry::{Handler, Payload};
use chrono::{DateTime, Utc};
use event_schema::{EventKind, HelpdeskEvent, Importance};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which persistent scope a notification arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    /// The user's own topic
    #[serde(rename = "self")]
    Personal,
    Department,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub title: String,
    pub message: String,
    /// Server event time when present, otherwise the receive time
    pub timestamp: String,
    /// Server event time exactly as sent, used for dedup
    #[serde(skip)]
    pub server_time: Option<String>,
    pub read: bool,
    pub source: NotificationSource,
    pub importance: Importance,
    pub ticket_id: Option<String>,
    pub document_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_event(event: &HelpdeskEvent, source: NotificationSource) -> Self {
        let received_at = Utc::now();
        let server_time = event.timestamp_string();
        let ticket_id = event.ticket_id().map(str::to_string);
        let document_id = event.document_id().map(str::to_string);

        let id = match (&event.id, &ticket_id, &document_id, &server_time) {
            (Some(id), _, _, _) => id.clone(),
            (None, Some(ticket), _, Some(ts)) => format!("{ticket}@{ts}"),
            (None, None, Some(doc), Some(ts)) => format!("{doc}@{ts}"),
            _ => Uuid::new_v4().to_string(),
        };

        Self {
            id,
            kind: event.kind(),
            title: event.display_title(),
            message: event.display_message(),
            timestamp: server_time
                .clone()
                .unwrap_or_else(|| received_at.to_rfc3339()),
            server_time,
            read: false,
            source,
            importance: event.importance,
            ticket_id,
            document_id,
            received_at,
        }
    }

    /// Body that could not be read as an event, kept so nothing is lost silently
    pub fn from_raw(body: impl Into<String>, source: NotificationSource) -> Self {
        let received_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind: EventKind::Other(String::new()),
            title: "Notification".to_string(),
            message: body.into(),
            timestamp: received_at.to_rfc3339(),
            server_time: None,
            read: false,
            source,
            importance: Importance::Normal,
            ticket_id: None,
            document_id: None,
            received_at,
        }
    }
}

/// Decides whether an incoming notification repeats one already in the feed
pub trait DedupPolicy: Send + Sync {
    fn is_duplicate(&self, existing: &Notification, incoming: &Notification) -> bool;
}

/// Same id, or same ticket at the same server timestamp
///
/// Only the server's timestamp counts, never the receive time. When neither
/// side carries one, the same ticket with the same kind and message is taken
/// as one broadcast delivered on two scopes. Both halves are heuristics: two
/// distinct events on one ticket that look alike collapse into one.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdOrTicketTime;

impl DedupPolicy for IdOrTicketTime {
    fn is_duplicate(&self, existing: &Notification, incoming: &Notification) -> bool {
        if existing.id == incoming.id {
            return true;
        }
        match (&existing.ticket_id, &incoming.ticket_id) {
            (Some(a), Some(b)) if a == b => match (&existing.server_time, &incoming.server_time) {
                (Some(x), Some(y)) => x == y,
                (None, None) => existing.kind == incoming.kind && existing.message == incoming.message,
                _ => false,
            },
            _ => false,
        }
    }
}

pub struct NotificationStore {
    feed: RwLock<VecDeque<Notification>>,
    capacity: NonZeroUsize,
    policy: Box<dyn DedupPolicy>,
    alerts: AlertBus,
    revision: watch::Sender<u64>,
}

impl NotificationStore {
    pub fn new(capacity: NonZeroUsize, alerts: AlertBus) -> Self {
        Self::with_policy(capacity, IdOrTicketTime, alerts)
    }

    pub fn with_policy(
        capacity: NonZeroUsize,
        policy: impl DedupPolicy + 'static,
        alerts: AlertBus,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            feed: RwLock::new(VecDeque::with_capacity(capacity.get())),
            capacity,
            policy: Box::new(policy),
            alerts,
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Insert a normalized event at the head; `false` when it was a duplicate
    pub fn ingest(&self, event: &HelpdeskEvent, source: NotificationSource) -> bool {
        self.insert(Notification::from_event(event, source))
    }

    /// Ingest a handler payload, passing undecodable bodies through as raw text
    pub fn ingest_payload(&self, payload: Payload, source: NotificationSource) -> bool {
        match payload.as_event() {
            Some(event) => self.ingest(&event, source),
            None => {
                let body = match payload {
                    Payload::Raw(text) => text,
                    Payload::Json(value) => value.to_string(),
                };
                warn!(?source, "notification body is not an event, keeping raw text");
                self.insert(Notification::from_raw(body, source))
            }
        }
    }

    fn insert(&self, notification: Notification) -> bool {
        {
            let mut feed = self.feed.write();
            if feed
                .iter()
                .any(|existing| self.policy.is_duplicate(existing, &notification))
            {
                debug!(id = %notification.id, source = ?notification.source, "duplicate notification discarded");
                return false;
            }
            feed.push_front(notification.clone());
            feed.truncate(self.capacity.get());
        }
        self.bump();

        if notification.importance == Importance::High {
            let mut alert = Alert::new(AlertLevel::Info, &notification.title, &notification.message);
            if let Some(ticket_id) = &notification.ticket_id {
                alert = alert.for_ticket(ticket_id.clone());
            }
            self.alerts.raise(alert);
        }
        true
    }

    /// Handler that feeds this store from a persistent subscription
    pub fn handler(self: &Arc<Self>, source: NotificationSource) -> Handler {
        let store = Arc::clone(self);
        Arc::new(move |payload| {
            store.ingest_payload(payload, source);
        })
    }

    pub fn mark_as_read(&self, id: &str) -> bool {
        let changed = {
            let mut feed = self.feed.write();
            match feed.iter_mut().find(|n| n.id == id && !n.read) {
                Some(n) => {
                    n.read = true;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.bump();
        }
        changed
    }

    /// Returns how many entries flipped to read
    pub fn mark_all_read(&self) -> usize {
        let mut flipped = 0;
        for n in self.feed.write().iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped += 1;
        }
        if flipped > 0 {
            self.bump();
        }
        flipped
    }

    pub fn clear(&self) {
        let had_entries = {
            let mut feed = self.feed.write();
            let had = !feed.is_empty();
            feed.clear();
            had
        };
        if had_entries {
            self.bump();
        }
    }

    pub fn unread_count(&self) -> usize {
        self.feed.read().iter().filter(|n| !n.read).count()
    }

    /// Snapshot, most recent first
    pub fn notifications(&self) -> Vec<Notification> {
        self.feed.read().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.feed.read().iter().find(|n| n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.feed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Revision counter that ticks on every feed mutation
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
