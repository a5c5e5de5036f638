//! Topic → handler registrations owned by the connection driver.
//!
//! Registrations outlive the link: each one carries the wire id of its
//! current `SUBSCRIBE`, which is cleared when the link drops and reassigned on
//! replay. Entries keep registration order so replay is deterministic.

use crate::stomp::Frame;
use crate::topic::{Scope, Topic};
use event_schema::HelpdeskEvent;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Message body handed to a handler
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// Body that did not parse as JSON, passed through untouched
    Raw(String),
}

impl Payload {
    pub fn decode(body: &str) -> Self {
        match serde_json::from_str(body) {
            Ok(value) => Payload::Json(value),
            Err(e) => {
                warn!(error = %e, "message body is not json, passing raw payload");
                Payload::Raw(body.to_string())
            }
        }
    }

    /// Typed helpdesk event; every JSON object reads as one, however sparse
    pub fn as_event(&self) -> Option<HelpdeskEvent> {
        match self {
            Payload::Json(value @ Value::Object(_)) => match HelpdeskEvent::from_value(value.clone()) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "json object is not a helpdesk event");
                    None
                }
            },
            Payload::Json(_) | Payload::Raw(_) => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Wire-level subscription change produced by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
}

impl ControlFrame {
    pub fn into_frame(self) -> Frame {
        match self {
            ControlFrame::Subscribe { id, destination } => Frame::subscribe(&id, &destination),
            ControlFrame::Unsubscribe { id } => Frame::unsubscribe(&id),
        }
    }
}

struct Entry {
    topic: Topic,
    destination: String,
    handler: Handler,
    scope: Scope,
    wire_id: Option<String>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Entry>,
    next_wire_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_wire_id(&mut self) -> String {
        let id = format!("sub-{}", self.next_wire_id);
        self.next_wire_id += 1;
        id
    }

    /// Register `topic`; returns the `SUBSCRIBE` to send when `online`
    ///
    /// A topic that is already registered keeps its position and wire
    /// subscription; only the handler and scope are replaced.
    pub fn subscribe(
        &mut self,
        topic: Topic,
        handler: Handler,
        scope: Scope,
        online: bool,
    ) -> Option<ControlFrame> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.topic == topic) {
            debug!(topic = %topic, "replacing handler for registered topic");
            entry.handler = handler;
            entry.scope = scope;
            return None;
        }

        let destination = topic.destination();
        let wire_id = online.then(|| self.allocate_wire_id());
        let frame = wire_id.clone().map(|id| ControlFrame::Subscribe {
            id,
            destination: destination.clone(),
        });

        self.entries.push(Entry {
            topic,
            destination,
            handler,
            scope,
            wire_id,
        });
        frame
    }

    /// Drop `topic`; returns whether it was registered and the `UNSUBSCRIBE`
    /// to send when it was live on the wire
    pub fn unsubscribe(&mut self, topic: &Topic, online: bool) -> (bool, Option<ControlFrame>) {
        let Some(pos) = self.entries.iter().position(|e| &e.topic == topic) else {
            return (false, None);
        };
        let entry = self.entries.remove(pos);
        let frame = entry
            .wire_id
            .filter(|_| online)
            .map(|id| ControlFrame::Unsubscribe { id });
        (true, frame)
    }

    /// Assign fresh wire ids to every registration, in registration order
    pub fn replay(&mut self) -> Vec<ControlFrame> {
        self.next_wire_id = 0;
        let mut frames = Vec::with_capacity(self.entries.len());
        for i in 0..self.entries.len() {
            let id = self.allocate_wire_id();
            let entry = &mut self.entries[i];
            entry.wire_id = Some(id.clone());
            frames.push(ControlFrame::Subscribe {
                id,
                destination: entry.destination.clone(),
            });
        }
        frames
    }

    /// Forget wire ids after the link is gone; registrations stay
    pub fn mark_offline(&mut self) {
        for entry in &mut self.entries {
            entry.wire_id = None;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_wire_id = 0;
    }

    /// Route one inbound body; `false` when no registration matches
    ///
    /// The handler is resolved at delivery time, so a message racing an
    /// unsubscribe is dropped here. A panicking handler is logged and does not
    /// take the driver down.
    pub fn dispatch(&self, subscription: Option<&str>, destination: Option<&str>, body: &str) -> bool {
        let entry = subscription
            .and_then(|id| {
                self.entries
                    .iter()
                    .find(|e| e.wire_id.as_deref() == Some(id))
            })
            .or_else(|| destination.and_then(|d| self.entries.iter().find(|e| e.destination == d)));

        let Some(entry) = entry else {
            return false;
        };

        let handler = Arc::clone(&entry.handler);
        let payload = Payload::decode(body);
        if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            error!(topic = %entry.topic, "subscription handler panicked");
        }
        true
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.entries.iter().map(|e| e.topic.clone()).collect()
    }

    pub fn scope_of(&self, topic: &Topic) -> Option<Scope> {
        self.entries.iter().find(|e| &e.topic == topic).map(|e| e.scope)
    }

    /// Registrations currently subscribed on the wire
    pub fn active_wire_subscriptions(&self) -> usize {
        self.entries.iter().filter(|e| e.wire_id.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
