//! Transient UI alerts (toasts).
//!
//! Alerts are fire-and-forget: with no subscriber attached they are dropped,
//! and a lagging subscriber loses the oldest ones.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const ALERT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub ticket_id: Option<String>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            ticket_id: None,
            raised_at: Utc::now(),
        }
    }

    pub fn for_ticket(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AlertBus {
    tx: broadcast::Sender<Alert>,
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(ALERT_CAPACITY);
        Self { tx }
    }

    pub fn raise(&self, alert: Alert) {
        debug!(level = ?alert.level, title = %alert.title, "alert raised");
        // no receivers is fine, nobody is looking at the screen
        let _ = self.tx.send(alert);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}
