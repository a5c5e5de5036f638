//! Helpdesk server events pushed over the live-update channel
//!
//! The helpdesk server emits loosely-typed JSON maps. Every field is optional on
//! the wire; accessors on [`HelpdeskEvent`] apply the fallbacks consumers rely on
//! (nested `ticket.id`, kind-specific default titles, `STATUS_CHANGED` mapping).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Server-assigned importance of an event
///
/// Decoding never fails: `null`, a missing field or an unknown level read as
/// `Normal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

impl Importance {
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Importance::Low,
            "HIGH" => Importance::High,
            _ => Importance::Normal,
        }
    }
}

impl<'de> Deserialize<'de> for Importance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => Importance::from_wire(&s),
            _ => Importance::Normal,
        })
    }
}

/// Kind of helpdesk event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    TicketCreated,
    TicketUpdated,
    TicketClosed,
    TicketReopened,
    /// Status moved between two non-terminal states
    StatusChanged,
    ResponseAdded,
    KnowledgeDocCreated,
    KnowledgeDocUpdated,
    /// A `type` this client does not know about, kept verbatim
    Other(String),
}

impl EventKind {
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TICKET_CREATED" => EventKind::TicketCreated,
            "TICKET_UPDATED" => EventKind::TicketUpdated,
            "TICKET_CLOSED" => EventKind::TicketClosed,
            "TICKET_REOPENED" => EventKind::TicketReopened,
            "STATUS_CHANGED" | "STATUS_CHANGE" => EventKind::StatusChanged,
            "NEW_RESPONSE" | "RESPONSE_ADDED" => EventKind::ResponseAdded,
            "KNOWLEDGE_CREATED" | "KNOWLEDGE_DOC_CREATED" => EventKind::KnowledgeDocCreated,
            "KNOWLEDGE_UPDATED" | "KNOWLEDGE_DOC_UPDATED" => EventKind::KnowledgeDocUpdated,
            _ => EventKind::Other(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::TicketCreated => "TICKET_CREATED",
            EventKind::TicketUpdated => "TICKET_UPDATED",
            EventKind::TicketClosed => "TICKET_CLOSED",
            EventKind::TicketReopened => "TICKET_REOPENED",
            EventKind::StatusChanged => "STATUS_CHANGED",
            EventKind::ResponseAdded => "RESPONSE_ADDED",
            EventKind::KnowledgeDocCreated => "KNOWLEDGE_DOC_CREATED",
            EventKind::KnowledgeDocUpdated => "KNOWLEDGE_DOC_UPDATED",
            EventKind::Other(raw) => raw.as_str(),
        }
    }

    /// Default headline used when the server sends no `title`
    pub fn default_title(&self) -> &'static str {
        match self {
            EventKind::TicketCreated => "Ticket created",
            EventKind::TicketUpdated => "Ticket updated",
            EventKind::TicketClosed => "Ticket closed",
            EventKind::TicketReopened => "Ticket reopened",
            EventKind::StatusChanged => "Ticket status changed",
            EventKind::ResponseAdded => "New response",
            EventKind::KnowledgeDocCreated => "Knowledge article published",
            EventKind::KnowledgeDocUpdated => "Knowledge article updated",
            EventKind::Other(_) => "Helpdesk update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EventKind::from_wire(&raw))
    }
}

/// Ticket summary the server embeds in ticket events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRef {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub category: Option<String>,
}

/// Inbound event body as the helpdesk server sends it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpdeskEvent {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "opt_text")]
    pub event_type: Option<String>,
    /// Server event time, kept verbatim (RFC 3339 string or epoch number)
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub ticket_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub document_id: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub message: Option<String>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default, deserialize_with = "opt_ticket")]
    pub ticket: Option<TicketRef>,
    #[serde(default, deserialize_with = "opt_text")]
    pub old_status: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub new_status: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub response_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub author_id: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub content: Option<String>,
    /// Display name of the acting user, when the server includes it
    #[serde(default, deserialize_with = "opt_text")]
    pub user: Option<String>,
}

impl HelpdeskEvent {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Event kind, with `STATUS_CHANGED` folded into closed / reopened when the
    /// status transition says so
    pub fn kind(&self) -> EventKind {
        let kind = self
            .event_type
            .as_deref()
            .map(EventKind::from_wire)
            .unwrap_or_else(|| EventKind::Other(String::new()));

        if kind != EventKind::StatusChanged {
            return kind;
        }

        let new_status = self
            .new_status
            .as_deref()
            .or_else(|| self.ticket.as_ref().and_then(|t| t.status.as_deref()))
            .map(|s| s.to_ascii_uppercase());
        let old_status = self.old_status.as_deref().map(|s| s.to_ascii_uppercase());

        match (old_status.as_deref(), new_status.as_deref()) {
            (_, Some("CLOSED")) => EventKind::TicketClosed,
            (Some("CLOSED"), Some(_)) | (_, Some("REOPENED")) => EventKind::TicketReopened,
            _ => EventKind::StatusChanged,
        }
    }

    pub fn ticket_id(&self) -> Option<&str> {
        self.ticket_id
            .as_deref()
            .or_else(|| self.ticket.as_ref().and_then(|t| t.id.as_deref()))
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Server timestamp rendered as a string, if the server sent one
    pub fn timestamp_string(&self) -> Option<String> {
        match self.timestamp.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn display_title(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return title.to_string();
        }

        let kind = self.kind();
        match self.ticket.as_ref().and_then(|t| t.title.as_deref()) {
            Some(ticket_title) => format!("{}: {}", kind.default_title(), ticket_title),
            None => kind.default_title().to_string(),
        }
    }

    pub fn display_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.content.clone())
            .unwrap_or_default()
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// Display text: strings pass through, scalars are rendered, anything else is dropped
fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Embedded ticket summary; a bare id is accepted, other shapes are ignored
fn opt_ticket<'de, D>(deserializer: D) -> Result<Option<TicketRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(object @ Value::Object(_)) => serde_json::from_value(object).ok(),
        Some(Value::String(id)) => Some(TicketRef {
            id: Some(id),
            ..TicketRef::default()
        }),
        Some(Value::Number(id)) => Some(TicketRef {
            id: Some(id.to_string()),
            ..TicketRef::default()
        }),
        _ => None,
    })
}
