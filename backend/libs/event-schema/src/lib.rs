/// Event schemas for the helpdesk live-update channel
///
/// The helpdesk server publishes JSON events on STOMP topics. This library
/// gives them one typed shape so every consumer applies the same fallbacks.
pub mod events;

pub use events::{EventKind, HelpdeskEvent, Importance, TicketRef};
