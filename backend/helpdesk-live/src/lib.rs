//! Real-time live updates for the helpdesk portal.
//!
//! Keeps one STOMP-over-WebSocket connection to the helpdesk server, restores
//! topic subscriptions across reconnects, and folds inbound events into a
//! deduplicated notification feed plus a per-ticket update buffer.

pub mod active;
pub mod alerts;
pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod notifications;
pub mod registry;
pub mod session;
pub mod stomp;
pub mod topic;
pub mod transport;

pub use active::{ActiveTicket, TicketUpdate};
pub use alerts::{Alert, AlertBus, AlertLevel};
pub use auth::{CredentialSupplier, NoCredentials, SharedToken, StaticToken, TokenFile};
pub use config::LiveConfig;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{LiveError, LiveResult};
pub use notifications::{DedupPolicy, IdOrTicketTime, Notification, NotificationSource, NotificationStore};
pub use registry::{Handler, Payload, SubscriptionRegistry};
pub use session::{LiveSession, Role, SessionProfile};
pub use topic::{Scope, Topic};
pub use transport::{Connector, Link, TransportError, WebSocketConnector};

#[cfg(any(test, feature = "test-util"))]
pub use transport::{MemoryConnector, MemoryServer};
