//! Per-login live-update context.
//!
//! A `LiveSession` bundles the connection driver, the notification feed and
//! the active-ticket bridge for one signed-in user. Logging out resets all of
//! it; nothing here is process-global.

use crate::active::{ActiveTicket, TicketUpdate};
use crate::alerts::{Alert, AlertBus, AlertLevel};
use crate::auth::CredentialSupplier;
use crate::config::LiveConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
use crate::error::{LiveError, LiveResult};
use crate::notifications::{Notification, NotificationSource, NotificationStore};
use crate::topic::{Scope, Topic};
use crate::transport::{Connector, WebSocketConnector};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Employee,
    Support,
    Admin,
}

impl FromStr for Role {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("ROLE_").unwrap_or(upper.as_str()) {
            "EMPLOYEE" => Ok(Role::Employee),
            "SUPPORT" => Ok(Role::Support),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(LiveError::Config(format!("unknown role {s:?}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Employee => "EMPLOYEE",
            Role::Support => "SUPPORT",
            Role::Admin => "ADMIN",
        })
    }
}

/// Who is signed in, as far as topic selection is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub user_id: String,
    pub department: Option<String>,
    pub role: Role,
}

impl SessionProfile {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            department: None,
            role,
        }
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        let department = department.into();
        self.department = (!department.trim().is_empty()).then_some(department);
        self
    }

    /// `LIVE_USER_ID` (required), `LIVE_DEPARTMENT`, `LIVE_ROLE`
    pub fn from_env() -> LiveResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> LiveResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let user_id = get("LIVE_USER_ID").ok_or_else(|| LiveError::Config("LIVE_USER_ID is required".into()))?;
        let role = match get("LIVE_ROLE") {
            Some(raw) => raw.parse()?,
            None => Role::default(),
        };
        let profile = SessionProfile::new(user_id, role);
        Ok(match get("LIVE_DEPARTMENT") {
            Some(department) => profile.with_department(department),
            None => profile,
        })
    }

    /// Persistent scopes in subscription order, with the feed source each one tags
    pub fn persistent_topics(&self) -> Vec<(Topic, NotificationSource)> {
        let mut topics = vec![(Topic::user(self.user_id.as_str()), NotificationSource::Personal)];
        if let Some(department) = &self.department {
            topics.push((Topic::department(department.as_str()), NotificationSource::Department));
        }
        if self.role == Role::Admin {
            topics.push((Topic::AllTickets, NotificationSource::Admin));
        }
        topics
    }
}

pub struct LiveSession {
    connection: ConnectionManager,
    store: Arc<NotificationStore>,
    active: ActiveTicket,
    alerts: AlertBus,
    profile: RwLock<Option<SessionProfile>>,
}

impl LiveSession {
    pub fn new(
        config: &LiveConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSupplier>,
    ) -> Self {
        let alerts = AlertBus::new();
        let connection = ConnectionManager::spawn(connector, credentials, config.reconnect.clone());
        let store = Arc::new(NotificationStore::new(config.feed_capacity, alerts.clone()));
        let active = ActiveTicket::new(connection.clone(), alerts.clone());

        spawn_failure_alerts(connection.watch(), alerts.clone());

        Self {
            connection,
            store,
            active,
            alerts,
            profile: RwLock::new(None),
        }
    }

    /// Session over the helpdesk WebSocket endpoint named in `config`
    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(
            config,
            Arc::new(WebSocketConnector::from_config(config)),
            config.credentials(),
        )
    }

    /// Subscribe the profile's persistent scopes and connect
    ///
    /// A failed first connect is not an error: the reconnect policy takes over
    /// and the status watch reports progress.
    pub async fn start(&self, profile: SessionProfile) -> LiveResult<()> {
        info!(user_id = %profile.user_id, role = %profile.role, "starting live session");
        for (topic, source) in profile.persistent_topics() {
            self.connection
                .subscribe(topic, self.store.handler(source), Scope::Persistent)
                .await?;
        }
        *self.profile.write() = Some(profile);

        match self.connection.connect().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "initial connect failed, reconnecting in background");
                self.alerts.raise(Alert::new(
                    AlertLevel::Error,
                    "Connection Error",
                    "Failed to connect to real-time updates. Some features may be unavailable.",
                ));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn profile(&self) -> Option<SessionProfile> {
        self.profile.read().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.store.notifications()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    pub fn mark_as_read(&self, id: &str) -> bool {
        self.store.mark_as_read(id)
    }

    pub fn mark_all_read(&self) -> usize {
        self.store.mark_all_read()
    }

    pub fn clear_notifications(&self) {
        self.store.clear()
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub async fn set_active_ticket(&self, ticket_id: Option<&str>) -> LiveResult<()> {
        self.active.set_active(ticket_id).await
    }

    pub async fn active_ticket(&self) -> Option<String> {
        self.active.current().await
    }

    pub fn ticket_updates(&self, ticket_id: &str) -> Vec<TicketUpdate> {
        self.active.updates(ticket_id)
    }

    pub fn mark_ticket_seen(&self, ticket_id: &str) {
        self.active.mark_seen(ticket_id)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn status(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch()
    }

    pub fn watch_feed(&self) -> watch::Receiver<u64> {
        self.store.watch()
    }

    pub fn watch_ticket_updates(&self) -> watch::Receiver<u64> {
        self.active.watch()
    }

    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Publish to an application destination such as `/app/ticket/update`
    pub async fn send<T: Serialize>(&self, destination: &str, body: &T) -> LiveResult<()> {
        self.connection.send(destination, body).await
    }

    pub async fn retry(&self) -> LiveResult<()> {
        self.connection.retry().await
    }

    /// Drop the link, every subscription, the feed and the ticket buffers
    pub async fn logout(&self) -> LiveResult<()> {
        self.connection.disconnect().await?;
        self.active.reset().await;
        self.store.clear();
        *self.profile.write() = None;
        info!("live session logged out");
        Ok(())
    }
}

fn spawn_failure_alerts(mut status: watch::Receiver<ConnectionState>, alerts: AlertBus) {
    tokio::spawn(async move {
        let mut previous = status.borrow().status;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().status;
            if current == ConnectionStatus::Failed && previous != ConnectionStatus::Failed {
                alerts.raise(Alert::new(
                    AlertLevel::Warning,
                    "Not connected to real-time updates",
                    "You may need to refresh to see the latest changes.",
                ));
            }
            previous = current;
        }
    });
}
