use helpdesk_live::{
    logging, ConnectionStatus, LiveConfig, LiveError, LiveSession, SessionProfile,
};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), LiveError> {
    logging::init_tracing();

    let cfg = LiveConfig::from_env()?;
    let profile = SessionProfile::from_env()?;
    tracing::info!(url = %cfg.ws_url, user_id = %profile.user_id, "helpdesk-live starting");

    let session = LiveSession::from_config(&cfg);
    let mut alerts = session.alerts();
    let mut status = session.watch_status();
    let mut feed = session.watch_feed();
    let mut tickets = session.watch_ticket_updates();

    session.start(profile).await?;

    let focus = std::env::var("LIVE_TICKET_ID").ok();
    if let Some(ticket_id) = focus.as_deref() {
        session.set_active_ticket(Some(ticket_id)).await?;
    }

    let mut newest: Option<String> = None;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("ctrl-c received, logging out");
                break;
            }
            alert = alerts.recv() => match alert {
                Ok(alert) => tracing::info!(
                    level = ?alert.level,
                    title = %alert.title,
                    ticket_id = alert.ticket_id.as_deref().unwrap_or("-"),
                    "{}",
                    alert.message
                ),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "alert stream lagged"),
                Err(RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                tracing::info!(status = %state.status, attempt = state.reconnect_attempts, "connection");
                if state.status == ConnectionStatus::Failed {
                    tracing::warn!("reconnect attempts exhausted, restart to try again");
                }
            }
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                feed.borrow_and_update();
                let notifications = session.notifications();
                // newest first; stop at the head from the previous tick
                let fresh = notifications
                    .iter()
                    .position(|n| Some(&n.id) == newest.as_ref())
                    .unwrap_or(notifications.len());
                for n in notifications.iter().take(fresh).rev() {
                    tracing::info!(
                        id = %n.id,
                        kind = %n.kind,
                        source = ?n.source,
                        ticket_id = n.ticket_id.as_deref().unwrap_or("-"),
                        "{}: {}",
                        n.title,
                        n.message
                    );
                }
                newest = notifications.first().map(|n| n.id.clone());
                tracing::debug!(unread = session.unread_count(), "feed updated");
            }
            changed = tickets.changed() => {
                if changed.is_err() {
                    break;
                }
                tickets.borrow_and_update();
                if let Some(ticket_id) = focus.as_deref() {
                    let pending = session.ticket_updates(ticket_id).len();
                    tracing::debug!(ticket_id, pending, "ticket updates buffered");
                }
            }
        }
    }

    session.logout().await?;
    Ok(())
}
