//! End-to-end session flows: persistent scopes feeding the notification
//! store, the active-ticket bridge, alerts and logout.

use helpdesk_live::stomp::{Command, Frame};
use helpdesk_live::{
    AlertLevel, LiveConfig, LiveSession, MemoryConnector, MemoryServer, NoCredentials,
    NotificationSource, Role, SessionProfile, Topic,
};
use std::collections::HashMap;
use std::sync::Arc;

fn session(connector: &MemoryConnector) -> LiveSession {
    LiveSession::new(
        &LiveConfig::default(),
        Arc::new(connector.clone()),
        Arc::new(NoCredentials),
    )
}

/// Read `n` SUBSCRIBE frames and index their wire ids by destination
async fn subscription_ids(server: &mut MemoryServer, n: usize) -> HashMap<String, String> {
    let mut ids = HashMap::new();
    for _ in 0..n {
        let frame = server.next_frame().await.expect("client hung up");
        assert_eq!(frame.command, Command::Subscribe);
        ids.insert(
            frame.get("destination").unwrap_or_default().to_string(),
            frame.get("id").unwrap_or_default().to_string(),
        );
    }
    ids
}

fn deliver(server: &mut MemoryServer, ids: &HashMap<String, String>, destination: &str, body: &str) {
    assert!(server.deliver(destination, ids.get(destination).map(String::as_str), body));
}

#[tokio::test(start_paused = true)]
async fn test_admin_session_subscribes_every_persistent_scope() {
    let connector = MemoryConnector::new();
    let session = session(&connector);

    let profile = SessionProfile::new("42", Role::Admin).with_department("IT");
    session.start(profile).await.unwrap();
    assert!(session.is_connected());

    let mut server = connector.next_server().await.unwrap();
    let mut order = Vec::new();
    for _ in 0..3 {
        let frame = server.next_frame().await.unwrap();
        order.push(frame.get("destination").unwrap_or_default().to_string());
    }
    assert_eq!(
        order,
        ["/topic/user/42", "/topic/department/IT", "/topic/tickets"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_event_on_overlapping_scopes_is_kept_once() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    session
        .start(SessionProfile::new("42", Role::Admin).with_department("IT"))
        .await
        .unwrap();

    let mut server = connector.next_server().await.unwrap();
    let ids = subscription_ids(&mut server, 3).await;
    let mut feed = session.watch_feed();

    let e1 = r#"{"id":"e1","type":"TICKET_UPDATED","ticketId":"t1","timestamp":"T0","title":"Printer jam"}"#;
    deliver(&mut server, &ids, "/topic/department/IT", e1);
    feed.changed().await.unwrap();

    deliver(&mut server, &ids, "/topic/tickets", e1);
    // frames on one link arrive in order, so once the marker lands the duplicate was seen
    deliver(&mut server, &ids, "/topic/user/42", r#"{"id":"marker","type":"TICKET_CREATED"}"#);
    feed.changed().await.unwrap();

    let notifications = session.notifications();
    assert_eq!(notifications.len(), 2);
    let e1 = notifications.iter().find(|n| n.id == "e1").unwrap();
    assert_eq!(e1.source, NotificationSource::Department);
    assert_eq!(e1.title, "Printer jam");
}

#[tokio::test(start_paused = true)]
async fn test_server_broadcast_without_id_on_two_scopes_is_kept_once() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    session
        .start(SessionProfile::new("42", Role::Admin).with_department("IT"))
        .await
        .unwrap();

    let mut server = connector.next_server().await.unwrap();
    let ids = subscription_ids(&mut server, 3).await;
    let mut feed = session.watch_feed();

    // ticket updates go to the department topic and the admin topic, with no id or timestamp
    let update = r#"{"type":"TICKET_UPDATED","ticket":{"id":"t1","title":"VPN","status":"IN_PROGRESS"},"message":"Ticket updated: VPN"}"#;
    deliver(&mut server, &ids, "/topic/department/IT", update);
    feed.changed().await.unwrap();

    deliver(&mut server, &ids, "/topic/tickets", update);
    deliver(&mut server, &ids, "/topic/user/42", r#"{"id":"marker","type":"TICKET_CREATED"}"#);
    feed.changed().await.unwrap();

    let notifications = session.notifications();
    assert_eq!(notifications.len(), 2);
    let t1: Vec<_> = notifications
        .iter()
        .filter(|n| n.ticket_id.as_deref() == Some("t1"))
        .collect();
    assert_eq!(t1.len(), 1);
    assert_eq!(t1[0].source, NotificationSource::Department);
    assert_eq!(t1[0].message, "Ticket updated: VPN");
}

#[tokio::test(start_paused = true)]
async fn test_unread_count_tracks_reads() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    session
        .start(SessionProfile::new("7", Role::Employee))
        .await
        .unwrap();

    let mut server = connector.next_server().await.unwrap();
    let ids = subscription_ids(&mut server, 1).await;
    let mut feed = session.watch_feed();

    for id in ["a", "b", "c"] {
        let body = format!(r#"{{"id":"{id}","type":"TICKET_CREATED","timestamp":"T{id}"}}"#);
        deliver(&mut server, &ids, "/topic/user/7", &body);
        feed.changed().await.unwrap();
    }
    assert_eq!(session.unread_count(), 3);

    assert!(session.mark_as_read("b"));
    assert_eq!(session.unread_count(), 2);

    // newest first
    let order: Vec<_> = session.notifications().into_iter().map(|n| n.id).collect();
    assert_eq!(order, ["c", "b", "a"]);

    session.clear_notifications();
    assert_eq!(session.unread_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_switching_tickets_keeps_one_transient_subscription() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    session
        .start(SessionProfile::new("7", Role::Support))
        .await
        .unwrap();
    let mut server = connector.next_server().await.unwrap();
    subscription_ids(&mut server, 1).await;

    let mut updates = session.watch_ticket_updates();
    session.set_active_ticket(Some("t1")).await.unwrap();
    let t1 = subscription_ids(&mut server, 1).await;
    deliver(
        &mut server,
        &t1,
        "/topic/ticket/t1",
        r#"{"type":"STATUS_CHANGED","oldStatus":"OPEN","newStatus":"CLOSED","message":"closed by agent","timestamp":"T5"}"#,
    );
    updates.changed().await.unwrap();
    assert_eq!(session.ticket_updates("t1").len(), 1);

    session.set_active_ticket(Some("t2")).await.unwrap();
    let unsubscribe = server.next_frame().await.unwrap();
    assert_eq!(unsubscribe.command, Command::Unsubscribe);
    assert_eq!(unsubscribe.get("id"), t1.get("/topic/ticket/t1").map(String::as_str));
    let t2 = subscription_ids(&mut server, 1).await;
    assert!(t2.contains_key("/topic/ticket/t2"));

    assert!(session.ticket_updates("t1").is_empty());
    assert_eq!(session.active_ticket().await.as_deref(), Some("t2"));

    // ticket updates never reach the notification feed
    assert!(session.notifications().is_empty());

    let topics = session.connection().topics().await.unwrap();
    let transient: Vec<_> = topics
        .iter()
        .filter(|t| matches!(t, Topic::Ticket(_)))
        .collect();
    assert_eq!(transient.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ticket_switches_keep_one_transient_subscription() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    session
        .start(SessionProfile::new("7", Role::Support))
        .await
        .unwrap();
    let mut server = connector.next_server().await.unwrap();
    subscription_ids(&mut server, 1).await;

    let (a, b, c) = tokio::join!(
        session.set_active_ticket(Some("t1")),
        session.set_active_ticket(Some("t2")),
        session.set_active_ticket(Some("t3")),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let active = session.active_ticket().await.expect("a ticket is active");
    let tickets: Vec<_> = session
        .connection()
        .topics()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| matches!(t, Topic::Ticket(_)))
        .collect();
    assert_eq!(tickets, vec![Topic::ticket(active.as_str())]);

    // replay the wire: never more than one ticket subscription live at once
    let mut live: HashMap<String, String> = HashMap::new();
    for frame in server.try_frames() {
        let id = frame.get("id").unwrap_or_default().to_string();
        match frame.command {
            Command::Subscribe => {
                live.insert(id, frame.get("destination").unwrap_or_default().to_string());
            }
            Command::Unsubscribe => {
                assert!(live.remove(&id).is_some(), "unsubscribe for unknown id {id}");
            }
            other => panic!("unexpected {other} frame"),
        }
        assert!(live.len() <= 1, "{live:?}");
    }
    let remaining: Vec<_> = live.into_values().collect();
    assert_eq!(remaining, vec![format!("/topic/ticket/{active}")]);
}

#[tokio::test(start_paused = true)]
async fn test_high_importance_raises_alert() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    let mut alerts = session.alerts();
    session
        .start(SessionProfile::new("7", Role::Employee))
        .await
        .unwrap();
    let mut server = connector.next_server().await.unwrap();
    let ids = subscription_ids(&mut server, 1).await;

    deliver(
        &mut server,
        &ids,
        "/topic/user/7",
        r#"{"id":"h1","type":"TICKET_CREATED","title":"Outage","message":"Email is down","importance":"HIGH","ticketId":"t9"}"#,
    );

    let alert = alerts.recv().await.unwrap();
    assert_eq!(alert.level, AlertLevel::Info);
    assert_eq!(alert.title, "Outage");
    assert_eq!(alert.ticket_id.as_deref(), Some("t9"));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnects_raise_warning() {
    let connector = MemoryConnector::new();
    connector.refuse(true);
    let session = session(&connector);
    let mut alerts = session.alerts();

    session
        .start(SessionProfile::new("7", Role::Employee))
        .await
        .unwrap();

    let first = alerts.recv().await.unwrap();
    assert_eq!(first.level, AlertLevel::Error);

    let second = alerts.recv().await.unwrap();
    assert_eq!(second.level, AlertLevel::Warning);
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_logout_resets_the_session() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    session
        .start(SessionProfile::new("7", Role::Employee).with_department("HR"))
        .await
        .unwrap();
    let mut server = connector.next_server().await.unwrap();
    let ids = subscription_ids(&mut server, 2).await;
    let mut feed = session.watch_feed();

    deliver(&mut server, &ids, "/topic/department/HR", r#"{"id":"x","type":"KNOWLEDGE_CREATED","documentId":"kb1"}"#);
    feed.changed().await.unwrap();
    session.set_active_ticket(Some("t1")).await.unwrap();

    session.logout().await.unwrap();

    assert!(session.notifications().is_empty());
    assert!(session.profile().is_none());
    assert_eq!(session.active_ticket().await, None);
    assert!(session.connection().topics().await.unwrap().is_empty());
    assert!(!session.is_connected());

    let mut saw_disconnect = false;
    while let Some(frame) = server.next_frame().await {
        saw_disconnect |= frame.command == Command::Disconnect;
    }
    assert!(saw_disconnect);

    // a fresh login on the same session starts clean
    session
        .start(SessionProfile::new("8", Role::Employee))
        .await
        .unwrap();
    let mut server = connector.next_server().await.unwrap();
    let ids = subscription_ids(&mut server, 1).await;
    assert!(ids.contains_key("/topic/user/8"));
}

#[tokio::test(start_paused = true)]
async fn test_send_publishes_json() {
    let connector = MemoryConnector::new();
    let session = session(&connector);
    session
        .start(SessionProfile::new("7", Role::Employee))
        .await
        .unwrap();
    let mut server = connector.next_server().await.unwrap();
    subscription_ids(&mut server, 1).await;

    session
        .send("/app/ticket/update", &serde_json::json!({"ticketId": "t1", "message": "on it"}))
        .await
        .unwrap();

    let frame: Frame = server.next_frame().await.unwrap();
    assert_eq!(frame.command, Command::Send);
    assert_eq!(frame.get("content-type"), Some("application/json"));
    assert!(frame.body.contains("\"on it\""));
}
