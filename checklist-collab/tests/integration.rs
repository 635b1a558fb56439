//! Integration tests for end-to-end checklist synchronization.
//!
//! These tests start a real server and connect real clients,
//! verifying the full command → apply → broadcast pipeline.

use checklist_collab::client::{ConnectionState, SyncClient, SyncEvent};
use checklist_collab::protocol::ProtocolError;
use checklist_collab::server::{ChecklistServer, ServerConfig};
use checklist_collab::view::{ChecklistView, ViewConfig, ViewError, ViewEvent};
use checklist_core::{
    Broadcast, CheckOutcome, Checklist, ChecklistSettings, Command, EditKey, Item, ItemId, TextCursor,
};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return a handle to it and the port.
async fn start_test_server() -> (ChecklistServer, u16) {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
    };
    let server = ChecklistServer::new(config);
    let running = server.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, port)
}

async fn connect(port: u16) -> Arc<SyncClient> {
    let mut client = SyncClient::with_url(format!("ws://127.0.0.1:{port}"));
    client.connect().await.unwrap();
    Arc::new(client)
}

/// `[(a, 0, "Buy milk"), (b, 1, "2%"), (c, 0, "Call Bob")]`
async fn seed_groceries(server: &ChecklistServer, remove_on_check: bool) -> String {
    let settings = ChecklistSettings {
        title: "Groceries".into(),
        remove_on_check,
        users: vec!["sam".into()],
    };
    let mut checklist = Checklist::new("groceries", settings);
    checklist.items = vec![
        Item::new("a", "Buy milk", 0),
        Item::new("b", "2%", 1),
        Item::new("c", "Call Bob", 0),
    ];
    server.import_checklist(checklist).await
}

/// Process events until none arrives for a while.
async fn drain(view: &mut ChecklistView) -> Vec<ViewEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = timeout(Duration::from_millis(200), view.next_event()).await {
        events.push(event);
    }
    events
}

fn shape(items: &[Item]) -> Vec<(String, u32)> {
    items.iter().map(|item| (item.id.to_string(), item.level)).collect()
}

fn id(id: &str) -> ItemId {
    ItemId::saved(id)
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (_server, port) = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    // Connect raw WebSocket
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_client_connects() {
    let (_server, port) = start_test_server().await;
    let mut client = SyncClient::with_url(format!("ws://127.0.0.1:{port}"));
    let mut event_rx = client.take_event_rx().unwrap();

    client.connect().await.unwrap();

    let event = timeout(Duration::from_secs(2), event_rx.recv()).await;
    match event.unwrap() {
        Some(SyncEvent::Connected) => {}
        other => panic!("Expected Connected event, got {other:?}"),
    }
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_get_check_list() {
    let (server, port) = start_test_server().await;
    let checklist_id = seed_groceries(&server, false).await;
    let client = connect(port).await;

    let checklist = client.get_check_list(&checklist_id).await.unwrap();
    assert_eq!(checklist.title, "Groceries");
    assert_eq!(checklist.users, vec!["sam".to_string()]);
    assert_eq!(shape(&checklist.items), shape(&server.checklist(&checklist_id).await.unwrap().items));
}

#[tokio::test]
async fn test_unknown_checklist_is_rejected() {
    let (server, port) = start_test_server().await;
    let client = connect(port).await;

    let result = client.get_check_list("nope").await;
    assert!(matches!(result, Err(ProtocolError::Rejected(_))), "got {result:?}");

    let opened = ChecklistView::open(client.clone(), "nope", ViewConfig::default()).await;
    assert!(matches!(opened, Err(ViewError::Protocol(ProtocolError::Rejected(_)))));
    assert_eq!(server.stats().await.rejected_requests, 2);
}

#[tokio::test]
async fn test_add_item_replies_and_broadcasts() {
    let (server, port) = start_test_server().await;
    let checklist_id = seed_groceries(&server, false).await;
    let client = connect(port).await;
    let mut broadcasts = client.subscribe(&checklist_id).await.unwrap();

    let reply = client
        .dispatch(Command::AddItem {
            check_list_id: checklist_id.clone(),
            checked: false,
            text: "Eggs".into(),
            level: 0,
            before_id: Some(id("c")),
        })
        .await
        .unwrap();
    let new_id = SyncClient::item_id(reply).await.unwrap();
    assert!(!new_id.is_unsaved());

    // The originator receives its own broadcast
    let broadcast = timeout(Duration::from_secs(2), broadcasts.recv()).await.unwrap().unwrap();
    assert_eq!(
        broadcast,
        Broadcast::AddItem {
            id: new_id.clone(),
            checked: false,
            text: "Eggs".into(),
            level: 0,
            before_id: Some(id("c")),
        }
    );

    let items = server.checklist(&checklist_id).await.unwrap().items;
    assert_eq!(items[2].id, new_id);
    assert_eq!(items[3].id, id("c"));
}

#[tokio::test]
async fn test_drag_split_and_indent_converge() {
    let (server, port) = start_test_server().await;
    let checklist_id = seed_groceries(&server, false).await;

    let mut alice = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();
    let mut bob = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();
    // Let both subscriptions land
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Drag a (with b) below c, pushed one level right
    alice.grab(&id("a"), 100.0, 16.0).unwrap();
    let preview = alice.drag_to(None, 120.0).unwrap();
    assert_eq!(preview.level, 1);
    alice.release().await.unwrap();
    assert_eq!(shape(alice.items()), vec![("c".into(), 0), ("a".into(), 1), ("b".into(), 2)]);

    let event = timeout(Duration::from_secs(2), bob.next_event()).await.unwrap().unwrap();
    assert_eq!(
        event,
        ViewEvent::Remote {
            broadcast: Broadcast::UpdateLevels { items: vec![(id("a"), 1), (id("b"), 2)] },
            changed: true,
        }
    );

    // Enter at the end of a, then indent the new row before the server named it
    let outcome = alice.key(&id("a"), EditKey::Enter, TextCursor::at("Buy milk".len())).await.unwrap();
    let sentinel = outcome.focus.unwrap().id;
    assert!(sentinel.is_unsaved());
    alice.key(&sentinel, EditKey::Indent, TextCursor::at(0)).await.unwrap();
    assert_eq!(alice.session().held_commands(), 1);

    let events = drain(&mut alice).await;
    let saved = events.iter().find_map(|event| match event {
        ViewEvent::Saved { sentinel: s, id } if *s == sentinel => Some(id.clone()),
        _ => None,
    });
    let new_id = saved.expect("addItem should be acknowledged");
    assert_eq!(alice.session().held_commands(), 0);
    drain(&mut bob).await;

    let expected = vec![
        ("c".to_string(), 0),
        ("a".to_string(), 1),
        (new_id.to_string(), 2),
        ("b".to_string(), 3),
    ];
    assert_eq!(shape(alice.items()), expected);
    assert_eq!(shape(bob.items()), expected);
    assert_eq!(shape(&server.checklist(&checklist_id).await.unwrap().items), expected);
}

#[tokio::test]
async fn test_autosave_sends_typed_text() {
    let (server, port) = start_test_server().await;
    let checklist_id = seed_groceries(&server, false).await;
    let fast = ViewConfig { autosave_interval: Duration::from_millis(100), ..ViewConfig::default() };

    let mut alice = ChecklistView::open(connect(port).await, &checklist_id, fast.clone()).await.unwrap();
    let mut bob = ChecklistView::open(connect(port).await, &checklist_id, fast).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice.input(&id("a"), "Buy oat milk").await.unwrap();
    assert!(alice.session().is_dirty(&id("a")));

    // Typing alone sends nothing; the next autosave tick does
    let event = timeout(Duration::from_secs(2), alice.next_event()).await.unwrap().unwrap();
    assert_eq!(event, ViewEvent::Autosaved(1));
    assert!(!alice.session().is_dirty(&id("a")));

    let mut received = None;
    while received.is_none() {
        match timeout(Duration::from_secs(2), bob.next_event()).await.unwrap().unwrap() {
            ViewEvent::Remote { broadcast: Broadcast::UpdateText { id, text }, .. } => received = Some((id, text)),
            _ => continue,
        }
    }
    assert_eq!(received, Some((id("a"), "Buy oat milk".to_string())));
    assert_eq!(bob.items()[0].text, "Buy oat milk");
    assert_eq!(server.checklist(&checklist_id).await.unwrap().items[0].text, "Buy oat milk");
}

#[tokio::test]
async fn test_remove_on_check_removes_everywhere() {
    let (server, port) = start_test_server().await;
    let checklist_id = seed_groceries(&server, true).await;

    let mut alice = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();
    let mut bob = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = alice.set_checked(&id("a"), true).await.unwrap();
    assert_eq!(outcome, CheckOutcome::NeedsConfirmation { count: 2 });
    assert_eq!(alice.items().len(), 3);

    let confirmed = alice.confirm_checked_removal().await.unwrap();
    assert_eq!(confirmed, Some(CheckOutcome::Removed { ids: vec![id("a"), id("b")] }));

    let event = timeout(Duration::from_secs(2), bob.next_event()).await.unwrap().unwrap();
    assert_eq!(
        event,
        ViewEvent::Remote { broadcast: Broadcast::UpdateChecked { id: id("a"), checked: true }, changed: true }
    );
    assert_eq!(shape(bob.items()), vec![("c".into(), 0)]);
    assert_eq!(shape(&server.checklist(&checklist_id).await.unwrap().items), vec![("c".into(), 0)]);
}

#[tokio::test]
async fn test_edit_settings() {
    let (server, port) = start_test_server().await;
    let checklist_id = seed_groceries(&server, false).await;
    let mut view = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();

    let settings = ChecklistSettings {
        title: "Weekend".into(),
        remove_on_check: true,
        users: vec!["sam".into(), "kim".into()],
    };
    view.edit_settings(settings.clone()).await.unwrap();

    assert_eq!(view.session().settings(), &settings);
    let stored = server.checklist(&checklist_id).await.unwrap();
    assert_eq!(stored.settings(), settings);
}

#[tokio::test]
async fn test_close_unsubscribes() {
    let (server, port) = start_test_server().await;
    let checklist_id = seed_groceries(&server, false).await;

    let alice = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();
    let bob = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let room = server.room_manager().get(&checklist_id).await.unwrap();
    assert_eq!(room.peer_count().await, 2);

    bob.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(room.peer_count().await, 1);

    alice.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.room_manager().get(&checklist_id).await.is_none());
}

#[tokio::test]
async fn test_empty_checklist_gets_first_row() {
    let (server, port) = start_test_server().await;
    let checklist_id = server.create_checklist(ChecklistSettings::default()).await;

    let mut view = ChecklistView::open(connect(port).await, &checklist_id, ViewConfig::default()).await.unwrap();
    assert_eq!(view.items().len(), 1);
    assert!(view.items()[0].id.is_unsaved());

    drain(&mut view).await;
    assert!(!view.items()[0].id.is_unsaved());
    assert_eq!(view.items().len(), 1);
    let stored = server.checklist(&checklist_id).await.unwrap();
    assert_eq!(stored.items[0].id, view.items()[0].id);
}
