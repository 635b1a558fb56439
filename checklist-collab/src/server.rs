//! In-memory checklist server.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── ChecklistState (id) ── ItemTree ── BroadcastGroup
//! Client B ──┘                                          │
//!                                          ┌────────────┼────────────┐
//!                                          ▼            ▼            ▼
//!                                       Client A     Client B     Client C
//! ```
//!
//! Commands are applied to the authoritative tree under one write lock and
//! the resulting broadcast is sent before the lock is released, so every
//! subscriber sees changes in the order they were applied. A request's
//! response is written before any broadcast it caused.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use checklist_core::level;
use checklist_core::{Broadcast, Checklist, ChecklistSettings, Command, Item, ItemId, ItemTree};

use crate::broadcast::RoomManager;
use crate::protocol::{Notification, Request, Response};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per checklist
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub rejected_requests: u64,
}

/// Outcome of applying one command to a checklist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// Response payload for requests that carry an id
    pub data: Option<Value>,
    /// What every subscriber should receive
    pub broadcast: Option<Broadcast>,
}

/// Authoritative copy of one checklist.
#[derive(Debug, Clone)]
pub struct ChecklistState {
    id: String,
    settings: ChecklistSettings,
    tree: ItemTree,
}

impl ChecklistState {
    pub fn new(id: impl Into<String>, settings: ChecklistSettings) -> Self {
        Self {
            id: id.into(),
            settings,
            tree: ItemTree::new(),
        }
    }

    pub fn from_checklist(checklist: Checklist) -> Self {
        let settings = checklist.settings();
        Self {
            id: checklist.id,
            settings,
            tree: ItemTree::from_items(checklist.items),
        }
    }

    pub fn items(&self) -> &[Item] {
        self.tree.items()
    }

    pub fn snapshot(&self) -> Checklist {
        let mut checklist = Checklist::new(self.id.clone(), self.settings.clone());
        checklist.items = self.tree.items().to_vec();
        checklist
    }

    /// Apply a command. Ids that no longer exist are skipped without a
    /// broadcast, since a remove from another client may have won the race.
    pub fn apply(&mut self, command: Command) -> Applied {
        match command {
            Command::AddItem { checked, text, level, before_id, .. } => {
                let id = ItemId::saved(Uuid::new_v4().to_string());
                let item = Item { id: id.clone(), text: text.clone(), checked, level };
                self.tree.apply_insert(item, before_id.as_ref());
                Applied {
                    data: id.as_saved().map(|id| Value::String(id.to_string())),
                    broadcast: Some(Broadcast::AddItem { id, checked, text, level, before_id }),
                }
            }
            Command::UpdateText { id, text, .. } => {
                let applied = self.tree.set_text(&id, text.clone()).is_ok();
                self.changed(applied, Broadcast::UpdateText { id, text })
            }
            Command::UpdateChecked { id, checked, .. } => {
                let applied = if self.settings.remove_on_check && checked {
                    self.tree.remove_with_descendants(&id).is_ok()
                } else {
                    self.tree.set_checked(&id, checked).is_ok()
                };
                self.changed(applied, Broadcast::UpdateChecked { id, checked })
            }
            Command::UpdateLevel { id, level, .. } => match self.tree.index_of(&id) {
                Some(index) => {
                    // The row carries its descendant run; levels are written as
                    // sent because a drag may put the row in its new slot next.
                    let delta = level as i64 - self.tree.items()[index].level as i64;
                    let run = index..self.tree.descendant_range(index).end;
                    let items: Vec<(ItemId, u32)> = self.tree.items()[run]
                        .iter()
                        .map(|item| (item.id.clone(), level::offset_level(item.level, delta)))
                        .collect();
                    self.tree.apply_levels(&items);
                    Applied { data: None, broadcast: Some(Broadcast::UpdateLevels { items }) }
                }
                None => self.changed(false, Broadcast::UpdateLevels { items: Vec::new() }),
            },
            Command::RemoveItem { id, .. } => {
                let applied = self.tree.remove(&id).is_ok();
                self.changed(applied, Broadcast::RemoveItem { id })
            }
            Command::ReinsertItem { id, before_id, .. } => match self.tree.index_of(&id) {
                Some(index) => {
                    let run = index..self.tree.descendant_range(index).end;
                    let ids: Vec<ItemId> = self.tree.items()[run].iter().map(|item| item.id.clone()).collect();
                    self.tree.apply_reinsert(&ids, before_id.as_ref());
                    Applied { data: None, broadcast: Some(Broadcast::ReinsertItems { ids, before_id }) }
                }
                None => self.changed(false, Broadcast::ReinsertItems { ids: Vec::new(), before_id }),
            },
            Command::GetCheckList { .. } => Applied {
                data: serde_json::to_value(self.snapshot()).ok(),
                broadcast: None,
            },
            Command::EditCheckList { title, remove_on_check, users, .. } => {
                self.settings = ChecklistSettings { title, remove_on_check, users };
                Applied::default()
            }
            Command::OnCheckList { .. } | Command::OffCheckList { .. } => Applied::default(),
        }
    }

    fn changed(&self, applied: bool, broadcast: Broadcast) -> Applied {
        if !applied {
            log::debug!("Skipping stale {} on checklist {}", broadcast.name(), self.id);
        }
        Applied {
            data: None,
            broadcast: applied.then_some(broadcast),
        }
    }
}

type Store = Arc<RwLock<HashMap<String, ChecklistState>>>;

/// The checklist server.
#[derive(Clone)]
pub struct ChecklistServer {
    config: ServerConfig,
    /// Checklists by id
    checklists: Store,
    /// Subscribers by checklist id
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl ChecklistServer {
    pub fn new(config: ServerConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            checklists: Arc::new(RwLock::new(HashMap::new())),
            room_manager,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Create an empty checklist and return its id.
    pub async fn create_checklist(&self, settings: ChecklistSettings) -> String {
        let id = Uuid::new_v4().to_string();
        self.checklists
            .write()
            .await
            .insert(id.clone(), ChecklistState::new(id.clone(), settings));
        log::info!("Created checklist {id}");
        id
    }

    /// Store a checklist as given, replacing any with the same id.
    pub async fn import_checklist(&self, checklist: Checklist) -> String {
        let id = checklist.id.clone();
        log::info!("Imported checklist {id} with {} items", checklist.items.len());
        self.checklists
            .write()
            .await
            .insert(id.clone(), ChecklistState::from_checklist(checklist));
        id
    }

    /// Current contents of a checklist.
    pub async fn checklist(&self, id: &str) -> Option<Checklist> {
        self.checklists.read().await.get(id).map(ChecklistState::snapshot)
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Checklist server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let connection = Uuid::new_v4();
        log::info!("WebSocket connection {connection} established from {addr}");
        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Broadcast frames from every subscribed checklist funnel into one queue.
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Arc<String>>(self.config.broadcast_capacity);
        let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.stats.write().await.total_messages += 1;
                        let request = match Request::decode(text.as_str()) {
                            Ok(request) => request,
                            Err(e) => {
                                log::warn!("Failed to decode request from {addr}: {e}");
                                continue;
                            }
                        };
                        if let Some(response) = self.handle_request(connection, request, &outbound_tx, &mut subscriptions).await {
                            let text = match serde_json::to_string(&response) {
                                Ok(text) => text,
                                Err(e) => break Err(e.into()),
                            };
                            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                                break Err(e.into());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection {connection} closed from {addr}");
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break Ok(());
                    }
                    _ => {}
                },

                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = ws_sender.send(Message::Text(frame.to_string().into())).await {
                        break Err(e.into());
                    }
                }
            }
        };

        // Cleanup: leave every checklist this connection watched
        for (checklist_id, forwarder) in subscriptions {
            self.leave(connection, &checklist_id, forwarder).await;
        }
        self.stats.write().await.active_connections -= 1;

        result
    }

    /// Apply one request. Returns the response to write, if the request
    /// asked for one.
    async fn handle_request(
        &self,
        connection: Uuid,
        request: Request,
        outbound: &mpsc::Sender<Arc<String>>,
        subscriptions: &mut HashMap<String, JoinHandle<()>>,
    ) -> Option<Response> {
        let Request { id: request_id, command, .. } = request;
        let checklist_id = command.checklist_id().to_string();
        log::debug!("{} on checklist {checklist_id} from {connection}", command.name());

        if !self.checklists.read().await.contains_key(&checklist_id) {
            log::warn!("Rejecting {} for unknown checklist {checklist_id}", command.name());
            self.stats.write().await.rejected_requests += 1;
            return request_id.map(|id| Response::err(id, format!("unknown checklist {checklist_id}")));
        }

        let data = match command {
            Command::OnCheckList { .. } => {
                if !subscriptions.contains_key(&checklist_id) {
                    let forwarder = self.join(connection, &checklist_id, outbound.clone()).await;
                    subscriptions.insert(checklist_id, forwarder);
                }
                None
            }
            Command::OffCheckList { .. } => {
                if let Some(forwarder) = subscriptions.remove(&checklist_id) {
                    self.leave(connection, &checklist_id, forwarder).await;
                }
                None
            }
            command => {
                let mut checklists = self.checklists.write().await;
                let state = checklists.get_mut(&checklist_id)?;
                let applied = state.apply(command);
                if let Some(broadcast) = applied.broadcast {
                    if let Some(room) = self.room_manager.get(&checklist_id).await {
                        if let Err(e) = room.broadcast(&Notification::new(checklist_id.as_str(), broadcast)) {
                            log::error!("Failed to broadcast on {checklist_id}: {e}");
                        }
                    }
                }
                applied.data
            }
        };

        request_id.map(|id| Response::ok(id, data))
    }

    /// Subscribe a connection and spawn the task copying the checklist's
    /// broadcasts into the connection's outbound queue.
    async fn join(&self, connection: Uuid, checklist_id: &str, outbound: mpsc::Sender<Arc<String>>) -> JoinHandle<()> {
        let room = self.room_manager.get_or_create(checklist_id).await;
        let mut rx = room.add_peer(connection).await;
        log::info!("Connection {connection} subscribed to {checklist_id}");

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if outbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Connection {connection} lagged by {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn leave(&self, connection: Uuid, checklist_id: &str, forwarder: JoinHandle<()>) {
        forwarder.abort();
        if let Some(room) = self.room_manager.get(checklist_id).await {
            room.remove_peer(&connection).await;
        }
        if self.room_manager.remove_if_empty(checklist_id).await {
            log::debug!("Room {checklist_id} removed (empty)");
        }
        log::info!("Connection {connection} unsubscribed from {checklist_id}");
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get room manager reference.
    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(items: &[(&str, u32)]) -> ChecklistState {
        let mut state = ChecklistState::new("L", ChecklistSettings::default());
        state.tree = ItemTree::from_items(items.iter().map(|(id, level)| Item::new(*id, *id, *level)).collect());
        state
    }

    fn layout(state: &ChecklistState) -> Vec<(String, u32)> {
        state.items().iter().map(|item| (item.id.to_string(), item.level)).collect()
    }

    fn owned(rows: &[(&str, u32)]) -> Vec<(String, u32)> {
        rows.iter().map(|(id, level)| (id.to_string(), *level)).collect()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_add_item_assigns_id() {
        let mut state = state(&[("a", 0)]);
        let applied = state.apply(Command::AddItem {
            check_list_id: "L".into(),
            checked: false,
            text: "new".into(),
            level: 0,
            before_id: Some("a".into()),
        });

        let Some(Value::String(id)) = applied.data else {
            panic!("addItem must reply with an id");
        };
        assert_eq!(state.items()[0].id, ItemId::saved(id.clone()));
        assert_eq!(
            applied.broadcast,
            Some(Broadcast::AddItem {
                id: ItemId::saved(id),
                checked: false,
                text: "new".into(),
                level: 0,
                before_id: Some("a".into()),
            })
        );
    }

    #[test]
    fn test_update_level_carries_descendants() {
        let mut state = state(&[("a", 0), ("b", 0), ("c", 1), ("d", 0)]);
        let applied = state.apply(Command::UpdateLevel { check_list_id: "L".into(), id: "b".into(), level: 1 });

        assert_eq!(layout(&state), owned(&[("a", 0), ("b", 1), ("c", 2), ("d", 0)]));
        assert_eq!(
            applied.broadcast,
            Some(Broadcast::UpdateLevels { items: vec![("b".into(), 1), ("c".into(), 2)] })
        );
    }

    #[test]
    fn test_reinsert_moves_run() {
        let mut state = state(&[("a", 0), ("b", 1), ("c", 0)]);
        let applied = state.apply(Command::ReinsertItem { check_list_id: "L".into(), id: "a".into(), before_id: None });

        assert_eq!(layout(&state), owned(&[("c", 0), ("a", 0), ("b", 1)]));
        assert_eq!(
            applied.broadcast,
            Some(Broadcast::ReinsertItems { ids: vec!["a".into(), "b".into()], before_id: None })
        );
    }

    #[test]
    fn test_drag_sequence_matches_client() {
        // Level then move, the order a client sends after indenting a row
        // while dragging it below its neighbour.
        let mut state = state(&[("a", 0), ("b", 1), ("c", 0)]);
        state.apply(Command::UpdateLevel { check_list_id: "L".into(), id: "a".into(), level: 1 });
        state.apply(Command::ReinsertItem { check_list_id: "L".into(), id: "a".into(), before_id: None });

        assert_eq!(layout(&state), owned(&[("c", 0), ("a", 1), ("b", 2)]));
    }

    #[test]
    fn test_client_converges_when_echo_beats_reply() {
        use checklist_core::{ChecklistSession, EditKey, Outgoing, TextCursor};

        let mut state = state(&[("a", 0), ("z", 0)]);
        let mut client = ChecklistSession::from_checklist(state.snapshot());
        let sentinel = client.key(&"a".into(), EditKey::Enter, TextCursor::at(1)).unwrap().focus.unwrap().id;

        let mut reply = None;
        for outgoing in client.take_outgoing() {
            let request = matches!(outgoing, Outgoing::Request { .. });
            let applied = state.apply(outgoing.command().clone());
            if let Some(broadcast) = applied.broadcast {
                client.apply_broadcast(broadcast);
            }
            if request {
                reply = applied.data;
            }
        }
        let Some(Value::String(new_id)) = reply else {
            panic!("addItem must reply with an id");
        };

        // Another client inserts in front of the new row before our reply lands.
        let other = state.apply(Command::AddItem {
            check_list_id: "L".into(),
            checked: false,
            text: "theirs".into(),
            level: 0,
            before_id: Some(new_id.clone().into()),
        });
        client.apply_broadcast(other.broadcast.unwrap());
        client.acknowledge(&sentinel, ItemId::saved(new_id));

        assert_eq!(layout(&state).len(), 4);
        let client_layout: Vec<(String, u32)> =
            client.items().iter().map(|item| (item.id.to_string(), item.level)).collect();
        assert_eq!(client_layout, layout(&state));
    }

    #[test]
    fn test_check_propagates_or_removes() {
        let mut state = state(&[("a", 0), ("b", 1), ("c", 0)]);
        state.apply(Command::UpdateChecked { check_list_id: "L".into(), id: "a".into(), checked: true });
        assert!(state.items()[0].checked && state.items()[1].checked && !state.items()[2].checked);

        state.settings.remove_on_check = true;
        let applied = state.apply(Command::UpdateChecked { check_list_id: "L".into(), id: "a".into(), checked: true });
        assert_eq!(layout(&state), owned(&[("c", 0)]));
        assert!(applied.broadcast.is_some());
    }

    #[test]
    fn test_remove_repairs_orphans() {
        let mut state = state(&[("a", 0), ("b", 1), ("c", 2)]);
        state.apply(Command::RemoveItem { check_list_id: "L".into(), id: "a".into() });
        assert_eq!(layout(&state), owned(&[("b", 0), ("c", 1)]));
    }

    #[test]
    fn test_stale_ids_are_skipped() {
        let mut state = state(&[("a", 0)]);
        for command in [
            Command::UpdateText { check_list_id: "L".into(), id: "x".into(), text: "t".into() },
            Command::UpdateLevel { check_list_id: "L".into(), id: "x".into(), level: 1 },
            Command::RemoveItem { check_list_id: "L".into(), id: "x".into() },
            Command::ReinsertItem { check_list_id: "L".into(), id: "x".into(), before_id: None },
        ] {
            assert_eq!(state.apply(command), Applied::default());
        }
        assert_eq!(layout(&state), owned(&[("a", 0)]));
    }

    #[test]
    fn test_get_and_edit_checklist() {
        let mut state = state(&[("a", 0)]);
        state.apply(Command::EditCheckList {
            id: "L".into(),
            title: "Groceries".into(),
            remove_on_check: true,
            users: vec!["sam".into()],
        });

        let data = state.apply(Command::GetCheckList { id: "L".into() }).data.unwrap();
        let checklist: Checklist = serde_json::from_value(data).unwrap();
        assert_eq!(checklist.title, "Groceries");
        assert!(checklist.remove_on_check);
        assert_eq!(checklist.items.len(), 1);
    }

    #[tokio::test]
    async fn test_create_checklist() {
        let server = ChecklistServer::with_defaults();
        let id = server
            .create_checklist(ChecklistSettings { title: "Trip".into(), ..ChecklistSettings::default() })
            .await;
        let checklist = server.checklist(&id).await.unwrap();
        assert_eq!(checklist.title, "Trip");
        assert!(checklist.items.is_empty());
        assert!(server.checklist("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_import_checklist() {
        let server = ChecklistServer::with_defaults();
        let mut checklist = Checklist::new("groceries", ChecklistSettings::default());
        checklist.items = vec![Item::new("a", "Buy milk", 0), Item::new("b", "2%", 1)];

        let id = server.import_checklist(checklist.clone()).await;
        assert_eq!(id, "groceries");
        assert_eq!(server.checklist(&id).await, Some(checklist));
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = ChecklistServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(server.room_manager().room_count().await, 0);
    }
}
