//! WebSocket client for the checklist server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect notification)
//! - Request/response correlation for commands that expect a reply
//! - Fire-and-forget commands
//! - Per-checklist routing of broadcast notifications
//!
//! Frames are written in the order the calls are made. There is no retry
//! and no timeout: a dropped connection fails every pending request with
//! [`ProtocolError::ConnectionClosed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use checklist_core::{Broadcast, Checklist, ChecklistSettings, Command, ItemId};

use crate::protocol::{ProtocolError, Request, Response, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the server
    pub server_url: String,
    /// Buffered frames per channel (outgoing, events, per-checklist routes)
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            channel_capacity: 256,
        }
    }
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;
type Routes = Arc<RwLock<HashMap<String, mpsc::Sender<Broadcast>>>>;

/// A request that has been written and is waiting for its response.
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Response>,
}

impl PendingReply {
    pub fn request_id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<Option<Value>, ProtocolError> {
        let response = self.rx.await.map_err(|_| ProtocolError::ConnectionClosed)?;
        response.into_result()
    }
}

/// The sync client.
pub struct SyncClient {
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    next_request: AtomicU64,
    pending: PendingReplies,
    routes: Routes,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            next_request: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            routes: Arc::new(RwLock::new(HashMap::new())),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Client for `server_url` with default settings otherwise.
    pub fn with_url(server_url: impl Into<String>) -> Self {
        Self::new(ClientConfig {
            server_url: server_url.into(),
            ..ClientConfig::default()
        })
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.config.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::error!("Failed to connect to {}: {e}", self.config.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing frames to the socket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.config.channel_capacity);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                    log::error!("WebSocket write failed: {e}");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;
        log::info!("Connected to {}", self.config.server_url);

        // Reader task: route responses and notifications
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let pending = self.pending.clone();
        let routes = self.routes.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(ServerMessage::Response(response)) => {
                            let waiter = pending.lock().await.remove(&response.response_id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                }
                                None => log::warn!("Response to unknown request {}", response.response_id),
                            }
                        }
                        Ok(ServerMessage::Notification(notification)) => {
                            let route = routes.read().await.get(&notification.check_list_id).cloned();
                            match route {
                                Some(tx) => {
                                    let _ = tx.send(notification.broadcast).await;
                                }
                                None => log::debug!(
                                    "Dropping {} for unsubscribed checklist {}",
                                    notification.broadcast.name(),
                                    notification.check_list_id
                                ),
                            }
                        }
                        Err(e) => log::warn!("Failed to decode frame: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        log::error!("WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            // Connection lost: fail pending requests, close every route
            *state.write().await = ConnectionState::Disconnected;
            pending.lock().await.clear();
            routes.write().await.clear();
            let _ = event_tx.send(SyncEvent::Disconnected).await;
            log::info!("Disconnected from server");
        });

        Ok(())
    }

    /// Write a request and return a handle to its response.
    ///
    /// The frame is queued before this returns, so requests and
    /// fire-and-forget commands keep the order in which they were issued.
    pub async fn dispatch(&self, command: Command) -> Result<PendingReply, ProtocolError> {
        let tx = self.sender().await?;
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        let text = Request::new(Some(id), command).encode()?;
        if tx.send(text).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(PendingReply { id, rx: reply_rx })
    }

    /// Send a command and wait for its response payload.
    pub async fn request(&self, command: Command) -> Result<Option<Value>, ProtocolError> {
        self.dispatch(command).await?.wait().await
    }

    /// Send a command without asking for a response.
    pub async fn send(&self, command: Command) -> Result<(), ProtocolError> {
        let tx = self.sender().await?;
        log::trace!("Sending {}", command.name());
        let text = Request::new(None, command).encode()?;
        tx.send(text).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Route broadcasts for `checklist_id` to the returned receiver without
    /// telling the server. Replaces any earlier route for the same id.
    pub async fn route(&self, checklist_id: &str) -> mpsc::Receiver<Broadcast> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.routes.write().await.insert(checklist_id.to_string(), tx);
        rx
    }

    /// Stop routing broadcasts for `checklist_id`.
    pub async fn drop_route(&self, checklist_id: &str) -> bool {
        self.routes.write().await.remove(checklist_id).is_some()
    }

    /// Start receiving live updates for a checklist (`onCheckList`).
    pub async fn subscribe(&self, checklist_id: &str) -> Result<mpsc::Receiver<Broadcast>, ProtocolError> {
        let rx = self.route(checklist_id).await;
        self.send(Command::OnCheckList { check_list_id: checklist_id.to_string() }).await?;
        log::info!("Subscribed to checklist {checklist_id}");
        Ok(rx)
    }

    /// Stop receiving live updates for a checklist (`offCheckList`).
    pub async fn unsubscribe(&self, checklist_id: &str) -> Result<(), ProtocolError> {
        self.drop_route(checklist_id).await;
        self.send(Command::OffCheckList { check_list_id: checklist_id.to_string() }).await
    }

    pub async fn get_check_list(&self, checklist_id: &str) -> Result<Checklist, ProtocolError> {
        let data = self
            .request(Command::GetCheckList { id: checklist_id.to_string() })
            .await?
            .ok_or_else(|| ProtocolError::UnexpectedReply("getCheckList returned no data".into()))?;
        serde_json::from_value(data).map_err(|e| ProtocolError::UnexpectedReply(e.to_string()))
    }

    pub async fn edit_check_list(&self, checklist_id: &str, settings: ChecklistSettings) -> Result<(), ProtocolError> {
        self.request(Command::EditCheckList {
            id: checklist_id.to_string(),
            title: settings.title,
            remove_on_check: settings.remove_on_check,
            users: settings.users,
        })
        .await
        .map(|_| ())
    }

    /// Wait for an `addItem` response and read the new item's id from it.
    pub async fn item_id(reply: PendingReply) -> Result<ItemId, ProtocolError> {
        match reply.wait().await? {
            Some(Value::String(id)) => Ok(ItemId::saved(id)),
            other => Err(ProtocolError::UnexpectedReply(format!("addItem returned {other:?}"))),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    /// Requests still waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn sender(&self) -> Result<mpsc::Sender<String>, ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        self.outgoing_tx.clone().ok_or(ProtocolError::NotConnected)
    }
}
