//! Per-checklist fan-out.
//!
//! Every checklist with at least one subscriber has a [`BroadcastGroup`]:
//! a tokio broadcast channel carrying pre-encoded notification frames. Each
//! subscribed connection holds its own receiver. The originator of a change
//! is a subscriber like any other and receives its own broadcast back.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{Notification, ProtocolError};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// Subscribers of a single checklist.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<String>>,
    /// Connections subscribed to this checklist
    peers: RwLock<HashSet<Uuid>>,
    capacity: usize,
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// `capacity` is how many frames a slow subscriber may lag behind before
    /// it starts losing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashSet::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Subscribe a connection. Returns its receiver.
    pub async fn add_peer(&self, connection: Uuid) -> broadcast::Receiver<Arc<String>> {
        self.peers.write().await.insert(connection);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, connection: &Uuid) -> bool {
        self.peers.write().await.remove(connection)
    }

    /// Encode once and send to every subscriber. Returns the receiver count.
    pub fn broadcast(&self, notification: &Notification) -> Result<usize, ProtocolError> {
        let encoded = Arc::new(notification.encode()?);
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, connection: &Uuid) -> bool {
        self.peers.read().await.contains(connection)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps checklist ids to their broadcast groups.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the room for a checklist.
    pub async fn get_or_create(&self, checklist_id: &str) -> Arc<BroadcastGroup> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(checklist_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(checklist_id.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    /// Room of a checklist nobody may be watching.
    pub async fn get(&self, checklist_id: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(checklist_id).cloned()
    }

    /// Drop the room once its last subscriber is gone.
    pub async fn remove_if_empty(&self, checklist_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(checklist_id) {
            if room.peer_count().await == 0 {
                rooms.remove(checklist_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
