//! # checklist-collab: Live synchronization for shared checklists
//!
//! Carries `checklist-core` commands over WebSocket JSON frames and fans
//! server broadcasts out to every client viewing the same checklist.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐                     ┌─────────────────┐
//! │ ChecklistView │                     │ ChecklistServer │
//! │ (per screen)  │                     │ (authority)     │
//! └──────┬────────┘                     └──────┬──────────┘
//!        │                                     │
//!        ▼            WebSocket (JSON)         ▼
//! ┌─────────────┐ ◄─────────────────────► ┌─────────────┐
//! │ SyncClient  │                         │ ItemTree    │
//! │ (per conn)  │                         │ per list    │
//! └─────────────┘                         └──────┬──────┘
//!                                                │
//!                                        ┌───────┴───────┐
//!                                        │ BroadcastGroup│
//!                                        │ (fan-out)     │
//!                                        └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON request, response and notification frames
//! - [`broadcast`]: Per-checklist fan-out
//! - [`server`]: In-memory WebSocket checklist server
//! - [`client`]: WebSocket client with request correlation and routing
//! - [`autosave`]: Periodic flush of unsaved text edits
//! - [`view`]: One open checklist bound to a client

pub mod autosave;
pub mod broadcast;
pub mod client;
pub mod protocol;
pub mod server;
pub mod view;

// Re-exports for convenience
pub use autosave::AutosaveScheduler;
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use client::{ClientConfig, ConnectionState, PendingReply, SyncClient, SyncEvent};
pub use protocol::{Notification, ProtocolError, Request, Response, ServerMessage, MODULE};
pub use server::{Applied, ChecklistServer, ChecklistState, ServerConfig, ServerStats};
pub use view::{ChecklistView, ViewConfig, ViewError, ViewEvent};
