//! # checklist-core: Outline editing engine for shared checklists
//!
//! Pure, synchronous model of one checklist: a flat ordered list of items
//! whose `level` encodes the hierarchy, plus the editing and drag state
//! machines that mutate it and the command set that keeps replicas in step.
//! Nothing here does I/O; `checklist-collab` drives it over the network.
//!
//! ## Data flow
//!
//! ```text
//!  key / input / pointer
//!          │
//!          ▼
//! ┌──────────────────┐   Change    ┌──────────────┐   Outgoing   ┌───────────┐
//! │ editor / drag    │ ──────────► │ session      │ ───────────► │ transport │
//! │ (state machines) │             │ (Outbox)     │              └─────┬─────┘
//! └────────┬─────────┘             └──────▲───────┘                    │
//!          │ mutate                       │ Broadcast                  │
//!          ▼                              │                            │
//! ┌──────────────────┐  apply_*           │                            │
//! │ tree (ItemTree)  │ ◄──────────────────┴────────────────────────────┘
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`item`]: Item, ItemId and checklist records
//! - [`tree`]: Flattened outline with the level invariant
//! - [`level`]: Indent/outdent arithmetic
//! - [`drag`]: Drag-reorder controller
//! - [`editor`]: Enter / Backspace / Delete / indent across rows
//! - [`command`]: Command and broadcast unions, outbound queue
//! - [`session`]: One open checklist on one client

pub mod command;
pub mod drag;
pub mod editor;
pub mod item;
pub mod level;
pub mod session;
pub mod tree;

// Re-exports for convenience
pub use command::{Broadcast, Change, Command, Outbox, Outgoing};
pub use drag::{DragController, DragPreview, DragState};
pub use editor::{EditKey, EditOutcome, Focus, TextCursor};
pub use item::{Checklist, ChecklistSettings, Item, ItemId, UNSAVED_ID};
pub use level::{Direction, LevelBounds, LevelShift};
pub use session::{CheckOutcome, ChecklistSession};
pub use tree::{ItemTree, TreeError};
