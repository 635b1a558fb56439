//! A checklist open on screen.
//!
//! [`ChecklistView`] owns one [`ChecklistSession`] and connects it to a
//! [`SyncClient`]: local actions run synchronously against the session and
//! their commands are written immediately afterwards; broadcasts, `addItem`
//! replies and autosave ticks come back through [`ChecklistView::next_event`].
//!
//! ```text
//!   UI ──► input/key/check/drag ──► session ──► flush ──► SyncClient
//!                                     ▲                     │
//!   UI ◄── ViewEvent ◄── next_event ──┴── broadcasts / acks ◄┘
//!                                      └── autosave ticks
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use checklist_core::{
    Broadcast, Change, CheckOutcome, ChecklistSession, ChecklistSettings, DragPreview, EditKey,
    EditOutcome, Item, ItemId, Outgoing, TextCursor, TreeError,
};

use crate::autosave::AutosaveScheduler;
use crate::client::SyncClient;
use crate::protocol::ProtocolError;

/// View configuration.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// How often unsaved text edits are sent
    pub autosave_interval: Duration,
    /// Buffered `addItem` replies
    pub ack_capacity: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(5),
            ack_capacity: 64,
        }
    }
}

/// Something the rendering layer should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// A broadcast was replayed; `changed` is false when none of it applied
    /// (stale ids, or an insert we already hold).
    Remote { broadcast: Broadcast, changed: bool },
    /// The server named a new row.
    Saved { sentinel: ItemId, id: ItemId },
    /// An `addItem` failed. The row keeps its sentinel id and commands
    /// about it stay held.
    SaveFailed { sentinel: ItemId, error: ProtocolError },
    /// Autosave pass; how many rows had their text sent.
    Autosaved(usize),
    /// The connection is gone. No further events will arrive.
    Disconnected,
}

/// Errors surfaced by view operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewError {
    /// The local action was refused by the model (unknown row, bad level).
    Model(TreeError),
    Protocol(ProtocolError),
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(e) => write!(f, "Model error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for ViewError {}

impl From<TreeError> for ViewError {
    fn from(e: TreeError) -> Self {
        Self::Model(e)
    }
}

impl From<ProtocolError> for ViewError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

type Ack = (ItemId, Result<ItemId, ProtocolError>);

pub struct ChecklistView {
    client: Arc<SyncClient>,
    session: ChecklistSession,
    broadcasts: mpsc::Receiver<Broadcast>,
    acks_tx: mpsc::Sender<Ack>,
    acks_rx: mpsc::Receiver<Ack>,
    autosave: AutosaveScheduler,
}

impl ChecklistView {
    /// Fetch a checklist, subscribe to it and start autosaving.
    ///
    /// A rejected `getCheckList` (unknown checklist, not allowed) is returned
    /// as [`ProtocolError::Rejected`] and nothing is subscribed.
    pub async fn open(client: Arc<SyncClient>, checklist_id: &str, config: ViewConfig) -> Result<Self, ViewError> {
        let checklist = client.get_check_list(checklist_id).await?;
        log::info!("Opened checklist {checklist_id} with {} items", checklist.items.len());

        let broadcasts = client.route(checklist_id).await;
        let mut session = ChecklistSession::from_checklist(checklist);
        session.open();

        let (acks_tx, acks_rx) = mpsc::channel(config.ack_capacity);
        let mut view = Self {
            client,
            session,
            broadcasts,
            acks_tx,
            acks_rx,
            autosave: AutosaveScheduler::start(config.autosave_interval),
        };
        view.flush().await?;
        Ok(view)
    }

    pub fn session(&self) -> &ChecklistSession {
        &self.session
    }

    pub fn checklist_id(&self) -> &str {
        self.session.checklist_id()
    }

    pub fn items(&self) -> &[Item] {
        self.session.items()
    }

    pub async fn input(&mut self, id: &ItemId, text: &str) -> Result<EditOutcome, ViewError> {
        let outcome = self.session.input(id, text)?;
        self.flush().await?;
        Ok(outcome)
    }

    pub async fn key(&mut self, id: &ItemId, key: EditKey, cursor: TextCursor) -> Result<EditOutcome, ViewError> {
        let outcome = self.session.key(id, key, cursor)?;
        self.flush().await?;
        Ok(outcome)
    }

    pub async fn set_checked(&mut self, id: &ItemId, checked: bool) -> Result<CheckOutcome, ViewError> {
        let outcome = self.session.set_checked(id, checked)?;
        self.flush().await?;
        Ok(outcome)
    }

    pub async fn confirm_checked_removal(&mut self) -> Result<Option<CheckOutcome>, ViewError> {
        let outcome = self.session.confirm_checked_removal()?;
        self.flush().await?;
        Ok(outcome)
    }

    pub fn cancel_checked_removal(&mut self) {
        self.session.cancel_checked_removal();
    }

    pub fn grab(&mut self, id: &ItemId, x: f64, step_width: f64) -> Result<(), ViewError> {
        Ok(self.session.grab(id, x, step_width)?)
    }

    pub fn drag_to(&mut self, before: Option<&ItemId>, x: f64) -> Option<DragPreview> {
        self.session.drag_to(before, x)
    }

    pub async fn release(&mut self) -> Result<Vec<Change>, ViewError> {
        let changes = self.session.release()?;
        self.flush().await?;
        Ok(changes)
    }

    pub fn cancel_drag(&mut self) {
        self.session.cancel_drag();
    }

    /// Save new title, remove-on-check flag and user list.
    pub async fn edit_settings(&mut self, settings: ChecklistSettings) -> Result<(), ViewError> {
        self.client.edit_check_list(self.session.checklist_id(), settings.clone()).await?;
        self.session.apply_settings(settings);
        Ok(())
    }

    /// Wait for the next broadcast, `addItem` reply or autosave tick, apply
    /// it, and send whatever it released. Dropping the future loses no
    /// queued command; anything unsent goes out with the next call.
    pub async fn next_event(&mut self) -> Result<ViewEvent, ViewError> {
        let event = tokio::select! {
            broadcast = self.broadcasts.recv() => match broadcast {
                Some(broadcast) => {
                    let changed = self.session.apply_broadcast(broadcast.clone());
                    ViewEvent::Remote { broadcast, changed }
                }
                None => return Ok(ViewEvent::Disconnected),
            },
            Some((sentinel, result)) = self.acks_rx.recv() => match result {
                Ok(id) => {
                    self.session.acknowledge(&sentinel, id.clone());
                    ViewEvent::Saved { sentinel, id }
                }
                Err(error) => {
                    log::warn!("addItem for {sentinel} failed: {error}");
                    ViewEvent::SaveFailed { sentinel, error }
                }
            },
            Some(()) = self.autosave.tick() => {
                let flushed = self.session.flush_dirty();
                if flushed > 0 {
                    log::debug!("Autosaving {flushed} rows of {}", self.session.checklist_id());
                }
                ViewEvent::Autosaved(flushed)
            }
        };
        self.flush().await?;
        Ok(event)
    }

    /// Stop autosaving and unsubscribe. Unsent text edits are dropped;
    /// requests already written still complete on the server.
    pub async fn close(mut self) -> Result<(), ViewError> {
        self.autosave.cancel();
        self.session.close();
        self.client.drop_route(self.session.checklist_id()).await;
        self.flush().await
    }

    /// Send ready commands one at a time. A command leaves the session's
    /// queue only after the client took it, so a failed send or a dropped
    /// future leaves the rest for the next flush. A future dropped while a
    /// write is in flight may send that one command again.
    async fn flush(&mut self) -> Result<(), ViewError> {
        while let Some(outgoing) = self.session.peek_outgoing().cloned() {
            match outgoing {
                Outgoing::Notify(command) => self.client.send(command).await?,
                Outgoing::Request { item, command } => {
                    let reply = self.client.dispatch(command).await?;
                    let acks = self.acks_tx.clone();
                    tokio::spawn(async move {
                        let result = SyncClient::item_id(reply).await;
                        let _ = acks.send((item, result)).await;
                    });
                }
            }
            self.session.commit_outgoing();
        }
        Ok(())
    }
}
