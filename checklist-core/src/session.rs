//! One open checklist on one client.
//!
//! [`ChecklistSession`] owns the item tree and routes every local action
//! through the editor or the drag controller, turning the resulting
//! [`Change`]s into queued [`Command`]s. Remote [`Broadcast`]s are replayed
//! leniently: anything that no longer matches the local model is skipped.
//! The session does no I/O; callers drain [`ChecklistSession::take_outgoing`].

use std::collections::BTreeSet;

use crate::command::{Broadcast, Change, Command, Outbox, Outgoing};
use crate::drag::{DragController, DragPreview, DragState};
use crate::editor::{self, EditKey, EditOutcome, TextCursor};
use crate::item::{Checklist, ChecklistSettings, Item, ItemId};
use crate::tree::{ItemTree, TreeError};

/// Result of toggling a checkbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// `count` rows (the item and its descendants) changed state.
    Updated { count: usize },
    /// The rows were deleted because the checklist removes on check.
    Removed { ids: Vec<ItemId> },
    /// Deleting would take `count` rows; call
    /// [`ChecklistSession::confirm_checked_removal`] to go ahead.
    NeedsConfirmation { count: usize },
}

#[derive(Debug)]
pub struct ChecklistSession {
    checklist_id: String,
    settings: ChecklistSettings,
    tree: ItemTree,
    drag: DragController,
    /// Rows with text edits not yet sent.
    dirty: BTreeSet<ItemId>,
    pending_removal: Option<ItemId>,
    outbox: Outbox,
}

impl ChecklistSession {
    /// Start from a fetched checklist. An empty checklist gets one blank row
    /// right away so there is something to type into.
    pub fn from_checklist(checklist: Checklist) -> Self {
        let settings = checklist.settings();
        let mut session = Self {
            checklist_id: checklist.id,
            settings,
            tree: ItemTree::from_items(checklist.items),
            drag: DragController::new(),
            dirty: BTreeSet::new(),
            pending_removal: None,
            outbox: Outbox::new(),
        };
        if session.tree.is_empty() {
            match session.tree.insert_unsaved("", false, 0, None) {
                Ok(id) => session.queue(Change::Added(id)),
                Err(e) => log::warn!("Could not seed empty checklist: {e}"),
            }
        }
        session
    }

    pub fn checklist_id(&self) -> &str {
        &self.checklist_id
    }

    pub fn settings(&self) -> &ChecklistSettings {
        &self.settings
    }

    pub fn tree(&self) -> &ItemTree {
        &self.tree
    }

    pub fn items(&self) -> &[Item] {
        self.tree.items()
    }

    pub fn is_dirty(&self, id: &ItemId) -> bool {
        self.dirty.contains(id)
    }

    pub fn drag_state(&self) -> DragState {
        self.drag.state()
    }

    /// Subscribe to live updates for this checklist.
    pub fn open(&mut self) {
        self.outbox.notify(Command::OnCheckList { check_list_id: self.checklist_id.clone() });
    }

    /// Unsubscribe. Unflushed text edits are dropped.
    pub fn close(&mut self) {
        if !self.dirty.is_empty() {
            log::debug!("Dropping {} unsaved text edits on close", self.dirty.len());
        }
        self.dirty.clear();
        self.drag.cancel();
        self.pending_removal = None;
        self.outbox.notify(Command::OffCheckList { check_list_id: self.checklist_id.clone() });
    }

    /// New text typed into row `id`. A newline splits the row there.
    pub fn input(&mut self, id: &ItemId, text: &str) -> Result<EditOutcome, TreeError> {
        match editor::split_input(text) {
            Some((cleaned, at)) => {
                self.tree.set_text(id, cleaned)?;
                self.key(id, EditKey::Enter, TextCursor::at(at))
            }
            None => {
                self.tree.set_text(id, text)?;
                self.dirty.insert(id.clone());
                Ok(EditOutcome { handled: true, ..EditOutcome::default() })
            }
        }
    }

    pub fn key(&mut self, id: &ItemId, key: EditKey, cursor: TextCursor) -> Result<EditOutcome, TreeError> {
        let outcome = editor::handle_key(&mut self.tree, id, key, cursor)?;
        for change in &outcome.changes {
            self.queue(change.clone());
        }
        Ok(outcome)
    }

    pub fn set_checked(&mut self, id: &ItemId, checked: bool) -> Result<CheckOutcome, TreeError> {
        if self.settings.remove_on_check && checked {
            if !self.tree.contains(id) {
                return Err(TreeError::ItemNotFound(id.clone()));
            }
            let count = self.tree.children_of(id).len() + 1;
            if count > 1 {
                self.pending_removal = Some(id.clone());
                return Ok(CheckOutcome::NeedsConfirmation { count });
            }
            return self.remove_checked(id);
        }

        let count = self.tree.set_checked(id, checked)?;
        self.outbox.notify(Command::UpdateChecked {
            check_list_id: self.checklist_id.clone(),
            id: id.clone(),
            checked,
        });
        Ok(CheckOutcome::Updated { count })
    }

    /// Go ahead with a removal that [`CheckOutcome::NeedsConfirmation`] held back.
    pub fn confirm_checked_removal(&mut self) -> Result<Option<CheckOutcome>, TreeError> {
        match self.pending_removal.take() {
            Some(id) => self.remove_checked(&id).map(Some),
            None => Ok(None),
        }
    }

    pub fn cancel_checked_removal(&mut self) {
        self.pending_removal = None;
    }

    pub fn grab(&mut self, id: &ItemId, x: f64, step_width: f64) -> Result<(), TreeError> {
        self.drag.grab(&self.tree, id, x, step_width)
    }

    pub fn drag_to(&mut self, before: Option<&ItemId>, x: f64) -> Option<DragPreview> {
        self.drag.drag_to(&self.tree, before, x)
    }

    pub fn release(&mut self) -> Result<Vec<Change>, TreeError> {
        let changes = self.drag.release(&mut self.tree)?;
        for change in &changes {
            self.queue(change.clone());
        }
        Ok(changes)
    }

    pub fn cancel_drag(&mut self) {
        self.drag.cancel();
    }

    /// Autosave pass: queue `updateText` for every dirty row still present.
    /// Returns how many were queued.
    pub fn flush_dirty(&mut self) -> usize {
        let dirty = std::mem::take(&mut self.dirty);
        let mut flushed = 0;
        for id in dirty {
            if self.tree.contains(&id) {
                self.queue(Change::Text(id));
                flushed += 1;
            }
        }
        flushed
    }

    /// Replay a server broadcast. Returns whether the model changed.
    pub fn apply_broadcast(&mut self, broadcast: Broadcast) -> bool {
        log::debug!("Applying {} to {}", broadcast.name(), self.checklist_id);
        match broadcast {
            Broadcast::AddItem { id, checked, text, level, before_id } => {
                let item = Item { id, text, checked, level };
                self.tree.apply_insert(item, before_id.as_ref())
            }
            Broadcast::RemoveItem { id } => {
                self.dirty.remove(&id);
                self.tree.remove(&id).is_ok()
            }
            Broadcast::UpdateChecked { id, checked } => {
                if self.settings.remove_on_check && checked {
                    match self.tree.remove_with_descendants(&id) {
                        Ok(removed) => {
                            for item in &removed {
                                self.dirty.remove(&item.id);
                            }
                            true
                        }
                        Err(_) => false,
                    }
                } else {
                    self.tree.set_checked(&id, checked).is_ok()
                }
            }
            Broadcast::UpdateText { id, text } => {
                if self.dirty.contains(&id) {
                    log::debug!("Keeping local edits of {id} over remote text");
                    return false;
                }
                self.tree.set_text(&id, text).is_ok()
            }
            Broadcast::UpdateLevels { items } => self.tree.apply_levels(&items) > 0,
            Broadcast::ReinsertItems { ids, before_id } => self.tree.apply_reinsert(&ids, before_id.as_ref()) > 0,
        }
    }

    /// The server accepted the `addItem` for `sentinel` and named it `id`.
    pub fn acknowledge(&mut self, sentinel: &ItemId, id: ItemId) {
        if self.tree.contains(&id) {
            // Our own addItem echo beat the reply, and later broadcasts may
            // already be placed relative to it: the echoed row stays put.
            match self.tree.adopt(sentinel, &id) {
                Ok(local) if self.dirty.contains(sentinel) => {
                    log::debug!("Moving unsaved text of {sentinel} onto echoed row {id}");
                    let _ = self.tree.set_text(&id, local.text);
                }
                Ok(_) => {}
                Err(_) => log::debug!("{sentinel} was removed before its echo {id} arrived"),
            }
        } else if self.tree.rename(sentinel, id.clone()).is_err() {
            log::debug!("{sentinel} was removed before the server named it {id}");
        }
        if self.dirty.remove(sentinel) {
            self.dirty.insert(id.clone());
        }
        if self.pending_removal.as_ref() == Some(sentinel) {
            self.pending_removal = Some(id.clone());
        }
        self.drag.rename(sentinel, &id);
        self.outbox.acknowledge(sentinel, &id);
    }

    pub fn apply_settings(&mut self, settings: ChecklistSettings) {
        self.settings = settings;
    }

    /// Commands ready to send, in order.
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        self.outbox.drain()
    }

    /// Next command ready to send. It stays queued until
    /// [`ChecklistSession::commit_outgoing`] is called.
    pub fn peek_outgoing(&self) -> Option<&Outgoing> {
        self.outbox.front()
    }

    /// The command returned by [`ChecklistSession::peek_outgoing`] was sent.
    pub fn commit_outgoing(&mut self) -> Option<Outgoing> {
        self.outbox.pop_front()
    }

    /// Commands waiting for a sentinel to be acknowledged.
    pub fn held_commands(&self) -> usize {
        self.outbox.held_len()
    }

    fn remove_checked(&mut self, id: &ItemId) -> Result<CheckOutcome, TreeError> {
        let removed = self.tree.remove_with_descendants(id)?;
        for item in &removed {
            self.dirty.remove(&item.id);
        }
        self.outbox.notify(Command::UpdateChecked {
            check_list_id: self.checklist_id.clone(),
            id: id.clone(),
            checked: true,
        });
        Ok(CheckOutcome::Removed { ids: removed.into_iter().map(|item| item.id).collect() })
    }

    fn queue(&mut self, change: Change) {
        let check_list_id = self.checklist_id.clone();
        match change {
            Change::Text(id) => {
                self.dirty.remove(&id);
                let Some(item) = self.tree.get(&id) else {
                    return;
                };
                let text = item.text.clone();
                self.outbox.notify(Command::UpdateText { check_list_id, id, text });
            }
            Change::Added(id) => {
                let Some(item) = self.tree.get(&id) else {
                    return;
                };
                let command = Command::AddItem {
                    check_list_id,
                    checked: item.checked,
                    text: item.text.clone(),
                    level: item.level,
                    before_id: self.tree.next(&id).map(|next| next.id.clone()),
                };
                self.outbox.request(id, command);
            }
            Change::Removed(id) => {
                self.dirty.remove(&id);
                self.outbox.notify(Command::RemoveItem { check_list_id, id });
            }
            Change::Level(id, level) => {
                self.outbox.notify(Command::UpdateLevel { check_list_id, id, level });
            }
            Change::Moved { id, before } => {
                self.outbox.notify(Command::ReinsertItem { check_list_id, id, before_id: before });
            }
        }
    }
}
