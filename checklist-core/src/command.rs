//! The command set exchanged with the checklist server.
//!
//! [`Command`] is what a client sends, [`Broadcast`] is what every subscriber
//! of a checklist receives back. Both serialize as
//! `{"command": "<name>", "params": {...}}` with camelCase names.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::item::ItemId;

/// A local model change that still has to reach the server.
///
/// The editor and the drag controller report these; the session turns them
/// into [`Command`]s, reading the current row state at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Send the row's current text.
    Text(ItemId),
    /// A sentinel row was created; send `addItem` with its current fields.
    Added(ItemId),
    Removed(ItemId),
    Level(ItemId, u32),
    /// The row and its descendant run now sit before `before` (end when `None`).
    Moved { id: ItemId, before: Option<ItemId> },
}

/// Outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "camelCase")]
pub enum Command {
    /// Replies with the new item's id.
    #[serde(rename_all = "camelCase")]
    AddItem {
        check_list_id: String,
        checked: bool,
        text: String,
        level: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before_id: Option<ItemId>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateText { check_list_id: String, id: ItemId, text: String },
    #[serde(rename_all = "camelCase")]
    UpdateChecked { check_list_id: String, id: ItemId, checked: bool },
    #[serde(rename_all = "camelCase")]
    UpdateLevel { check_list_id: String, id: ItemId, level: u32 },
    #[serde(rename_all = "camelCase")]
    RemoveItem { check_list_id: String, id: ItemId },
    #[serde(rename_all = "camelCase")]
    ReinsertItem {
        check_list_id: String,
        id: ItemId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before_id: Option<ItemId>,
    },
    #[serde(rename_all = "camelCase")]
    OnCheckList { check_list_id: String },
    #[serde(rename_all = "camelCase")]
    OffCheckList { check_list_id: String },
    /// Replies with the full [`crate::item::Checklist`].
    GetCheckList { id: String },
    #[serde(rename_all = "camelCase")]
    EditCheckList {
        id: String,
        title: String,
        remove_on_check: bool,
        users: Vec<String>,
    },
}

impl Command {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddItem { .. } => "addItem",
            Command::UpdateText { .. } => "updateText",
            Command::UpdateChecked { .. } => "updateChecked",
            Command::UpdateLevel { .. } => "updateLevel",
            Command::RemoveItem { .. } => "removeItem",
            Command::ReinsertItem { .. } => "reinsertItem",
            Command::OnCheckList { .. } => "onCheckList",
            Command::OffCheckList { .. } => "offCheckList",
            Command::GetCheckList { .. } => "getCheckList",
            Command::EditCheckList { .. } => "editCheckList",
        }
    }

    /// Checklist the command is scoped to.
    pub fn checklist_id(&self) -> &str {
        match self {
            Command::AddItem { check_list_id, .. }
            | Command::UpdateText { check_list_id, .. }
            | Command::UpdateChecked { check_list_id, .. }
            | Command::UpdateLevel { check_list_id, .. }
            | Command::RemoveItem { check_list_id, .. }
            | Command::ReinsertItem { check_list_id, .. }
            | Command::OnCheckList { check_list_id }
            | Command::OffCheckList { check_list_id } => check_list_id,
            Command::GetCheckList { id } | Command::EditCheckList { id, .. } => id,
        }
    }

    /// Item ids this command refers to (target and `beforeId`).
    pub fn item_refs(&self) -> Vec<&ItemId> {
        match self {
            Command::AddItem { before_id, .. } => before_id.iter().collect(),
            Command::ReinsertItem { id, before_id, .. } => {
                std::iter::once(id).chain(before_id.iter()).collect()
            }
            Command::UpdateText { id, .. }
            | Command::UpdateChecked { id, .. }
            | Command::UpdateLevel { id, .. }
            | Command::RemoveItem { id, .. } => vec![id],
            Command::OnCheckList { .. }
            | Command::OffCheckList { .. }
            | Command::GetCheckList { .. }
            | Command::EditCheckList { .. } => Vec::new(),
        }
    }

    /// Whether the command still points at an unacknowledged item.
    pub fn references_unsaved(&self) -> bool {
        self.item_refs().into_iter().any(ItemId::is_unsaved)
    }

    /// Replace every reference to `from` with `to`.
    pub fn rewrite(&mut self, from: &ItemId, to: &ItemId) {
        let swap = |slot: &mut ItemId| {
            if slot == from {
                *slot = to.clone();
            }
        };
        match self {
            Command::AddItem { before_id, .. } => before_id.iter_mut().for_each(swap),
            Command::ReinsertItem { id, before_id, .. } => {
                swap(id);
                before_id.iter_mut().for_each(swap);
            }
            Command::UpdateText { id, .. }
            | Command::UpdateChecked { id, .. }
            | Command::UpdateLevel { id, .. }
            | Command::RemoveItem { id, .. } => swap(id),
            Command::OnCheckList { .. }
            | Command::OffCheckList { .. }
            | Command::GetCheckList { .. }
            | Command::EditCheckList { .. } => {}
        }
    }
}

/// Inbound notification, delivered to every subscriber including the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "camelCase")]
pub enum Broadcast {
    #[serde(rename_all = "camelCase")]
    AddItem {
        id: ItemId,
        checked: bool,
        text: String,
        level: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before_id: Option<ItemId>,
    },
    RemoveItem { id: ItemId },
    UpdateChecked { id: ItemId, checked: bool },
    UpdateText { id: ItemId, text: String },
    /// `[[id, level], ...]`
    UpdateLevels { items: Vec<(ItemId, u32)> },
    /// Move `ids`, in order, as one block before `beforeId` (end when absent).
    #[serde(rename_all = "camelCase")]
    ReinsertItems {
        ids: Vec<ItemId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before_id: Option<ItemId>,
    },
}

impl Broadcast {
    pub fn name(&self) -> &'static str {
        match self {
            Broadcast::AddItem { .. } => "addItem",
            Broadcast::RemoveItem { .. } => "removeItem",
            Broadcast::UpdateChecked { .. } => "updateChecked",
            Broadcast::UpdateText { .. } => "updateText",
            Broadcast::UpdateLevels { .. } => "updateLevels",
            Broadcast::ReinsertItems { .. } => "reinsertItems",
        }
    }
}

/// A command ready to leave the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// `addItem`; the reply's id replaces the sentinel `item`.
    Request { item: ItemId, command: Command },
    /// Fire-and-forget.
    Notify(Command),
}

impl Outgoing {
    pub fn command(&self) -> &Command {
        match self {
            Outgoing::Request { command, .. } | Outgoing::Notify(command) => command,
        }
    }

    fn command_mut(&mut self) -> &mut Command {
        match self {
            Outgoing::Request { command, .. } | Outgoing::Notify(command) => command,
        }
    }
}

/// Ordered queue of outbound commands.
///
/// A command that refers to an unacknowledged item is held back until every
/// sentinel it mentions has a server id, then released in the order it was queued.
#[derive(Debug, Default)]
pub struct Outbox {
    ready: VecDeque<Outgoing>,
    held: Vec<Outgoing>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fire-and-forget command.
    pub fn notify(&mut self, command: Command) {
        self.enqueue(Outgoing::Notify(command));
    }

    /// Queue an `addItem` for the sentinel `item`.
    pub fn request(&mut self, item: ItemId, command: Command) {
        self.enqueue(Outgoing::Request { item, command });
    }

    /// The server assigned `id` to `sentinel`: rewrite and release held commands.
    pub fn acknowledge(&mut self, sentinel: &ItemId, id: &ItemId) {
        let mut still_held = Vec::with_capacity(self.held.len());
        for mut outgoing in self.held.drain(..) {
            outgoing.command_mut().rewrite(sentinel, id);
            if outgoing.command().references_unsaved() {
                still_held.push(outgoing);
            } else {
                self.ready.push_back(outgoing);
            }
        }
        self.held = still_held;
    }

    /// Take everything ready to send, in order.
    pub fn drain(&mut self) -> Vec<Outgoing> {
        self.ready.drain(..).collect()
    }

    /// Next command ready to send, left in place.
    pub fn front(&self) -> Option<&Outgoing> {
        self.ready.front()
    }

    pub fn pop_front(&mut self) -> Option<Outgoing> {
        self.ready.pop_front()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    fn enqueue(&mut self, outgoing: Outgoing) {
        if outgoing.command().references_unsaved() {
            log::debug!("Holding {} until its items are saved", outgoing.command().name());
            self.held.push(outgoing);
        } else {
            self.ready.push_back(outgoing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update_text(id: ItemId, text: &str) -> Command {
        Command::UpdateText { check_list_id: "L".into(), id, text: text.into() }
    }

    #[test]
    fn test_command_wire_shape() {
        let command = Command::AddItem {
            check_list_id: "L".into(),
            checked: false,
            text: "Buy milk".into(),
            level: 1,
            before_id: Some(ItemId::saved("c")),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(
            value,
            json!({
                "command": "addItem",
                "params": {"checkListId": "L", "checked": false, "text": "Buy milk", "level": 1, "beforeId": "c"}
            })
        );
    }

    #[test]
    fn test_optional_before_id_is_omitted() {
        let command = Command::ReinsertItem { check_list_id: "L".into(), id: "a".into(), before_id: None };
        let value = serde_json::to_value(&command).unwrap();
        assert!(value["params"].get("beforeId").is_none());
    }

    #[test]
    fn test_broadcast_batches_parse() {
        let levels: Broadcast = serde_json::from_value(json!({
            "command": "updateLevels",
            "params": {"items": [["a", 1], ["b", 2]]}
        }))
        .unwrap();
        assert_eq!(
            levels,
            Broadcast::UpdateLevels { items: vec![("a".into(), 1), ("b".into(), 2)] }
        );

        let reinsert: Broadcast = serde_json::from_value(json!({
            "command": "reinsertItems",
            "params": {"ids": ["a", "b"]}
        }))
        .unwrap();
        assert_eq!(reinsert, Broadcast::ReinsertItems { ids: vec!["a".into(), "b".into()], before_id: None });
    }

    #[test]
    fn test_item_refs() {
        let reinsert = Command::ReinsertItem {
            check_list_id: "L".into(),
            id: "a".into(),
            before_id: Some(ItemId::Unsaved(1)),
        };
        assert_eq!(reinsert.item_refs().len(), 2);
        assert!(reinsert.references_unsaved());
        assert!(Command::GetCheckList { id: "L".into() }.item_refs().is_empty());
    }

    #[test]
    fn test_outbox_passes_saved_commands_through() {
        let mut outbox = Outbox::new();
        outbox.notify(update_text("a".into(), "x"));
        assert_eq!(outbox.ready_len(), 1);
        assert_eq!(outbox.held_len(), 0);
        assert_eq!(outbox.drain().len(), 1);
        assert_eq!(outbox.ready_len(), 0);
    }

    #[test]
    fn test_outbox_front_stays_until_popped() {
        let mut outbox = Outbox::new();
        outbox.notify(update_text("a".into(), "x"));
        outbox.notify(update_text("b".into(), "y"));

        assert_eq!(outbox.front(), Some(&Outgoing::Notify(update_text("a".into(), "x"))));
        assert_eq!(outbox.ready_len(), 2);
        assert_eq!(outbox.pop_front(), Some(Outgoing::Notify(update_text("a".into(), "x"))));
        assert_eq!(outbox.front(), Some(&Outgoing::Notify(update_text("b".into(), "y"))));
    }

    #[test]
    fn test_outbox_holds_until_acknowledged() {
        let sentinel = ItemId::Unsaved(7);
        let mut outbox = Outbox::new();
        outbox.notify(update_text(sentinel.clone(), "draft"));
        outbox.notify(update_text("b".into(), "other"));
        assert_eq!(outbox.held_len(), 1);
        assert_eq!(outbox.drain().len(), 1);

        outbox.acknowledge(&sentinel, &ItemId::saved("srv-1"));
        let released = outbox.drain();
        assert_eq!(released, vec![Outgoing::Notify(update_text("srv-1".into(), "draft"))]);
        assert_eq!(outbox.held_len(), 0);
    }

    #[test]
    fn test_outbox_waits_for_every_sentinel() {
        let (first, second) = (ItemId::Unsaved(1), ItemId::Unsaved(2));
        let mut outbox = Outbox::new();
        outbox.notify(Command::ReinsertItem {
            check_list_id: "L".into(),
            id: first.clone(),
            before_id: Some(second.clone()),
        });

        outbox.acknowledge(&first, &"one".into());
        assert_eq!(outbox.ready_len(), 0);
        outbox.acknowledge(&second, &"two".into());
        assert_eq!(
            outbox.drain(),
            vec![Outgoing::Notify(Command::ReinsertItem {
                check_list_id: "L".into(),
                id: "one".into(),
                before_id: Some("two".into()),
            })]
        );
    }
}
