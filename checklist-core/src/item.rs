//! Checklist and item records.
//!
//! These are the shapes that travel over the wire (`getCheckList` replies,
//! `addItem` broadcasts) as well as the rows held by [`crate::tree::ItemTree`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire literal used for an item the server has not acknowledged yet.
pub const UNSAVED_ID: &str = "unsaved";

/// Identity of a checklist item.
///
/// Saved ids are opaque strings minted by the server. Unsaved ids are local
/// sentinels, one per pending `addItem`, replaced once the server replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemId {
    Saved(String),
    Unsaved(u64),
}

impl ItemId {
    pub fn saved(id: impl Into<String>) -> Self {
        ItemId::Saved(id.into())
    }

    pub fn is_unsaved(&self) -> bool {
        matches!(self, ItemId::Unsaved(_))
    }

    /// The server-assigned id, if there is one.
    pub fn as_saved(&self) -> Option<&str> {
        match self {
            ItemId::Saved(id) => Some(id),
            ItemId::Unsaved(_) => None,
        }
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        ItemId::Saved(id)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        ItemId::Saved(id.to_string())
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        match id {
            ItemId::Saved(id) => id,
            ItemId::Unsaved(_) => UNSAVED_ID.to_string(),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Saved(id) => write!(f, "{id}"),
            ItemId::Unsaved(n) => write!(f, "{UNSAVED_ID}#{n}"),
        }
    }
}

/// A single row of a checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub text: String,
    pub checked: bool,
    /// Zero-based indentation depth.
    pub level: u32,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, text: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            checked: false,
            level,
        }
    }

    pub fn with_checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }
}

/// Editable properties of a checklist (the `editCheckList` payload).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistSettings {
    pub title: String,
    /// Checking an item deletes it (and its descendants) instead of ticking it.
    pub remove_on_check: bool,
    /// Users allowed to view and edit the checklist.
    pub users: Vec<String>,
}

/// A full checklist as returned by `getCheckList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checklist {
    pub id: String,
    pub title: String,
    pub remove_on_check: bool,
    pub users: Vec<String>,
    pub items: Vec<Item>,
}

impl Checklist {
    pub fn new(id: impl Into<String>, settings: ChecklistSettings) -> Self {
        Self {
            id: id.into(),
            title: settings.title,
            remove_on_check: settings.remove_on_check,
            users: settings.users,
            items: Vec::new(),
        }
    }

    pub fn settings(&self) -> ChecklistSettings {
        ChecklistSettings {
            title: self.title.clone(),
            remove_on_check: self.remove_on_check,
            users: self.users.clone(),
        }
    }

    pub fn apply_settings(&mut self, settings: ChecklistSettings) {
        self.title = settings.title;
        self.remove_on_check = settings.remove_on_check;
        self.users = settings.users;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ItemId::saved("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_unsaved_id_serializes_as_sentinel() {
        let json = serde_json::to_string(&ItemId::Unsaved(3)).unwrap();
        assert_eq!(json, format!("\"{UNSAVED_ID}\""));
    }

    #[test]
    fn test_checklist_wire_shape() {
        let json = r#"{
            "id": "list-1",
            "title": "Groceries",
            "removeOnCheck": true,
            "users": ["ann", "bo"],
            "items": [{"id": "a", "text": "Buy milk", "checked": false, "level": 0}]
        }"#;
        let checklist: Checklist = serde_json::from_str(json).unwrap();
        assert!(checklist.remove_on_check);
        assert_eq!(checklist.items[0].id, ItemId::saved("a"));
        assert_eq!(checklist.settings().users, vec!["ann", "bo"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(ItemId::saved("x").to_string(), "x");
        assert_eq!(ItemId::Unsaved(2).to_string(), "unsaved#2");
        assert!(ItemId::Unsaved(2).as_saved().is_none());
    }
}
