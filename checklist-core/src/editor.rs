//! Text split/merge state machine.
//!
//! Handles the keys that cross item boundaries while a row's text has focus:
//! Enter splits, Backspace at the start merges into the row above, Delete at
//! the end merges into the row below, and Ctrl+[ / Ctrl+] shift the level.
//! Cursor positions are in characters, not bytes.

use crate::command::Change;
use crate::item::ItemId;
use crate::level::Direction;
use crate::tree::{ItemTree, TreeError};

/// Selection inside a row's text. Collapsed when `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextCursor {
    pub start: usize,
    pub end: usize,
}

impl TextCursor {
    pub fn at(position: usize) -> Self {
        Self { start: position, end: position }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// Keys with boundary-crossing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKey {
    Enter,
    Backspace,
    Delete,
    /// Ctrl+]
    Indent,
    /// Ctrl+[
    Outdent,
}

/// Where focus and caret go after an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    pub id: ItemId,
    pub caret: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EditOutcome {
    /// `false` means the shell should apply the key's default behavior.
    pub handled: bool,
    pub focus: Option<Focus>,
    pub changes: Vec<Change>,
}

impl EditOutcome {
    fn unhandled() -> Self {
        Self::default()
    }

    fn handled(focus: Option<Focus>, changes: Vec<Change>) -> Self {
        Self { handled: true, focus, changes }
    }
}

/// Run `key` against row `id` with the given cursor.
pub fn handle_key(
    tree: &mut ItemTree,
    id: &ItemId,
    key: EditKey,
    cursor: TextCursor,
) -> Result<EditOutcome, TreeError> {
    match key {
        EditKey::Enter => split(tree, id, cursor),
        EditKey::Backspace => merge_backward(tree, id, cursor),
        EditKey::Delete => merge_forward(tree, id, cursor),
        EditKey::Indent => shift(tree, id, Direction::Indent),
        EditKey::Outdent => shift(tree, id, Direction::Outdent),
    }
}

/// Split the row at the cursor. The selection, if any, is dropped. The new
/// row sits directly below at the same level and takes focus.
pub fn split(tree: &mut ItemTree, id: &ItemId, cursor: TextCursor) -> Result<EditOutcome, TreeError> {
    let index = tree.index_of(id).ok_or_else(|| TreeError::ItemNotFound(id.clone()))?;
    let item = &tree.items()[index];
    let level = item.level;
    let head = char_prefix(&item.text, cursor.start.min(cursor.end)).to_string();
    let tail = char_suffix(&item.text, cursor.start.max(cursor.end)).to_string();
    let before = tree.items().get(index + 1).map(|next| next.id.clone());

    tree.set_text(id, head)?;
    let new_id = tree.insert_unsaved(tail, false, level, before.as_ref())?;

    Ok(EditOutcome::handled(
        Some(Focus { id: new_id.clone(), caret: 0 }),
        vec![Change::Text(id.clone()), Change::Added(new_id)],
    ))
}

/// Backspace with a collapsed cursor at 0 joins this row onto the row above.
pub fn merge_backward(tree: &mut ItemTree, id: &ItemId, cursor: TextCursor) -> Result<EditOutcome, TreeError> {
    if !(cursor.is_collapsed() && cursor.start == 0) {
        return Ok(EditOutcome::unhandled());
    }
    let Some(previous) = tree.previous(id).cloned() else {
        return Ok(EditOutcome::unhandled());
    };
    let current = tree.remove(id)?;
    let caret = previous.text.chars().count();
    tree.set_text(&previous.id, previous.text + &current.text)?;

    Ok(EditOutcome::handled(
        Some(Focus { id: previous.id.clone(), caret }),
        vec![Change::Text(previous.id), Change::Removed(current.id)],
    ))
}

/// Delete with a collapsed cursor at the end joins this row onto the row below.
pub fn merge_forward(tree: &mut ItemTree, id: &ItemId, cursor: TextCursor) -> Result<EditOutcome, TreeError> {
    let current = tree.get(id).ok_or_else(|| TreeError::ItemNotFound(id.clone()))?;
    let caret = current.text.chars().count();
    if !(cursor.is_collapsed() && cursor.start == caret) {
        return Ok(EditOutcome::unhandled());
    }
    let Some(next) = tree.next(id).cloned() else {
        return Ok(EditOutcome::unhandled());
    };
    let current = tree.remove(id)?;
    tree.set_text(&next.id, current.text + &next.text)?;

    Ok(EditOutcome::handled(
        Some(Focus { id: next.id.clone(), caret }),
        vec![Change::Text(next.id), Change::Removed(current.id)],
    ))
}

fn shift(tree: &mut ItemTree, id: &ItemId, direction: Direction) -> Result<EditOutcome, TreeError> {
    let shift = tree.shift(id, direction)?;
    let changes = if shift.changed() {
        vec![Change::Level(id.clone(), shift.level)]
    } else {
        Vec::new()
    };
    Ok(EditOutcome::handled(None, changes))
}

/// Input-method workaround: a newline typed into a single-line field.
///
/// Returns the text with every newline removed and the character position of
/// the first one, where the row should be split.
pub fn split_input(text: &str) -> Option<(String, usize)> {
    let is_break = |c: char| c == '\n' || c == '\r';
    let at = text.chars().position(is_break)?;
    let cleaned = text.chars().filter(|&c| !is_break(c)).collect();
    Some((cleaned, at))
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(offset, _)| offset)
}

fn char_prefix(text: &str, chars: usize) -> &str {
    &text[..byte_offset(text, chars)]
}

fn char_suffix(text: &str, chars: usize) -> &str {
    &text[byte_offset(text, chars)..]
}
