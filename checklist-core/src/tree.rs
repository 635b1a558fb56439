//! Flattened outline model.
//!
//! A checklist is one ordered `Vec<Item>`; parent/child structure is implied by
//! `level`. The children of row `i` are the maximal contiguous run after `i`
//! whose levels are strictly greater than `level[i]`.
//!
//! Local mutators (`insert`, `set_level`, `reinsert`, `relocate`, ...) keep
//! `level[i] <= level[i - 1] + 1` and refuse with [`TreeError::InvalidLevel`]
//! otherwise. The `apply_*` family replays server state verbatim and never
//! fails: stale ids are skipped.

use std::ops::Range;
use thiserror::Error;

use crate::item::{Item, ItemId};
use crate::level::{self, Direction, LevelShift};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),
    #[error("item {id} cannot sit at level {level} (at most {max} here)")]
    InvalidLevel { id: ItemId, level: u32, max: u32 },
}

/// Ordered items of one checklist.
#[derive(Debug, Clone, Default)]
pub struct ItemTree {
    items: Vec<Item>,
    /// Counter for local sentinel ids.
    next_unsaved: u64,
}

impl ItemTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap server-provided rows as-is.
    pub fn from_items(items: Vec<Item>) -> Self {
        Self { items, next_unsaved: 0 }
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index_of(&self, id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Row directly above `id`.
    pub fn previous(&self, id: &ItemId) -> Option<&Item> {
        let index = self.index_of(id)?;
        index.checked_sub(1).map(|i| &self.items[i])
    }

    /// Row directly below `id`.
    pub fn next(&self, id: &ItemId) -> Option<&Item> {
        let index = self.index_of(id)?;
        self.items.get(index + 1)
    }

    /// Index range of the descendant run of the row at `index`.
    pub fn descendant_range(&self, index: usize) -> Range<usize> {
        let level = self.items[index].level;
        let end = self.items[index + 1..]
            .iter()
            .position(|item| item.level <= level)
            .map_or(self.items.len(), |offset| index + 1 + offset);
        index + 1..end
    }

    /// Descendant run of `id` (empty when unknown or childless).
    pub fn children_of(&self, id: &ItemId) -> &[Item] {
        match self.index_of(id) {
            Some(index) => &self.items[self.descendant_range(index)],
            None => &[],
        }
    }

    /// Enclosing rows of `id`, nearest first.
    pub fn ancestors_of(&self, id: &ItemId) -> Vec<&Item> {
        let Some(index) = self.index_of(id) else {
            return Vec::new();
        };
        let mut level = self.items[index].level;
        let mut ancestors = Vec::new();
        for item in self.items[..index].iter().rev() {
            if level == 0 {
                break;
            }
            if item.level < level {
                level = item.level;
                ancestors.push(item);
            }
        }
        ancestors
    }

    /// First row breaking the level invariant, if any.
    pub fn validate(&self) -> Result<(), TreeError> {
        (1..self.items.len()).try_for_each(|i| self.check_row(i))
    }

    /// Allocate a fresh local sentinel.
    pub fn next_unsaved_id(&mut self) -> ItemId {
        self.next_unsaved += 1;
        ItemId::Unsaved(self.next_unsaved)
    }

    // ---------------------------------------------------------------
    // Local mutation (validated)
    // ---------------------------------------------------------------

    /// Insert `items` before `before` (or at the end).
    pub fn insert(&mut self, items: Vec<Item>, before: Option<&ItemId>) -> Result<(), TreeError> {
        let at = self.insertion_index(before)?;
        let count = items.len();
        self.items.splice(at..at, items);
        let checked = (at..=at + count).try_for_each(|i| self.check_row(i));
        if checked.is_err() {
            self.items.drain(at..at + count);
        }
        checked
    }

    /// Insert a new local row carrying a sentinel id; returns that id.
    pub fn insert_unsaved(
        &mut self,
        text: impl Into<String>,
        checked: bool,
        level: u32,
        before: Option<&ItemId>,
    ) -> Result<ItemId, TreeError> {
        let id = self.next_unsaved_id();
        let item = Item::new(id.clone(), text, level).with_checked(checked);
        self.insert(vec![item], before)?;
        Ok(id)
    }

    /// Remove one row. Its former children are outdented just enough to
    /// hang validly under the new predecessor.
    pub fn remove(&mut self, id: &ItemId) -> Result<Item, TreeError> {
        let index = self.require(id)?;
        let removed = self.items.remove(index);

        let orphans = index..self.run_end(index, removed.level);
        if !orphans.is_empty() {
            let previous = index.checked_sub(1).map(|i| self.items[i].level);
            let allowed = level::max_level_after(previous);
            let first = self.items[index].level;
            if first > allowed {
                let delta = allowed as i64 - first as i64;
                for item in &mut self.items[orphans.clone()] {
                    item.level = level::offset_level(item.level, delta);
                }
                log::debug!("Outdented {} orphaned rows of {id} by {}", orphans.len(), -delta);
            }
        }
        Ok(removed)
    }

    /// Remove a row together with its descendant run.
    pub fn remove_with_descendants(&mut self, id: &ItemId) -> Result<Vec<Item>, TreeError> {
        let index = self.require(id)?;
        let end = self.descendant_range(index).end;
        Ok(self.items.drain(index..end).collect())
    }

    pub fn set_text(&mut self, id: &ItemId, text: impl Into<String>) -> Result<(), TreeError> {
        let index = self.require(id)?;
        self.items[index].text = text.into();
        Ok(())
    }

    /// Set `checked` on a row and every descendant. Returns the rows touched.
    pub fn set_checked(&mut self, id: &ItemId, checked: bool) -> Result<usize, TreeError> {
        let index = self.require(id)?;
        let end = self.descendant_range(index).end;
        for item in &mut self.items[index..end] {
            item.checked = checked;
        }
        Ok(end - index)
    }

    /// Set the level of a single row, validated against the row above.
    pub fn set_level(&mut self, id: &ItemId, level: u32) -> Result<(), TreeError> {
        let index = self.require(id)?;
        if index > 0 {
            let max = self.items[index - 1].level + 1;
            if level > max {
                return Err(TreeError::InvalidLevel { id: id.clone(), level, max });
            }
        }
        self.items[index].level = level;
        Ok(())
    }

    /// Indent or outdent a row one step, carrying its descendants along.
    pub fn shift(&mut self, id: &ItemId, direction: Direction) -> Result<LevelShift, TreeError> {
        let index = self.require(id)?;
        let previous = index.checked_sub(1).map(|i| self.items[i].level);
        let shift = level::shift_level(self.items[index].level, previous, direction);
        if shift.changed() {
            let end = self.descendant_range(index).end;
            for item in &mut self.items[index..end] {
                item.level = level::offset_level(item.level, shift.delta);
            }
        }
        Ok(shift)
    }

    /// Move a single row before `before` (or to the end).
    pub fn reinsert(&mut self, id: &ItemId, before: Option<&ItemId>) -> Result<(), TreeError> {
        let index = self.require(id)?;
        self.move_rows(index..index + 1, before, 0)
    }

    /// Move a row and its descendant run before `before`, placing the row at
    /// `level` and shifting the run by the same delta.
    pub fn relocate(&mut self, id: &ItemId, before: Option<&ItemId>, level: u32) -> Result<(), TreeError> {
        let index = self.require(id)?;
        let range = index..self.descendant_range(index).end;
        let delta = level as i64 - self.items[index].level as i64;
        self.move_rows(range, before, delta)
    }

    /// Give a sentinel row its server id.
    pub fn rename(&mut self, from: &ItemId, to: ItemId) -> Result<(), TreeError> {
        let index = self.require(from)?;
        self.items[index].id = to;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Server replay (lenient)
    // ---------------------------------------------------------------

    /// Resolve `sentinel` when its server row `id` is already present. The
    /// server row keeps its slot, level and checked state; the sentinel row
    /// is dropped and returned. Rows after it are left as they are.
    pub fn adopt(&mut self, sentinel: &ItemId, id: &ItemId) -> Result<Item, TreeError> {
        self.require(id)?;
        let index = self.require(sentinel)?;
        Ok(self.items.remove(index))
    }

    /// Insert a server row unless its id is already present. An unknown
    /// `before` appends at the end.
    pub fn apply_insert(&mut self, item: Item, before: Option<&ItemId>) -> bool {
        if self.contains(&item.id) {
            return false;
        }
        let at = before
            .and_then(|b| self.index_of(b))
            .unwrap_or(self.items.len());
        self.items.insert(at, item);
        true
    }

    /// Write levels as given. Returns how many ids were known.
    pub fn apply_levels(&mut self, levels: &[(ItemId, u32)]) -> usize {
        let mut applied = 0;
        for (id, level) in levels {
            if let Some(index) = self.index_of(id) {
                self.items[index].level = *level;
                applied += 1;
            }
        }
        applied
    }

    /// Move the known `ids`, in order, as one block before `before`.
    pub fn apply_reinsert(&mut self, ids: &[ItemId], before: Option<&ItemId>) -> usize {
        let mut moved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(index) = self.index_of(id) {
                moved.push(self.items.remove(index));
            }
        }
        let count = moved.len();
        let at = before
            .and_then(|b| self.index_of(b))
            .unwrap_or(self.items.len());
        self.items.splice(at..at, moved);
        count
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn require(&self, id: &ItemId) -> Result<usize, TreeError> {
        self.index_of(id).ok_or_else(|| TreeError::ItemNotFound(id.clone()))
    }

    fn insertion_index(&self, before: Option<&ItemId>) -> Result<usize, TreeError> {
        match before {
            Some(id) => self.require(id),
            None => Ok(self.items.len()),
        }
    }

    /// End of the run starting at `start` whose levels exceed `level`.
    fn run_end(&self, start: usize, level: u32) -> usize {
        self.items[start..]
            .iter()
            .position(|item| item.level <= level)
            .map_or(self.items.len(), |offset| start + offset)
    }

    fn check_row(&self, index: usize) -> Result<(), TreeError> {
        if index == 0 || index >= self.items.len() {
            return Ok(());
        }
        let max = self.items[index - 1].level + 1;
        let row = &self.items[index];
        if row.level > max {
            return Err(TreeError::InvalidLevel { id: row.id.clone(), level: row.level, max });
        }
        Ok(())
    }

    /// Move `range` before `before`, offsetting levels by `delta`. Rolls back
    /// if the rows at either seam end up invalid.
    fn move_rows(&mut self, range: Range<usize>, before: Option<&ItemId>, delta: i64) -> Result<(), TreeError> {
        if let Some(b) = before {
            let target = self.require(b)?;
            if range.contains(&target) {
                // Dropping a block in front of itself keeps its position.
                return self.offset_rows(range, delta);
            }
        }

        let snapshot = self.items.clone();
        let mut block: Vec<Item> = self.items.drain(range.clone()).collect();
        for item in &mut block {
            item.level = level::offset_level(item.level, delta);
        }
        let count = block.len();
        let at = before
            .and_then(|b| self.index_of(b))
            .unwrap_or(self.items.len());
        self.items.splice(at..at, block);

        let vacated = if at <= range.start { range.start + count } else { range.start };
        let checked = [at, at + count, vacated]
            .into_iter()
            .try_for_each(|i| self.check_row(i));
        if checked.is_err() {
            self.items = snapshot;
        }
        checked
    }

    fn offset_rows(&mut self, range: Range<usize>, delta: i64) -> Result<(), TreeError> {
        if delta == 0 {
            return Ok(());
        }
        let snapshot = self.items.clone();
        let end = range.end;
        let start = range.start;
        for item in &mut self.items[range] {
            item.level = level::offset_level(item.level, delta);
        }
        let checked = [start, end].into_iter().try_for_each(|i| self.check_row(i));
        if checked.is_err() {
            self.items = snapshot;
        }
        checked
    }
}
