//! Drag-reorder controller.
//!
//! Turns pointer motion into one final reposition and re-indent. The tree is
//! left untouched while the pointer moves: the controller only tracks the
//! drop slot and the tentative level, and [`DragController::release`] applies
//! both at once through [`ItemTree::relocate`].
//!
//! The dragged row's descendant run travels with it and is ignored when
//! looking for the row that would precede the drop slot.

use crate::command::Change;
use crate::item::ItemId;
use crate::level::{self, Direction, LevelBounds};
use crate::tree::{ItemTree, TreeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Grabbed,
    Dragging,
    Released,
}

/// What the rendering layer should show while dragging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPreview {
    /// Row the dragged block would land in front of; `None` is the end.
    pub before: Option<ItemId>,
    pub level: u32,
}

#[derive(Debug, Clone)]
struct Grab {
    id: ItemId,
    /// Descendant run captured at grab time.
    block: Vec<ItemId>,
    level: u32,
    before: Option<ItemId>,
    /// Pointer x at which the current level was reached.
    ref_x: f64,
    /// Horizontal distance worth one level.
    step_width: f64,
}

impl Grab {
    fn carries(&self, id: &ItemId) -> bool {
        &self.id == id || self.block.contains(id)
    }

    /// The row right after the dragged block in `tree`.
    fn home(&self, tree: &ItemTree) -> Option<ItemId> {
        let index = tree.index_of(&self.id)?;
        tree.items()[index + 1..]
            .iter()
            .find(|item| !self.block.contains(&item.id))
            .map(|item| item.id.clone())
    }

    /// Levels of the rows that would surround the block at `before`.
    fn neighbours(&self, tree: &ItemTree, before: Option<&ItemId>) -> (Option<u32>, Option<u32>) {
        let mut previous = None;
        for item in tree.items().iter().filter(|item| !self.carries(&item.id)) {
            if Some(&item.id) == before {
                return (previous, Some(item.level));
            }
            previous = Some(item.level);
        }
        (previous, None)
    }
}

#[derive(Debug, Default)]
pub struct DragController {
    state: DragState,
    grab: Option<Grab>,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    /// Row currently being dragged.
    pub fn dragged(&self) -> Option<&ItemId> {
        self.grab.as_ref().map(|grab| &grab.id)
    }

    /// Pick up `id` and its descendant run with the pointer at `x`.
    pub fn grab(&mut self, tree: &ItemTree, id: &ItemId, x: f64, step_width: f64) -> Result<(), TreeError> {
        let index = tree.index_of(id).ok_or_else(|| TreeError::ItemNotFound(id.clone()))?;
        if let Some(previous) = &self.grab {
            log::warn!("Grab of {id} replaces unfinished drag of {}", previous.id);
        }
        let block = tree.items()[tree.descendant_range(index)]
            .iter()
            .map(|item| item.id.clone())
            .collect();
        let mut grab = Grab {
            id: id.clone(),
            block,
            level: tree.items()[index].level,
            before: None,
            ref_x: x,
            step_width: if step_width > 0.0 { step_width } else { 1.0 },
        };
        grab.before = grab.home(tree);
        log::debug!("Grabbed {id} with {} descendants", grab.block.len());
        self.grab = Some(grab);
        self.state = DragState::Grabbed;
        Ok(())
    }

    /// Pointer moved: the block would now land before `before` with the
    /// pointer at `x`. Returns the updated preview, or `None` when idle.
    pub fn drag_to(&mut self, tree: &ItemTree, before: Option<&ItemId>, x: f64) -> Option<DragPreview> {
        let grab = self.grab.as_mut()?;
        self.state = DragState::Dragging;

        match before {
            Some(target) if grab.carries(target) => grab.before = grab.home(tree),
            Some(target) if tree.contains(target) => grab.before = Some(target.clone()),
            Some(target) => log::debug!("Ignoring drag over unknown row {target}"),
            None => grab.before = None,
        }

        let (previous, following) = grab.neighbours(tree, grab.before.as_ref());
        let bounds = LevelBounds::between(previous, following);
        grab.level = bounds.clamp(grab.level);

        let mut steps = ((x - grab.ref_x) / grab.step_width).trunc() as i64;
        while steps != 0 {
            let direction = if steps > 0 { Direction::Indent } else { Direction::Outdent };
            let shift = level::shift_level_within(grab.level, bounds, direction);
            if !shift.changed() {
                // Blocked at a bound; the remaining steps are too.
                break;
            }
            grab.level = shift.level;
            grab.ref_x += shift.delta as f64 * grab.step_width;
            steps -= direction.step();
        }

        Some(DragPreview { before: grab.before.clone(), level: grab.level })
    }

    /// Drop the block. Applies the move to `tree` and reports what changed:
    /// nothing when the row ends where it started.
    ///
    /// When both level and position change, an outdent is reported after the
    /// move and an indent before it, so a replica replaying the two steps in
    /// order never sees the block absorb a neighbour as descendants.
    pub fn release(&mut self, tree: &mut ItemTree) -> Result<Vec<Change>, TreeError> {
        let Some(grab) = self.grab.take() else {
            return Ok(Vec::new());
        };
        self.state = DragState::Idle;

        let current = tree
            .get(&grab.id)
            .map(|item| item.level)
            .ok_or_else(|| TreeError::ItemNotFound(grab.id.clone()))?;
        let home = grab.home(tree);
        let before = match grab.before.clone() {
            Some(target) if tree.contains(&target) => Some(target),
            Some(_) => home.clone(),
            None => None,
        };
        let (previous, following) = grab.neighbours(tree, before.as_ref());
        let level = LevelBounds::between(previous, following).clamp(grab.level);

        let moved = before != home;
        let leveled = level != current;
        if moved || leveled {
            tree.relocate(&grab.id, before.as_ref(), level)?;
        }
        self.state = DragState::Released;

        let moved_change = || Change::Moved { id: grab.id.clone(), before: before.clone() };
        let level_change = || Change::Level(grab.id.clone(), level);
        let changes = match (moved, leveled) {
            (false, false) => Vec::new(),
            (true, false) => vec![moved_change()],
            (false, true) => vec![level_change()],
            (true, true) if level < current => vec![moved_change(), level_change()],
            (true, true) => vec![level_change(), moved_change()],
        };
        log::debug!("Released {} with {} changes", grab.id, changes.len());
        Ok(changes)
    }

    /// Abort the drag; nothing is applied.
    pub fn cancel(&mut self) {
        if let Some(grab) = self.grab.take() {
            log::debug!("Cancelled drag of {}", grab.id);
        }
        self.state = DragState::Idle;
    }

    /// Follow a sentinel being replaced by its server id.
    pub fn rename(&mut self, from: &ItemId, to: &ItemId) {
        let Some(grab) = self.grab.as_mut() else {
            return;
        };
        for slot in std::iter::once(&mut grab.id)
            .chain(grab.block.iter_mut())
            .chain(grab.before.iter_mut())
        {
            if slot == from {
                *slot = to.clone();
            }
        }
    }
}
