//! Indentation rules.
//!
//! A row may sit at most one level deeper than the row above it and may drop
//! arbitrarily far. Everything here is pure arithmetic; the tree and the drag
//! controller decide which neighbours to feed in.

/// One indentation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Indent,
    Outdent,
}

impl Direction {
    pub fn step(self) -> i64 {
        match self {
            Direction::Indent => 1,
            Direction::Outdent => -1,
        }
    }
}

/// Result of a level shift: the new level and the delta actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelShift {
    pub level: u32,
    pub delta: i64,
}

impl LevelShift {
    pub fn changed(&self) -> bool {
        self.delta != 0
    }
}

/// Deepest level allowed right after a row at `previous` (0 at the top).
pub fn max_level_after(previous: Option<u32>) -> u32 {
    previous.map_or(0, |p| p + 1)
}

/// Shallowest level that still keeps a following row at `following` valid.
pub fn min_level_before(following: Option<u32>) -> u32 {
    following.map_or(0, |f| f.saturating_sub(1))
}

/// Inclusive range of legal levels for a row given its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelBounds {
    pub min: u32,
    pub max: u32,
}

impl LevelBounds {
    /// Bounds imposed by the row above (`previous`) and the row below (`following`).
    ///
    /// When the two conflict the upper bound wins: the predecessor rule is the
    /// hard invariant, the follower rule only keeps an existing subtree attached.
    pub fn between(previous: Option<u32>, following: Option<u32>) -> Self {
        let max = max_level_after(previous);
        let min = min_level_before(following).min(max);
        Self { min, max }
    }

    pub fn clamp(&self, level: u32) -> u32 {
        level.clamp(self.min, self.max)
    }
}

/// `clamp(current + direction, 0, previous + 1)`.
pub fn shift_level(current: u32, previous: Option<u32>, direction: Direction) -> LevelShift {
    shift_level_within(
        current,
        LevelBounds { min: 0, max: max_level_after(previous) },
        direction,
    )
}

/// Shift one step in `direction`, staying inside `bounds`.
///
/// A row that already sits outside the bounds is clamped back into them; the
/// shift then reports the level it was clamped to.
pub fn shift_level_within(current: u32, bounds: LevelBounds, direction: Direction) -> LevelShift {
    let target = (current as i64 + direction.step()).max(0) as u32;
    let level = target.clamp(bounds.min, bounds.max.max(bounds.min));
    LevelShift {
        level,
        delta: level as i64 - current as i64,
    }
}

/// Apply a signed delta to a level, saturating at zero.
pub fn offset_level(level: u32, delta: i64) -> u32 {
    (level as i64 + delta).max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_under_previous() {
        let shift = shift_level(0, Some(0), Direction::Indent);
        assert_eq!(shift, LevelShift { level: 1, delta: 1 });
    }

    #[test]
    fn test_indent_blocked_at_boundary() {
        let shift = shift_level(1, Some(0), Direction::Indent);
        assert_eq!(shift.level, 1);
        assert!(!shift.changed());
    }

    #[test]
    fn test_first_row_cannot_indent() {
        let shift = shift_level(0, None, Direction::Indent);
        assert_eq!(shift.delta, 0);
    }

    #[test]
    fn test_outdent_stops_at_zero() {
        assert_eq!(shift_level(0, Some(3), Direction::Outdent).delta, 0);
        assert_eq!(shift_level(2, Some(3), Direction::Outdent).level, 1);
    }

    #[test]
    fn test_bounds_between_neighbours() {
        let bounds = LevelBounds::between(Some(1), Some(3));
        assert_eq!(bounds, LevelBounds { min: 2, max: 2 });
        assert_eq!(bounds.clamp(0), 2);

        let conflicting = LevelBounds::between(Some(0), Some(4));
        assert_eq!(conflicting, LevelBounds { min: 1, max: 1 });
    }

    #[test]
    fn test_outdent_respects_follower() {
        let bounds = LevelBounds::between(Some(2), Some(3));
        let shift = shift_level_within(2, bounds, Direction::Outdent);
        assert_eq!(shift.level, 2);
        assert!(!shift.changed());
    }

    #[test]
    fn test_out_of_bounds_row_is_pulled_back() {
        // A row left too deep by a stale neighbour is clamped back.
        let bounds = LevelBounds::between(Some(0), None);
        let shift = shift_level_within(4, bounds, Direction::Indent);
        assert_eq!(shift.level, 1);
        assert_eq!(shift.delta, -3);
    }

    #[test]
    fn test_offset_level_saturates() {
        assert_eq!(offset_level(1, -3), 0);
        assert_eq!(offset_level(1, 2), 3);
    }
}
