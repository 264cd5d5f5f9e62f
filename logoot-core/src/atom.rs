//! Character records stored in a replica's sequence.

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// One character with its position and tombstone flag.
///
/// Only `deleted` ever changes after creation, and only from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    pub position: Position,
    #[serde(rename = "char")]
    pub ch: char,
    pub deleted: bool,
}

impl Atom {
    pub fn new(position: Position, ch: char) -> Self {
        Self {
            position,
            ch,
            deleted: false,
        }
    }

    /// Placeholder carried by a delete whose target is not known locally.
    pub fn tombstone(position: Position) -> Self {
        Self {
            position,
            ch: char::REPLACEMENT_CHARACTER,
            deleted: true,
        }
    }

    pub fn is_visible(&self) -> bool {
        !self.deleted
    }

    /// Flip the tombstone flag. Returns `false` if the atom was already deleted.
    pub fn mark_deleted(&mut self) -> bool {
        !std::mem::replace(&mut self.deleted, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionComponent;

    #[test]
    fn test_mark_deleted_is_idempotent() {
        let mut atom = Atom::new(Position::new(vec![PositionComponent::new(7, "A")]), 'x');
        assert!(atom.is_visible());
        assert!(atom.mark_deleted());
        assert!(!atom.mark_deleted());
        assert!(atom.deleted);
    }
}
