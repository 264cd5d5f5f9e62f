//! Sorted atom sequence owned by a single replica.
//!
//! ```text
//!   atoms (sorted by position, tombstones retained)
//!   ┌──────┬──────┬──────┬──────┬──────┐
//!   │ h    │ e    │ x †  │ l    │ o    │   † = deleted
//!   └──────┴──────┴──────┴──────┴──────┘
//!   pending_deletes: { positions whose delete arrived before the insert }
//! ```
//!
//! Lookups use binary search over the sorted vector. Inserts shift the tail,
//! which is linear in the document size.

use std::collections::HashSet;

use crate::atom::Atom;
use crate::position::Position;

/// Result of applying an insert to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A delete for this position was waiting; the atom went in as a tombstone.
    InsertedDeleted,
    /// The position was already present; nothing changed.
    Duplicate,
}

/// Result of applying a delete to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyDeleted,
    /// The target has not arrived yet; the delete is held until it does.
    Buffered,
}

#[derive(Debug, Default, Clone)]
pub struct AtomStore {
    atoms: Vec<Atom>,
    pending_deletes: HashSet<Position>,
}

impl AtomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an atom at its sorted slot. Re-delivery of a known position is a no-op.
    pub fn insert(&mut self, mut atom: Atom) -> InsertOutcome {
        match self.search(&atom.position) {
            Ok(_) => InsertOutcome::Duplicate,
            Err(slot) => {
                let outcome = if self.pending_deletes.remove(&atom.position) {
                    atom.deleted = true;
                    InsertOutcome::InsertedDeleted
                } else {
                    InsertOutcome::Inserted
                };
                self.atoms.insert(slot, atom);
                outcome
            }
        }
    }

    /// Tombstone the atom at `position`, or buffer the delete if it is unknown.
    pub fn mark_deleted(&mut self, position: &Position) -> DeleteOutcome {
        match self.search(position) {
            Ok(i) => match self.atoms.get_mut(i).map(Atom::mark_deleted) {
                Some(true) => DeleteOutcome::Deleted,
                _ => DeleteOutcome::AlreadyDeleted,
            },
            Err(_) => {
                self.pending_deletes.insert(position.clone());
                DeleteOutcome::Buffered
            }
        }
    }

    /// Visible text in sequence order.
    pub fn snapshot(&self) -> String {
        self.atoms
            .iter()
            .filter(|a| a.is_visible())
            .map(|a| a.ch)
            .collect()
    }

    /// Neighbors for an insert at visible index `index` (clamped to the end).
    ///
    /// The new atom goes immediately before the atom currently at `index`,
    /// after any tombstones in front of it. Both neighbors are physically
    /// adjacent so that a fresh position never coincides with a tombstone.
    pub fn neighbors(&self, index: usize) -> (Option<&Position>, Option<&Position>) {
        let slot = self.slot_of_visible(index);
        let left = slot
            .checked_sub(1)
            .and_then(|i| self.atoms.get(i))
            .map(|a| &a.position);
        let right = self.atoms.get(slot).map(|a| &a.position);
        (left, right)
    }

    /// Position of the visible atom at `index`.
    pub fn position_at(&self, index: usize) -> Option<&Position> {
        self.atoms
            .iter()
            .filter(|a| a.is_visible())
            .nth(index)
            .map(|a| &a.position)
    }

    pub fn get(&self, position: &Position) -> Option<&Atom> {
        self.search(position).ok().and_then(|i| self.atoms.get(i))
    }

    /// Number of visible characters.
    pub fn len(&self) -> usize {
        self.atoms.iter().filter(|a| a.is_visible()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every atom, tombstones included, in sequence order.
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn pending_deletes(&self) -> usize {
        self.pending_deletes.len()
    }

    fn search(&self, position: &Position) -> Result<usize, usize> {
        self.atoms.binary_search_by(|a| a.position.cmp(position))
    }

    fn slot_of_visible(&self, index: usize) -> usize {
        self.atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_visible())
            .nth(index)
            .map_or(self.atoms.len(), |(i, _)| i)
    }
}
