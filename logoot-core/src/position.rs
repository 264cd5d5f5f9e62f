//! Dense, totally ordered position identifiers.
//!
//! A [`Position`] is a path of `(digit, site)` components. Two positions are
//! compared component by component (digit first, then site id), and a strict
//! prefix sorts before any of its extensions:
//!
//! ```text
//! [4:A]  <  [4:A 9:B]  <  [4:B]  <  [5:A]
//! ```
//!
//! [`Position::between`] allocates a fresh identifier strictly between two
//! neighbors. When a level has no free digit left, the allocator copies the
//! left component and descends one level (depth extension), so repeated
//! insertion at the same spot never exhausts the identifier space.
//!
//! Reference: Weiss, Urso & Molli: Logoot (ICDCS 2009)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exclusive digit bound at every level; the virtual upper sentinel.
pub const BASE: u32 = 32767;

/// Site id carried by the virtual lower sentinel `{0, ""}`.
const SENTINEL_SITE: &str = "";

/// Errors raised when allocating or validating positions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("site id must not be empty")]
    EmptySiteId,
    #[error("left bound {left} is not below right bound {right}")]
    NotOrdered { left: Position, right: Position },
    #[error("invalid position {position}: {reason}")]
    Invalid { position: Position, reason: &'static str },
}

/// One level of a position: a digit tagged with the site that minted it.
///
/// Field order matters: the derived `Ord` compares `digit` before `site_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionComponent {
    pub digit: u32,
    #[serde(rename = "siteId")]
    pub site_id: String,
}

impl PositionComponent {
    pub fn new(digit: u32, site_id: impl Into<String>) -> Self {
        Self {
            digit,
            site_id: site_id.into(),
        }
    }

    /// The virtual lower sentinel, also used as the descent marker when the
    /// left bound is exhausted.
    fn sentinel() -> Self {
        Self::new(0, SENTINEL_SITE)
    }

    fn is_sentinel(&self) -> bool {
        self.digit == 0 && self.site_id.is_empty()
    }
}

/// A globally unique coordinate for one atom.
///
/// The derived ordering on the component vector is exactly the Logoot order:
/// lexicographic over components, shorter prefix first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(Vec<PositionComponent>);

impl Position {
    pub fn new(components: Vec<PositionComponent>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[PositionComponent] {
        &self.0
    }

    /// Number of levels in this identifier.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn less(&self, other: &Position) -> bool {
        self < other
    }

    /// Site that minted this identifier (the site of its last component).
    pub fn site_id(&self) -> Option<&str> {
        self.0.last().map(|c| c.site_id.as_str())
    }

    /// Allocate a position strictly between `left` and `right` for `site_id`.
    ///
    /// `None` on either side stands for the virtual sentinels `{0, ""}` and
    /// `{BASE, ""}`. At each level the allocator looks for a free digit between
    /// the two bounds; if one exists it mints `floor((lo + hi) / 2)` and stops.
    /// Otherwise it copies the left component (or the lower sentinel once the
    /// left bound is exhausted) and descends. Once the copied component sorts
    /// below the right bound at that level, the right side becomes unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::EmptySiteId`] for an empty site and
    /// [`PositionError::NotOrdered`] unless `left < right`.
    pub fn between(
        left: Option<&Position>,
        right: Option<&Position>,
        site_id: &str,
    ) -> Result<Position, PositionError> {
        if site_id.is_empty() {
            return Err(PositionError::EmptySiteId);
        }
        if let (Some(l), Some(r)) = (left, right) {
            if l >= r {
                return Err(PositionError::NotOrdered {
                    left: l.clone(),
                    right: r.clone(),
                });
            }
        }

        let mut lower: &[PositionComponent] =
            left.map(Position::components).unwrap_or_default();
        let mut upper: Option<&[PositionComponent]> = right.map(Position::components);
        let mut path = Vec::with_capacity(lower.len() + 1);

        loop {
            let lc = lower.first();
            let uc = upper.and_then(|u| u.first());
            let lo = lc.map_or(0, |c| c.digit);
            let hi = uc.map_or(BASE, |c| c.digit);

            if hi > lo + 1 {
                path.push(PositionComponent::new(lo + (hi - lo) / 2, site_id));
                return Ok(Position(path));
            }

            let step = lc.cloned().unwrap_or_else(PositionComponent::sentinel);
            upper = match (upper, uc) {
                (Some(u), Some(c)) if *c == step => u.get(1..),
                _ => None,
            };
            lower = lower.get(1..).unwrap_or_default();
            path.push(step);
        }
    }

    /// Structural checks applied to identifiers arriving from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Invalid`] for an empty path, a digit outside
    /// `0..BASE`, a sentinel in last place, or a non-sentinel zero digit.
    pub fn validate(&self) -> Result<(), PositionError> {
        let invalid = |reason| PositionError::Invalid {
            position: self.clone(),
            reason,
        };
        let last = self.0.last().ok_or_else(|| invalid("empty path"))?;
        if last.site_id.is_empty() {
            return Err(invalid("last component has no site"));
        }
        for c in &self.0 {
            if c.digit >= BASE {
                return Err(invalid("digit out of range"));
            }
            if c.site_id.is_empty() && !c.is_sentinel() {
                return Err(invalid("anonymous component with non-zero digit"));
            }
            if c.digit == 0 && !c.site_id.is_empty() {
                return Err(invalid("zero digit is reserved for the sentinel"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}:{}", c.digit, c.site_id)?;
        }
        f.write_str("]")
    }
}
