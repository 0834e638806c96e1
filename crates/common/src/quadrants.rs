//! Quadrant identifiers used by the detection backend.
//!
//! The backend partitions every frame into a fixed grid of named regions and
//! reports occupancy per region. Identifiers are `q1`..`q12`, row-major over a
//! 3x4 grid. Identifiers outside that set are still carried through as opaque
//! strings so a backend with a different grid does not break the client.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of grid rows the backend uses
pub const GRID_ROWS: usize = 3;

/// Number of grid columns the backend uses
pub const GRID_COLS: usize = 4;

/// Total number of named quadrants
pub const QUADRANT_COUNT: usize = GRID_ROWS * GRID_COLS;

/// Name of one spatial region within a frame
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuadrantId(String);

impl QuadrantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for a 1-based grid index (`1` => `q1`)
    pub fn from_index(index: usize) -> Self {
        Self(format!("q{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 1-based grid index, if this is one of the standard `qN` names
    pub fn grid_index(&self) -> Option<usize> {
        self.0
            .strip_prefix('q')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| (1..=QUADRANT_COUNT).contains(n))
    }

    /// Whether the id names a region of the standard grid
    pub fn is_standard(&self) -> bool {
        self.grid_index().is_some()
    }

    /// All standard quadrant ids in grid order
    pub fn all() -> impl Iterator<Item = QuadrantId> {
        (1..=QUADRANT_COUNT).map(QuadrantId::from_index)
    }
}

impl fmt::Display for QuadrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QuadrantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QuadrantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Occupancy per quadrant for one frame.
///
/// Ordered so that log output and snapshots list quadrants deterministically.
pub type QuadrantCounts = BTreeMap<QuadrantId, u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_index() {
        assert_eq!(QuadrantId::from("q1").grid_index(), Some(1));
        assert_eq!(QuadrantId::from("q12").grid_index(), Some(12));
        assert_eq!(QuadrantId::from("q13").grid_index(), None);
        assert_eq!(QuadrantId::from("north").grid_index(), None);
        assert!(!QuadrantId::from("q0").is_standard());
    }

    #[test]
    fn test_all_quadrants_in_order() {
        let ids: Vec<String> = QuadrantId::all().map(|q| q.to_string()).collect();
        assert_eq!(ids.len(), QUADRANT_COUNT);
        assert_eq!(ids.first().map(String::as_str), Some("q1"));
        assert_eq!(ids.last().map(String::as_str), Some("q12"));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let mut counts = QuadrantCounts::new();
        counts.insert(QuadrantId::from("q2"), 4);
        let json = serde_json::to_string(&counts).expect("serialize");
        assert_eq!(json, r#"{"q2":4}"#);
    }
}
