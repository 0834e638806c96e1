//! Running quadrant occupancy and client-side danger classification.

use common::{QuadrantCounts, QuadrantId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Average occupancy above which a quadrant counts as dangerous
pub const DEFAULT_DANGER_THRESHOLD: f64 = 5.0;

/// Cumulative occupancy of one quadrant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuadrantTally {
    pub sum: u64,
    pub samples: u64,
}

impl QuadrantTally {
    /// `None` until at least one sample has been absorbed
    pub fn average(&self) -> Option<f64> {
        if self.samples == 0 {
            None
        } else {
            Some(self.sum as f64 / self.samples as f64)
        }
    }
}

/// Per-quadrant running sums for the current session.
///
/// A quadrant that no event has mentioned is absent, which is different from
/// having an average of zero: it is unknown and never classified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateState {
    tallies: BTreeMap<QuadrantId, QuadrantTally>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new state with `counts` folded in
    pub fn absorb(&self, counts: &QuadrantCounts) -> Self {
        let mut next = self.clone();
        next.absorb_mut(counts);
        next
    }

    /// Fold `counts` in place, O(1) per quadrant present
    pub fn absorb_mut(&mut self, counts: &QuadrantCounts) {
        for (id, value) in counts {
            let tally = self.tallies.entry(id.clone()).or_default();
            tally.sum += u64::from(*value);
            tally.samples += 1;
        }
    }

    pub fn tally(&self, id: &QuadrantId) -> Option<&QuadrantTally> {
        self.tallies.get(id)
    }

    pub fn average(&self, id: &QuadrantId) -> Option<f64> {
        self.tallies.get(id).and_then(QuadrantTally::average)
    }

    pub fn averages(&self) -> BTreeMap<QuadrantId, f64> {
        self.tallies
            .iter()
            .filter_map(|(id, tally)| tally.average().map(|avg| (id.clone(), avg)))
            .collect()
    }

    /// Quadrants whose running average strictly exceeds `threshold`.
    ///
    /// Recomputed from the tallies on every call, so a quadrant leaves the set
    /// as soon as its average drops back.
    pub fn danger_zones(&self, threshold: f64) -> BTreeSet<QuadrantId> {
        self.tallies
            .iter()
            .filter(|(_, tally)| tally.average().is_some_and(|avg| avg > threshold))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tallies.len()
    }
}

/// Quadrants to alert on: flagged by the server for the latest frame or by the
/// client's running average
pub fn alert_zones(
    server_flagged: &BTreeSet<QuadrantId>,
    client_derived: &BTreeSet<QuadrantId>,
) -> BTreeSet<QuadrantId> {
    server_flagged.union(client_derived).cloned().collect()
}
