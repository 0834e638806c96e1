use common::{QuadrantCounts, QuadrantId};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::event::{FrameEvent, ImagePayload};

/// Current snapshot shown in the live view.
///
/// Fields are sticky: an event that omits a field leaves the previous value in
/// place. Only [`LiveState::default`] (used at run start) clears them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveState {
    pub frame_image: Option<ImagePayload>,
    pub heatmap_image: Option<ImagePayload>,
    pub people_count: u32,
    pub progress: f64,
    pub quadrant_counts: QuadrantCounts,
    pub danger_zones: BTreeSet<QuadrantId>,
    pub frame_number: Option<i64>,
}

/// Merge `event` over `current`, returning the new snapshot
pub fn apply(current: &LiveState, event: &FrameEvent) -> LiveState {
    LiveState {
        frame_image: event
            .frame_image
            .clone()
            .or_else(|| current.frame_image.clone()),
        heatmap_image: event
            .heatmap_image
            .clone()
            .or_else(|| current.heatmap_image.clone()),
        people_count: event.people_count.unwrap_or(current.people_count),
        progress: event.progress.unwrap_or(current.progress),
        quadrant_counts: event
            .quadrant_counts
            .clone()
            .unwrap_or_else(|| current.quadrant_counts.clone()),
        danger_zones: event
            .danger_zones
            .clone()
            .unwrap_or_else(|| current.danger_zones.clone()),
        frame_number: event.frame_number.or(current.frame_number),
    }
}

impl LiveState {
    /// Progress for display, two decimals ("55.00")
    pub fn progress_label(&self) -> String {
        format!("{:.2}", self.progress)
    }

    /// Compare the whole-frame people count against venue capacity
    pub fn overcrowding(&self, max_capacity: u32) -> OvercrowdingStatus {
        OvercrowdingStatus::check(self.people_count, max_capacity)
    }
}

/// Whole-frame capacity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OvercrowdingStatus {
    pub alert: bool,
    pub current_count: u32,
    pub max_capacity: u32,
    pub message: String,
}

impl OvercrowdingStatus {
    pub fn check(current_count: u32, max_capacity: u32) -> Self {
        let alert = current_count > max_capacity;
        let message = if alert {
            format!(
                "Overcrowding detected! {} people detected, exceeding limit of {}.",
                current_count, max_capacity
            )
        } else {
            format!(
                "Safe: {} people detected (limit: {}).",
                current_count, max_capacity
            )
        };

        Self {
            alert,
            current_count,
            max_capacity,
            message,
        }
    }
}
