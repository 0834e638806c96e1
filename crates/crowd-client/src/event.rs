//! Validated per-frame analysis event.

use common::{QuadrantCounts, QuadrantId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Encoded image as received from the backend (base64 JPEG).
///
/// Shared rather than copied: the same payload is held by the live view and
/// the replay buffer.
pub type ImagePayload = Arc<str>;

/// One analysis result for one source frame, after normalisation.
///
/// Every field is optional; an absent field means "no new information", not
/// "reset to default".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameEvent {
    pub frame_image: Option<ImagePayload>,
    pub heatmap_image: Option<ImagePayload>,
    pub people_count: Option<u32>,
    /// Unrounded, within 0..=100
    pub progress: Option<f64>,
    pub quadrant_counts: Option<QuadrantCounts>,
    /// Quadrants the server flagged for this frame
    pub danger_zones: Option<BTreeSet<QuadrantId>>,
    /// Display only; neither gap-free nor monotonic
    pub frame_number: Option<i64>,
}

impl FrameEvent {
    /// No image and no counter: must not touch aggregates
    pub fn is_noop(&self) -> bool {
        self.frame_image.is_none()
            && self.heatmap_image.is_none()
            && self.people_count.is_none()
            && self.progress.is_none()
            && self.quadrant_counts.is_none()
            && self.danger_zones.is_none()
    }

    pub fn with_frame_image(mut self, image: &str) -> Self {
        self.frame_image = Some(Arc::from(image));
        self
    }

    pub fn with_heatmap_image(mut self, image: &str) -> Self {
        self.heatmap_image = Some(Arc::from(image));
        self
    }

    pub fn with_people_count(mut self, count: u32) -> Self {
        self.people_count = Some(count);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_quadrant(mut self, id: &str, count: u32) -> Self {
        self.quadrant_counts
            .get_or_insert_with(QuadrantCounts::new)
            .insert(QuadrantId::from(id), count);
        self
    }

    pub fn with_danger_zone(mut self, id: &str) -> Self {
        self.danger_zones
            .get_or_insert_with(BTreeSet::new)
            .insert(QuadrantId::from(id));
        self
    }

    pub fn with_frame_number(mut self, frame_number: i64) -> Self {
        self.frame_number = Some(frame_number);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_event_is_noop() {
        assert!(FrameEvent::default().is_noop());
        assert!(FrameEvent::default().with_frame_number(4).is_noop());
        assert!(!FrameEvent::default().with_people_count(0).is_noop());
    }

    #[test]
    fn test_builders_accumulate() {
        let event = FrameEvent::default()
            .with_quadrant("q1", 2)
            .with_quadrant("q2", 5)
            .with_danger_zone("q2");

        assert_eq!(event.quadrant_counts.as_ref().map(|q| q.len()), Some(2));
        assert_eq!(event.danger_zones.as_ref().map(|d| d.len()), Some(1));
    }
}
