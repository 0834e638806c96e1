//! Per-frame analysis payload as it appears on the wire.
//!
//! The same shape is pushed over the WebSocket channel while a video is being
//! processed and returned by the single-frame detection endpoint. Numeric
//! fields are deliberately loose (`f64`) because the backend is a best-effort
//! telemetry source; normalisation into validated values happens client-side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw per-frame analysis record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    /// Base64-encoded JPEG of the analysed source frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,

    /// Base64-encoded JPEG of the heatmap overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap_frame: Option<String>,

    /// People detected in this frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people_in_frame: Option<f64>,

    /// Processing progress of the current run, 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,

    /// Occupancy per quadrant id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quadrant_counts: Option<BTreeMap<String, f64>>,

    /// Quadrants the backend itself flags as overcrowded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger_zones: Option<Vec<String>>,

    /// Source frame sequence number (display only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<i64>,
}

impl FramePayload {
    /// Whether the payload carries neither an image nor any counter
    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
            && self.heatmap_frame.is_none()
            && self.people_in_frame.is_none()
            && self.progress.is_none()
            && self.quadrant_counts.is_none()
            && self.danger_zones.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_push_message() {
        let json = r#"{
            "frame": "aGVsbG8=",
            "people_in_frame": 7,
            "progress": 12.5,
            "quadrant_counts": {"q1": 3, "q2": 4},
            "unexpected": true
        }"#;

        let payload: FramePayload = serde_json::from_str(json).expect("parse");
        assert_eq!(payload.frame.as_deref(), Some("aGVsbG8="));
        assert_eq!(payload.people_in_frame, Some(7.0));
        assert_eq!(payload.progress, Some(12.5));
        assert_eq!(payload.quadrant_counts.as_ref().map(|q| q.len()), Some(2));
        assert!(payload.danger_zones.is_none());
        assert!(!payload.is_empty());
    }

    #[test]
    fn test_null_fields_are_absent() {
        let payload: FramePayload =
            serde_json::from_str(r#"{"frame": null, "progress": null}"#).expect("parse");
        assert!(payload.is_empty());
    }
}
