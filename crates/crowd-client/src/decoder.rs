//! Push-message decoding.
//!
//! Turns raw text from the push channel (or a single-frame response body) into
//! a [`FrameEvent`]. Structural problems reject the message; out-of-range
//! numbers are clamped, since the backend is a best-effort telemetry source.

use common::{FramePayload, QuadrantCounts, QuadrantId};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::FrameEvent;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame message is not a JSON object")]
    NotAnObject,
}

/// Parse one raw push message
pub fn decode(raw: &str) -> Result<FrameEvent, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let payload: FramePayload = serde_json::from_value(value)?;
    Ok(normalize(payload))
}

/// Decode a push message, logging and dropping it on failure
pub fn decode_or_drop(raw: &str) -> Option<FrameEvent> {
    match decode(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, bytes = raw.len(), "dropping undecodable frame message");
            None
        }
    }
}

/// Clamp and type a wire payload
pub fn normalize(payload: FramePayload) -> FrameEvent {
    FrameEvent {
        frame_image: non_empty_image(payload.frame),
        heatmap_image: non_empty_image(payload.heatmap_frame),
        people_count: payload.people_in_frame.and_then(clamp_count),
        progress: payload.progress.and_then(clamp_progress),
        quadrant_counts: payload.quadrant_counts.map(|counts| {
            counts
                .into_iter()
                .filter_map(|(id, value)| clamp_count(value).map(|v| (QuadrantId::from(id), v)))
                .collect::<QuadrantCounts>()
        }),
        danger_zones: payload.danger_zones.map(|zones| {
            zones
                .into_iter()
                .map(QuadrantId::from)
                .collect::<BTreeSet<_>>()
        }),
        frame_number: payload.frame_number,
    }
}

fn non_empty_image(image: Option<String>) -> Option<Arc<str>> {
    image.filter(|s| !s.is_empty()).map(Arc::from)
}

fn clamp_count(value: f64) -> Option<u32> {
    if !value.is_finite() {
        debug!(value, "ignoring non-finite count");
        return None;
    }
    Some(value.round().clamp(0.0, u32::MAX as f64) as u32)
}

fn clamp_progress(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_message() {
        let raw = r#"{
            "frame": "/9j/4A==",
            "people_in_frame": 9,
            "progress": 33.333333,
            "quadrant_counts": {"q1": 3, "q5": 6},
            "danger_zones": ["q5"],
            "frame_number": 40
        }"#;

        let event = decode(raw).expect("decode");
        assert_eq!(event.frame_image.as_deref(), Some("/9j/4A=="));
        assert_eq!(event.people_count, Some(9));
        assert_eq!(event.progress, Some(33.333333));
        let counts = event.quadrant_counts.expect("counts");
        assert_eq!(counts.get(&QuadrantId::from("q5")), Some(&6));
        assert!(event
            .danger_zones
            .expect("zones")
            .contains(&QuadrantId::from("q5")));
        assert_eq!(event.frame_number, Some(40));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let raw = r#"{"people_in_frame": -4, "progress": 140.5, "quadrant_counts": {"q1": -1, "q2": 2.6}}"#;

        let event = decode(raw).expect("decode");
        assert_eq!(event.people_count, Some(0));
        assert_eq!(event.progress, Some(100.0));
        let counts = event.quadrant_counts.expect("counts");
        assert_eq!(counts.get(&QuadrantId::from("q1")), Some(&0));
        assert_eq!(counts.get(&QuadrantId::from("q2")), Some(&3));
    }

    #[test]
    fn test_negative_progress_clamps_to_zero() {
        let event = decode(r#"{"progress": -0.5}"#).expect("decode");
        assert_eq!(event.progress, Some(0.0));
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("[1, 2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(
            decode(r#"{"people_in_frame": "many"}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(decode_or_drop("garbage").is_none());
    }

    #[test]
    fn test_empty_object_is_noop() {
        let event = decode(r#"{"status": "ok"}"#).expect("decode");
        assert!(event.is_noop());
    }

    #[test]
    fn test_empty_image_string_is_absent() {
        let event = decode(r#"{"frame": ""}"#).expect("decode");
        assert!(event.frame_image.is_none());
    }
}
