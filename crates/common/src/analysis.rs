//! Request/response contracts for whole-video analysis and the frame listing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::quadrants::QuadrantCounts;

/// Summary returned once a submitted video has been fully processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysis {
    /// Sum of people detected across all analysed frames
    pub total_people_detected: u64,

    /// Mean people per analysed frame, rounded to two decimals by the backend
    pub average_people_per_frame: f64,

    /// People count of each analysed frame, in processing order
    #[serde(default)]
    pub frame_wise_count: Vec<u32>,

    /// Wall-clock processing time in seconds
    pub processing_time_seconds: f64,

    /// Mean occupancy per quadrant over the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_quadrant_counts: Option<BTreeMap<String, f64>>,

    /// Per-quadrant overcrowding flag computed by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quadrant_alerts: Option<BTreeMap<String, bool>>,

    /// Rendered heatmap video, when the backend publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap_video_url: Option<String>,
}

impl VideoAnalysis {
    /// Quadrants the backend flagged as overcrowded over the whole run
    pub fn alerted_quadrants(&self) -> Vec<&str> {
        self.quadrant_alerts
            .iter()
            .flatten()
            .filter(|(_, alert)| **alert)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Frame with the highest people count, as (0-based index, count)
    pub fn peak_frame(&self) -> Option<(usize, u32)> {
        self.frame_wise_count
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|(_, count)| *count)
    }
}

/// Risk classification attached to stored frame records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

impl RiskLevel {
    pub fn is_elevated(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

/// One previously computed frame, as served by the frame listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Reference to the stored frame image
    pub image_url: String,

    #[serde(default)]
    pub quadrant_counts: QuadrantCounts,

    #[serde(default)]
    pub total_people: u32,

    /// Backend timestamp, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default = "default_risk_level")]
    pub risk_level: RiskLevel,
}

fn default_risk_level() -> RiskLevel {
    RiskLevel::Unknown
}

/// Liveness response of the backend root endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_analysis_from_backend_json() {
        let json = r#"{
            "total_people_detected": 42,
            "average_people_per_frame": 8.4,
            "frame_wise_count": [5, 9, 12, 8, 8],
            "processing_time_seconds": 3.21,
            "avg_quadrant_counts": {"q1": 2.5, "q2": 11.0},
            "quadrant_alerts": {"q1": false, "q2": true}
        }"#;

        let analysis: VideoAnalysis = serde_json::from_str(json).expect("parse");
        assert_eq!(analysis.total_people_detected, 42);
        assert_eq!(analysis.alerted_quadrants(), vec!["q2"]);
        assert_eq!(analysis.peak_frame(), Some((2, 12)));
        assert!(analysis.heatmap_video_url.is_none());
    }

    #[test]
    fn test_unknown_risk_level() {
        let json = r#"{"image_url": "/frames/1.jpg", "risk_level": "extreme"}"#;
        let record: FrameRecord = serde_json::from_str(json).expect("parse");
        assert_eq!(record.risk_level, RiskLevel::Unknown);
        assert_eq!(record.total_people, 0);
        assert!(record.quadrant_counts.is_empty());
    }

    #[test]
    fn test_elevated_risk() {
        assert!(RiskLevel::Critical.is_elevated());
        assert!(RiskLevel::High.is_elevated());
        assert!(!RiskLevel::Medium.is_elevated());
    }
}
