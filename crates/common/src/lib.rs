pub mod analysis;
pub mod backend;
pub mod frames;
pub mod quadrants;

pub use analysis::{BackendStatus, FrameRecord, RiskLevel, VideoAnalysis};
pub use backend::{BackendError, BackendResult, DetectionBackend, HttpDetectionBackend, VideoUpload};
pub use frames::FramePayload;
pub use quadrants::{QuadrantCounts, QuadrantId};
