//! Safety Monitor
//!
//! This crate implements the detection, annotation and aggregation pipeline behind
//! a site-safety (PPE) camera dashboard.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! 1. **Detector adapter** (`detect`): wraps a detection backend and normalizes its raw
//!    predictions into `Detection` records.
//! 2. **Annotator** (`annotate`): burns boxes and labels into a copy of a frame.
//! 3. **Aggregator** (`stats`): process-wide counters plus a bounded history window.
//! 4. **Batch pipelines** (`pipeline`): one still image, or every frame of a stored video.
//! 5. **Streaming session** (`stream`): a cancellable camera loop emitting a multipart
//!    JPEG stream.
//!
//! `service::SafetyMonitor` wires these together behind the upload, stats and stream
//! boundaries consumed by an HTTP layer that lives outside this crate.

pub mod annotate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod response;
pub mod service;
pub mod stats;
pub mod storage;
pub mod stream;

pub use annotate::{render, ClassColorMap, Color};
pub use config::MonitorConfig;
pub use detect::{
    Detection, Detector, DetectorBackend, DetectorSlot, DetectorStatus, RawPrediction,
    ScriptedBackend,
};
pub use error::{ErrorKind, MonitorError, MonitorResult, StatusClass};
pub use frame::Frame;
pub use pipeline::{ImageOutcome, ImagePipeline, PipelineContext, Thresholds, VideoOutcome, VideoPipeline};
pub use response::{ApiError, ErrorResponse, ImageResponse, ResetResponse, Upload, VideoResponse};
pub use service::SafetyMonitor;
pub use stats::{Aggregator, DetectionRecord, Stats};
pub use storage::ArtifactStore;
pub use stream::{CameraRegistry, CancelToken, SessionState, StopReason, StreamingSession};

/// Fixed safety-category vocabulary. Index order matches the model's class ids.
pub const CLASSES: [&str; 4] = ["no helmet", "no jacket", "safe", "unsafe"];

/// Class name for a model class index, if it is part of the vocabulary.
pub fn class_name(index: usize) -> Option<&'static str> {
    CLASSES.get(index).copied()
}

pub fn is_known_class(name: &str) -> bool {
    CLASSES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_lookup_is_bounded() {
        assert_eq!(class_name(0), Some("no helmet"));
        assert_eq!(class_name(3), Some("unsafe"));
        assert_eq!(class_name(4), None);
        assert!(is_known_class("safe"));
        assert!(!is_known_class("person"));
    }
}
