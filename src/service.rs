//! Boundary operations consumed by the HTTP layer.
//!
//! `SafetyMonitor` validates uploads, runs the batch pipelines, exposes the
//! statistics and hands out streaming sessions. All collaborators are injected
//! so tests can swap in scripted detectors and synthetic media.

use std::sync::Arc;

use anyhow::Result;

use crate::annotate::ClassColorMap;
use crate::config::MonitorConfig;
use crate::detect::{DetectorSlot, DetectorStatus};
use crate::error::{MonitorError, MonitorResult};
use crate::ingest::{DeviceCameraOpener, FileVideoCodec, VideoCodec};
use crate::pipeline::{ImagePipeline, PipelineContext, VideoPipeline};
use crate::response::{ApiError, ImageResponse, ResetResponse, Upload, VideoResponse};
use crate::stats::{Aggregator, Stats};
use crate::storage::{extension_of, ArtifactStore, StoredUpload};
use crate::stream::{CameraRegistry, CancelToken, StreamingSession};

pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "avi", "mov", "mkv", "wmv", "flv"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UploadKind {
    Image,
    Video,
}

impl UploadKind {
    fn allowed(self) -> &'static [&'static str] {
        match self {
            UploadKind::Image => &IMAGE_EXTENSIONS,
            UploadKind::Video => &VIDEO_EXTENSIONS,
        }
    }

    fn rejection(self) -> &'static str {
        match self {
            UploadKind::Image => "Invalid file type",
            UploadKind::Video => "Invalid video file type",
        }
    }
}

pub struct SafetyMonitor {
    config: MonitorConfig,
    ctx: PipelineContext,
    images: ImagePipeline,
    videos: VideoPipeline,
    cameras: Arc<CameraRegistry>,
}

impl SafetyMonitor {
    /// Production wiring: ONNX model from `model_path`, FFmpeg video, V4L2 cameras.
    pub fn from_config(config: MonitorConfig) -> Result<Self> {
        let detector = model_slot(&config);
        let cameras = CameraRegistry::new(DeviceCameraOpener::new(config.camera));
        Self::with_components(config, detector, Arc::new(FileVideoCodec), cameras)
    }

    pub fn with_components(
        config: MonitorConfig,
        detector: DetectorSlot,
        codec: Arc<dyn VideoCodec>,
        cameras: Arc<CameraRegistry>,
    ) -> Result<Self> {
        let store = ArtifactStore::open(&config.upload_folder, &config.results_folder)?;
        let ctx = PipelineContext {
            detector: Arc::new(detector),
            aggregator: Arc::new(Aggregator::new(config.max_recent_detections)),
            colors: Arc::new(ClassColorMap::default()),
            store,
            thresholds: config.thresholds(),
            jpeg_quality: config.jpeg_quality,
        };
        Ok(Self {
            images: ImagePipeline::new(ctx.clone()),
            videos: VideoPipeline::new(ctx.clone(), codec),
            config,
            ctx,
            cameras,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.ctx.store
    }

    pub fn detector_status(&self) -> DetectorStatus {
        self.ctx.detector.status()
    }

    /// Load the detector now instead of on the first request.
    pub fn warm_up(&self) -> MonitorResult<()> {
        self.ctx.detector.get().map(|_| ())
    }

    pub fn upload_image(&self, upload: Upload) -> Result<ImageResponse, ApiError> {
        let stored = self.accept(&upload, UploadKind::Image)?;
        let outcome = self
            .images
            .process(&stored, upload.confidence_threshold)
            .map_err(|err| self.reject(&stored, err))?;
        Ok(ImageResponse::from(&outcome))
    }

    pub fn upload_video(&self, upload: Upload) -> Result<VideoResponse, ApiError> {
        let stored = self.accept(&upload, UploadKind::Video)?;
        let outcome = self
            .videos
            .process(&stored, upload.confidence_threshold)
            .map_err(|err| self.reject(&stored, err))?;
        Ok(VideoResponse::from(&outcome))
    }

    pub fn stats(&self) -> Stats {
        self.ctx.aggregator.snapshot()
    }

    /// Reset the statistics, then delete every stored upload and result.
    pub fn reset_stats(&self) -> Result<ResetResponse, ApiError> {
        self.ctx.aggregator.reset();
        let removed = self.ctx.store.purge().map_err(|err| {
            ApiError::from(MonitorError::storage_failure(format!(
                "Error during reset: {:#}",
                err
            )))
        })?;
        Ok(ResetResponse {
            success: true,
            message: format!("Statistics reset and {} stored files removed", removed),
        })
    }

    /// Session on the configured camera. Nothing is opened until the first part
    /// is requested.
    pub fn open_stream(&self) -> StreamingSession {
        self.open_stream_on(self.config.camera_index)
    }

    pub fn open_stream_on(&self, camera_index: u32) -> StreamingSession {
        StreamingSession::new(self.ctx.clone(), self.cameras.clone(), camera_index)
    }

    pub fn open_stream_with_cancel(&self, cancel: CancelToken) -> StreamingSession {
        self.open_stream().with_cancel_token(cancel)
    }

    fn accept(&self, upload: &Upload, kind: UploadKind) -> Result<StoredUpload, ApiError> {
        validate_upload(upload, kind, self.config.max_content_length)?;
        self.ctx
            .store
            .save_upload(&upload.filename, &upload.bytes)
            .map_err(|err| {
                log::error!("failed to store upload {:?}: {:#}", upload.filename, err);
                ApiError::from(MonitorError::storage_failure(format!("{:#}", err)))
            })
    }

    fn reject(&self, stored: &StoredUpload, err: MonitorError) -> ApiError {
        log::warn!("{}: request failed: {}", stored.name, err);
        self.ctx.store.remove(&stored.path);
        ApiError::from(err)
    }
}

fn validate_upload(upload: &Upload, kind: UploadKind, max_len: u64) -> MonitorResult<()> {
    if upload.filename.trim().is_empty() {
        return Err(MonitorError::invalid_input("No selected file"));
    }
    if upload.bytes.is_empty() {
        return Err(MonitorError::invalid_input("No file part"));
    }
    let allowed = extension_of(&upload.filename)
        .map(|ext| kind.allowed().contains(&ext.as_str()))
        .unwrap_or(false);
    if !allowed {
        return Err(MonitorError::invalid_input(kind.rejection()));
    }
    if upload.bytes.len() as u64 > max_len {
        return Err(MonitorError::invalid_input(format!(
            "File exceeds the {} byte upload limit",
            max_len
        )));
    }
    if let Some(threshold) = upload.confidence_threshold {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(MonitorError::invalid_input(format!(
                "confidence_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
    }
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn model_slot(config: &MonitorConfig) -> DetectorSlot {
    use crate::detect::{DetectorBackend, TractBackend};

    let path = config.model_path.clone();
    let input_size = config.model_input_size;
    DetectorSlot::new(move || {
        log::info!("loading model {}", path.display());
        Ok(Box::new(TractBackend::new(&path, input_size)?) as Box<dyn DetectorBackend>)
    })
}

#[cfg(not(feature = "backend-tract"))]
fn model_slot(config: &MonitorConfig) -> DetectorSlot {
    let path = config.model_path.clone();
    DetectorSlot::new(move || {
        anyhow::bail!(
            "cannot load {}: built without the backend-tract feature",
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn upload(name: &str) -> Upload {
        Upload::new(name, vec![1, 2, 3])
    }

    #[test]
    fn extension_rules_follow_upload_kind() {
        assert!(validate_upload(&upload("a.PNG"), UploadKind::Image, 16).is_ok());
        assert!(validate_upload(&upload("a.gif"), UploadKind::Image, 16).is_ok());
        assert!(validate_upload(&upload("a.mp4"), UploadKind::Image, 16).is_err());
        assert!(validate_upload(&upload("clip.MKV"), UploadKind::Video, 16).is_ok());
        let err = validate_upload(&upload("clip.png"), UploadKind::Video, 16).unwrap_err();
        assert_eq!(err.message, "Invalid video file type");
        assert!(validate_upload(&upload("noext"), UploadKind::Image, 16).is_err());
    }

    #[test]
    fn missing_payloads_are_invalid_input() {
        let err = validate_upload(&upload(""), UploadKind::Image, 16).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.message, "No selected file");
        let err = validate_upload(&Upload::new("a.png", Vec::new()), UploadKind::Image, 16)
            .unwrap_err();
        assert_eq!(err.message, "No file part");
    }

    #[test]
    fn size_limit_and_confidence_range_are_enforced() {
        assert!(validate_upload(&upload("a.png"), UploadKind::Image, 2).is_err());
        for bad in [0.0, -0.1, 1.5, f32::NAN] {
            let u = upload("a.png").with_confidence(bad);
            assert!(validate_upload(&u, UploadKind::Image, 16).is_err(), "{}", bad);
        }
        let u = upload("a.png").with_confidence(1.0);
        assert!(validate_upload(&u, UploadKind::Image, 16).is_ok());
    }
}
