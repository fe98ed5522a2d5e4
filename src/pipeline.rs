//! Batch pipelines over stored uploads.
//!
//! Image: decode, infer, record, render, encode and persist.
//! Video: decode every frame, infer and render each, write the annotated video,
//! then reopen the output and take its first frame as a JPEG preview.
//!
//! Any failure aborts the request and removes artifacts written so far.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::annotate::{render, ClassColorMap};
use crate::detect::{Detection, Detector, DetectorSlot};
use crate::error::{ErrorKind, MonitorError, MonitorResult};
use crate::frame::{decode_image, encode_for_extension, encode_jpeg};
use crate::ingest::{VideoCodec, VideoWriter};
use crate::stats::Aggregator;
use crate::storage::{ArtifactStore, StoredUpload};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            iou: 0.4,
        }
    }
}

/// Shared collaborators handed to every pipeline run.
#[derive(Clone)]
pub struct PipelineContext {
    pub detector: Arc<DetectorSlot>,
    pub aggregator: Arc<Aggregator>,
    pub colors: Arc<ClassColorMap>,
    pub store: ArtifactStore,
    pub thresholds: Thresholds,
    pub jpeg_quality: u8,
}

impl PipelineContext {
    fn confidence(&self, override_threshold: Option<f32>) -> f32 {
        override_threshold.unwrap_or(self.thresholds.confidence)
    }

    fn detector(&self) -> MonitorResult<Arc<Detector>> {
        self.detector.get()
    }
}

#[derive(Clone, Debug)]
pub struct ImageOutcome {
    pub detections: Vec<Detection>,
    pub result_name: String,
    pub result_path: PathBuf,
    /// Encoded annotated image, exactly as persisted.
    pub encoded: Vec<u8>,
}

pub struct ImagePipeline {
    ctx: PipelineContext,
}

impl ImagePipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn process(
        &self,
        upload: &StoredUpload,
        confidence_threshold: Option<f32>,
    ) -> MonitorResult<ImageOutcome> {
        let detector = self.ctx.detector()?;
        let bytes = fs::read(&upload.path).map_err(|err| {
            MonitorError::storage_failure(format!("failed to read {}: {}", upload.name, err))
        })?;
        let frame = decode_image(&bytes)?;

        let detections = detector.infer(
            &frame,
            self.ctx.confidence(confidence_threshold),
            self.ctx.thresholds.iou,
        )?;
        self.ctx.aggregator.record(&detections);
        log::info!("{}: {} detections", upload.name, detections.len());

        let annotated = render(&frame, &detections, &self.ctx.colors);
        let extension = upload.extension().unwrap_or_else(|| "jpg".to_string());
        let encoded = encode_for_extension(&annotated, &extension, self.ctx.jpeg_quality)
            .map_err(|err| MonitorError::from_anyhow(ErrorKind::EncodingFailure, err))?;

        let result_name = self.ctx.store.result_name_for(&upload.name);
        let result_path = self
            .ctx
            .store
            .write_result(&result_name, &encoded)
            .map_err(|err| {
                self.ctx.store.remove(&self.ctx.store.result_path(&result_name));
                MonitorError::from_anyhow(ErrorKind::StorageFailure, err)
            })?;

        Ok(ImageOutcome {
            detections,
            result_name,
            result_path,
            encoded,
        })
    }
}

#[derive(Clone, Debug)]
pub struct VideoOutcome {
    pub video_name: String,
    pub video_path: PathBuf,
    /// JPEG of the first frame of the written output.
    pub preview: Vec<u8>,
    pub preview_name: String,
    pub frames: u64,
    pub total_detections: u64,
}

pub struct VideoPipeline {
    ctx: PipelineContext,
    codec: Arc<dyn VideoCodec>,
}

impl VideoPipeline {
    pub fn new(ctx: PipelineContext, codec: Arc<dyn VideoCodec>) -> Self {
        Self { ctx, codec }
    }

    /// Annotate every frame of a stored video.
    ///
    /// Does not touch the aggregator; statistics track image uploads only.
    pub fn process(
        &self,
        upload: &StoredUpload,
        confidence_threshold: Option<f32>,
    ) -> MonitorResult<VideoOutcome> {
        let detector = self.ctx.detector()?;
        let video_name = format!(
            "{}.{}",
            self.ctx.store.result_name_for(upload.stem()),
            self.codec.output_extension()
        );
        let video_path = self.ctx.store.result_path(&video_name);
        let preview_name = format!(
            "{}_preview.jpg",
            self.ctx.store.result_name_for(upload.stem())
        );
        let preview_path = self.ctx.store.result_path(&preview_name);

        let result = self
            .annotate_video(upload, &detector, confidence_threshold, &video_path)
            .and_then(|(frames, total_detections)| {
                let preview = self.first_frame_preview(&video_path)?;
                fs::write(&preview_path, &preview).map_err(|err| {
                    MonitorError::storage_failure(format!(
                        "failed to write {}: {}",
                        preview_name, err
                    ))
                })?;
                Ok((frames, total_detections, preview))
            });

        match result {
            Ok((frames, total_detections, preview)) => {
                log::info!(
                    "{}: annotated {} frames ({} detections) -> {}",
                    upload.name,
                    frames,
                    total_detections,
                    video_name
                );
                Ok(VideoOutcome {
                    video_name,
                    video_path,
                    preview,
                    preview_name,
                    frames,
                    total_detections,
                })
            }
            Err(err) => {
                log::warn!("{}: video processing failed: {}", upload.name, err);
                self.ctx.store.remove(&video_path);
                self.ctx.store.remove(&preview_path);
                Err(err)
            }
        }
    }

    fn annotate_video(
        &self,
        upload: &StoredUpload,
        detector: &Detector,
        confidence_threshold: Option<f32>,
        output: &std::path::Path,
    ) -> MonitorResult<(u64, u64)> {
        let mut reader = self.codec.open_reader(&upload.path).map_err(|err| {
            MonitorError::invalid_input(format!("video could not be opened: {:#}", err))
        })?;
        let info = reader.info();
        let confidence = self.ctx.confidence(confidence_threshold);

        let mut writer: Option<Box<dyn VideoWriter>> = None;
        let mut frames = 0u64;
        let mut total_detections = 0u64;
        while let Some(frame) = reader
            .next_frame()
            .map_err(|err| MonitorError::from_anyhow(ErrorKind::InvalidInput, err))?
        {
            let detections = detector.infer(frame.image(), confidence, self.ctx.thresholds.iou)?;
            total_detections += detections.len() as u64;
            let annotated = render(frame.image(), &detections, &self.ctx.colors);

            if writer.is_none() {
                writer = Some(
                    self.codec
                        .create_writer(output, info)
                        .map_err(|err| MonitorError::from_anyhow(ErrorKind::EncodingFailure, err))?,
                );
            }
            if let Some(sink) = writer.as_mut() {
                sink.write_frame(&annotated)
                    .map_err(|err| MonitorError::from_anyhow(ErrorKind::EncodingFailure, err))?;
            }
            frames += 1;
            if frames % 100 == 0 {
                log::debug!("{}: {} frames annotated", upload.name, frames);
            }
        }

        match writer {
            Some(sink) => sink
                .finish()
                .map_err(|err| MonitorError::from_anyhow(ErrorKind::EncodingFailure, err))?,
            None => return Err(MonitorError::invalid_input("video contains no frames")),
        }
        Ok((frames, total_detections))
    }

    fn first_frame_preview(&self, output: &std::path::Path) -> MonitorResult<Vec<u8>> {
        let mut reader = self
            .codec
            .open_reader(output)
            .map_err(|err| MonitorError::from_anyhow(ErrorKind::EncodingFailure, err))?;
        let frame = reader
            .next_frame()
            .map_err(|err| MonitorError::from_anyhow(ErrorKind::EncodingFailure, err))?
            .ok_or_else(|| MonitorError::encoding_failure("annotated video has no frames"))?;
        encode_jpeg(frame.image(), self.ctx.jpeg_quality)
            .map_err(|err| MonitorError::from_anyhow(ErrorKind::EncodingFailure, err))
    }
}
