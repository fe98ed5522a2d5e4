//! Frame sources and sinks.
//!
//! - Cameras for live streaming (`camera`): V4L2 devices (feature: ingest-v4l2)
//!   and a synthetic test-pattern source.
//! - Stored video (`video`): FFmpeg reader/writer (feature: video-ffmpeg) and a
//!   synthetic raw container used in tests.
//!
//! Every source yields RGB `Frame`s in capture order.

pub mod camera;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;
pub mod video;
#[cfg(feature = "video-ffmpeg")]
mod video_ffmpeg;

pub use camera::{
    CameraOpener, CameraSettings, CameraSource, DeviceCameraOpener, SyntheticCameraOpener,
};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;
pub use video::{
    FileVideoCodec, SyntheticVideoCodec, VideoCodec, VideoInfo, VideoReader, VideoWriter,
};
