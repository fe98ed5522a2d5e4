//! Camera sources for live streaming.
//!
//! A `CameraOpener` turns a camera index into an exclusive `CameraSource`.
//! Dropping the source releases the device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::frame::Frame;

/// Requested capture geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// An opened camera producing frames in capture order.
pub trait CameraSource: Send {
    fn describe(&self) -> String;

    /// Block until the next frame is available. An error ends the stream.
    fn next_frame(&mut self) -> Result<Frame>;
}

pub trait CameraOpener: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn CameraSource>>;
}

/// Opens `/dev/video<index>` through V4L2.
pub struct DeviceCameraOpener {
    settings: CameraSettings,
}

impl DeviceCameraOpener {
    pub fn new(settings: CameraSettings) -> Self {
        Self { settings }
    }
}

impl CameraOpener for DeviceCameraOpener {
    #[cfg(feature = "ingest-v4l2")]
    fn open(&self, index: u32) -> Result<Box<dyn CameraSource>> {
        let camera = super::v4l2::V4l2Camera::open(index, self.settings)?;
        Ok(Box::new(camera))
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    fn open(&self, index: u32) -> Result<Box<dyn CameraSource>> {
        let _ = self.settings;
        Err(anyhow!(
            "camera {} unavailable: built without the ingest-v4l2 feature",
            index
        ))
    }
}

/// Generates moving test-pattern frames without hardware.
///
/// Tracks how many sources are currently open so callers can check that a
/// camera was released.
#[derive(Clone)]
pub struct SyntheticCameraOpener {
    settings: CameraSettings,
    frame_limit: Option<u64>,
    available: bool,
    open_count: Arc<AtomicUsize>,
}

impl SyntheticCameraOpener {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            frame_limit: None,
            available: true,
            open_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Camera that refuses to open, like a missing device.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(CameraSettings::default())
        }
    }

    /// Fail reads after `frames` frames, like an unplugged device.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Number of sources currently open.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCameraOpener {
    fn default() -> Self {
        Self::new(CameraSettings {
            width: 64,
            height: 48,
            fps: 30,
        })
    }
}

impl CameraOpener for SyntheticCameraOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CameraSource>> {
        if !self.available {
            return Err(anyhow!("camera {} could not be opened", index));
        }
        self.open_count.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "camera {}: opened synthetic source ({}x{})",
            index,
            self.settings.width,
            self.settings.height
        );
        Ok(Box::new(SyntheticCamera {
            index,
            settings: self.settings,
            frame_limit: self.frame_limit,
            produced: 0,
            open_count: self.open_count.clone(),
        }))
    }
}

struct SyntheticCamera {
    index: u32,
    settings: CameraSettings,
    frame_limit: Option<u64>,
    produced: u64,
    open_count: Arc<AtomicUsize>,
}

impl CameraSource for SyntheticCamera {
    fn describe(&self) -> String {
        format!("synthetic camera {}", self.index)
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if let Some(limit) = self.frame_limit {
            if self.produced >= limit {
                return Err(anyhow!("synthetic camera {} disconnected", self.index));
            }
        }
        let sequence = self.produced;
        self.produced += 1;
        Ok(Frame::new(
            test_pattern(self.settings.width, self.settings.height, sequence),
            sequence,
        ))
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.open_count.fetch_sub(1, Ordering::SeqCst);
        log::debug!("camera {}: released synthetic source", self.index);
    }
}

/// Gradient background with a bright bar that moves one column per frame.
pub fn test_pattern(width: u32, height: u32, sequence: u64) -> RgbImage {
    let bar = if width == 0 {
        0
    } else {
        (sequence % width as u64) as u32
    };
    RgbImage::from_fn(width, height, |x, y| {
        if x == bar {
            Rgb([255, 255, 255])
        } else {
            Rgb([(x * 4 % 256) as u8, (y * 4 % 256) as u8, 96])
        }
    })
}
