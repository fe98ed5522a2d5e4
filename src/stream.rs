//! Live camera streaming as a multipart JPEG sequence.
//!
//! A `StreamingSession` moves `Idle -> CameraAcquiring -> Running -> Stopped`.
//! While running it reads a frame, runs the shared detector, renders the overlay
//! and emits one multipart part per frame, in capture order. Statistics are not
//! recorded for streamed frames.
//!
//! The camera is held through a `CameraLease` from a `CameraRegistry`; only one
//! session may hold a given camera index, and the lease is released whenever the
//! session stops or is dropped.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::annotate::render;
use crate::detect::Detector;
use crate::error::MonitorError;
use crate::frame::encode_jpeg;
use crate::ingest::{CameraOpener, CameraSource};
use crate::pipeline::PipelineContext;

/// Multipart boundary token.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the streaming response.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG as a multipart part:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn frame_part(jpeg: &[u8]) -> Vec<u8> {
    let head = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut part = Vec::with_capacity(head.len() + jpeg.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CameraAcquiring,
    Running,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The camera could not be opened.
    CameraUnavailable(String),
    /// Another session holds the camera.
    CameraBusy,
    ModelUnavailable(String),
    /// A frame read failed (device gone, end of stream).
    CameraExhausted(String),
    Cancelled,
    ConsumerDisconnected,
}

/// Cooperative cancellation shared between a session and its controller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    Busy(u32),
    OpenFailed(u32, String),
}

impl From<LeaseError> for MonitorError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Busy(index) => {
                MonitorError::resource_unavailable(format!("camera {} is already streaming", index))
            }
            LeaseError::OpenFailed(index, reason) => MonitorError::resource_unavailable(format!(
                "camera {} could not be opened: {}",
                index, reason
            )),
        }
    }
}

/// Hands out exclusive camera leases by index.
pub struct CameraRegistry {
    opener: Box<dyn CameraOpener>,
    leased: Mutex<HashSet<u32>>,
}

impl CameraRegistry {
    pub fn new<O: CameraOpener + 'static>(opener: O) -> Arc<Self> {
        Arc::new(Self {
            opener: Box::new(opener),
            leased: Mutex::new(HashSet::new()),
        })
    }

    pub fn is_leased(&self, index: u32) -> bool {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&index)
    }

    /// Open camera `index` exclusively.
    pub fn acquire(self: &Arc<Self>, index: u32) -> Result<CameraLease, LeaseError> {
        if !self
            .leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index)
        {
            return Err(LeaseError::Busy(index));
        }
        match self.opener.open(index) {
            Ok(source) => Ok(CameraLease {
                registry: Arc::clone(self),
                index,
                source: Some(source),
            }),
            Err(err) => {
                self.release(index);
                Err(LeaseError::OpenFailed(index, format!("{:#}", err)))
            }
        }
    }

    fn release(&self, index: u32) {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index);
    }
}

/// An open camera. Closing the device and freeing the index happen on drop.
pub struct CameraLease {
    registry: Arc<CameraRegistry>,
    index: u32,
    source: Option<Box<dyn CameraSource>>,
}

impl CameraLease {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn source(&mut self) -> Option<&mut (dyn CameraSource + 'static)> {
        self.source.as_deref_mut()
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        // Close the device before the index can be leased again.
        self.source.take();
        self.registry.release(self.index);
        log::debug!("camera {} released", self.index);
    }
}

pub struct StreamingSession {
    ctx: PipelineContext,
    registry: Arc<CameraRegistry>,
    camera_index: u32,
    cancel: CancelToken,
    state: SessionState,
    stop_reason: Option<StopReason>,
    lease: Option<CameraLease>,
    detector: Option<Arc<Detector>>,
    frames_emitted: u64,
    frames_skipped: u64,
}

impl StreamingSession {
    pub fn new(ctx: PipelineContext, registry: Arc<CameraRegistry>, camera_index: u32) -> Self {
        Self {
            ctx,
            registry,
            camera_index,
            cancel: CancelToken::new(),
            state: SessionState::Idle,
            stop_reason: None,
            lease: None,
            detector: None,
            frames_emitted: 0,
            frames_skipped: 0,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Acquire the camera and the detector. On failure the session ends in
    /// `Stopped` without emitting anything.
    pub fn start(&mut self) -> SessionState {
        if self.state != SessionState::Idle {
            return self.state;
        }
        self.transition(SessionState::CameraAcquiring);

        let lease = match self.registry.acquire(self.camera_index) {
            Ok(lease) => lease,
            Err(LeaseError::Busy(_)) => {
                self.stop(StopReason::CameraBusy);
                return self.state;
            }
            Err(LeaseError::OpenFailed(_, reason)) => {
                self.stop(StopReason::CameraUnavailable(reason));
                return self.state;
            }
        };
        self.lease = Some(lease);

        match self.ctx.detector.get() {
            Ok(detector) => self.detector = Some(detector),
            Err(err) => {
                self.stop(StopReason::ModelUnavailable(err.message));
                return self.state;
            }
        }

        if self.cancel.is_cancelled() {
            self.stop(StopReason::Cancelled);
        } else {
            self.transition(SessionState::Running);
        }
        self.state
    }

    /// Produce the next multipart part, or `None` once the session has stopped.
    ///
    /// Frames whose inference or encoding fails are skipped.
    pub fn next_part(&mut self) -> Option<Vec<u8>> {
        if self.state == SessionState::Idle {
            self.start();
        }
        while self.state == SessionState::Running {
            if self.cancel.is_cancelled() {
                self.stop(StopReason::Cancelled);
                break;
            }
            let frame = match self.lease.as_mut().and_then(|lease| lease.source()) {
                Some(source) => source.next_frame(),
                None => {
                    self.stop(StopReason::CameraExhausted("camera not open".to_string()));
                    break;
                }
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    self.stop(StopReason::CameraExhausted(format!("{:#}", err)));
                    break;
                }
            };
            let Some(detector) = self.detector.as_ref() else {
                self.stop(StopReason::ModelUnavailable("detector released".to_string()));
                break;
            };

            let detections = match detector.infer(
                frame.image(),
                self.ctx.thresholds.confidence,
                self.ctx.thresholds.iou,
            ) {
                Ok(detections) => detections,
                Err(err) => {
                    self.frames_skipped += 1;
                    log::warn!("stream frame {} skipped: {}", frame.sequence(), err);
                    continue;
                }
            };
            let annotated = render(frame.image(), &detections, &self.ctx.colors);
            match encode_jpeg(&annotated, self.ctx.jpeg_quality) {
                Ok(jpeg) => {
                    self.frames_emitted += 1;
                    log::trace!(
                        "stream frame {} ready {:?} after capture",
                        frame.sequence(),
                        frame.captured_at().elapsed()
                    );
                    return Some(frame_part(&jpeg));
                }
                Err(err) => {
                    self.frames_skipped += 1;
                    log::warn!("stream frame {} skipped: {:#}", frame.sequence(), err);
                }
            }
        }
        None
    }

    /// Stream parts into `out` until the session stops. A failed write is
    /// treated as the consumer going away. Returns the number of frames emitted.
    pub fn run<W: Write>(&mut self, out: &mut W) -> u64 {
        while let Some(part) = self.next_part() {
            if let Err(err) = out.write_all(&part).and_then(|_| out.flush()) {
                log::info!("stream consumer went away: {}", err);
                self.stop(StopReason::ConsumerDisconnected);
                break;
            }
            if self.cancel.is_cancelled() {
                self.stop(StopReason::Cancelled);
            }
        }
        self.frames_emitted
    }

    /// End the session and release the camera. Idempotent.
    pub fn stop(&mut self, reason: StopReason) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.lease = None;
        self.detector = None;
        log::info!(
            "stream on camera {} stopped after {} frames ({} skipped): {:?}",
            self.camera_index,
            self.frames_emitted,
            self.frames_skipped,
            reason
        );
        self.stop_reason = Some(reason);
        self.state = SessionState::Stopped;
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!(
            "stream on camera {}: {:?} -> {:?}",
            self.camera_index,
            self.state,
            next
        );
        self.state = next;
    }
}

impl Iterator for StreamingSession {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_part()
    }
}
