use std::sync::Mutex;

use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, RawPrediction};
use crate::error::{ErrorKind, MonitorError, MonitorResult};

/// Detector adapter over a single backend instance.
///
/// The backend sits behind a `Mutex`: one shared detector serves every request and
/// streaming session, and inference calls are serialized.
pub struct Detector {
    name: &'static str,
    backend: Mutex<Box<dyn DetectorBackend>>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Detector {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            name: backend.name(),
            backend: Mutex::new(backend),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run one inference pass and normalize the result.
    pub fn infer(
        &self,
        frame: &RgbImage,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> MonitorResult<Vec<Detection>> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| MonitorError::inference_failure("detector lock poisoned"))?;
        let raw = backend
            .detect(frame, confidence_threshold, iou_threshold)
            .map_err(|err| {
                log::warn!("detector '{}' failed: {:#}", self.name, err);
                MonitorError::from_anyhow(ErrorKind::InferenceFailure, err)
            })?;
        Ok(normalize_predictions(&raw))
    }
}

/// Convert raw predictions, preserving order. Out-of-vocabulary classes are
/// dropped silently.
pub fn normalize_predictions(raw: &[RawPrediction]) -> Vec<Detection> {
    raw.iter().filter_map(Detection::from_prediction).collect()
}
