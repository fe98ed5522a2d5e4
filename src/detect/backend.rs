use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawPrediction;

/// Detection capability trait.
///
/// A backend wraps one loaded model. `detect` takes `&mut self`, so a backend is
/// never entered from two threads at once; `Detector` serializes access with a mutex.
///
/// Backends own thresholding and non-max suppression. Predictions are returned in
/// the order the model emits them and are normalized by the `Detector` adapter.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a single RGB frame.
    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<RawPrediction>>;

    /// Optional warm-up hook, called once after construction.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
