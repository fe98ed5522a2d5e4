mod backend;
mod backends;
mod detector;
mod nms;
mod result;
mod slot;

pub use backend::DetectorBackend;
pub use backends::{ScriptedBackend, ScriptedStep};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use detector::{normalize_predictions, Detector};
pub use nms::{iou, non_max_suppression};
pub use result::{Detection, RawPrediction};
pub use slot::{BackendLoader, DetectorSlot, DetectorStatus};
