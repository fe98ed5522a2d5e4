use serde::{Deserialize, Serialize};

use crate::class_name;

/// Prediction as emitted by a backend: corner coordinates in frame pixels,
/// a score and a class index that has not been checked against the vocabulary.
#[derive(Clone, Debug, PartialEq)]
pub struct RawPrediction {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_index: usize,
}

impl RawPrediction {
    pub fn new(bbox: [f32; 4], confidence: f32, class_index: usize) -> Self {
        Self {
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
            confidence,
            class_index,
        }
    }
}

/// One localized, classified prediction for a single frame.
///
/// Invariants: `x1 < x2`, `y1 < y2`, `class` is one of `CLASSES`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [i32; 4],
    pub confidence: f32,
    pub class: String,
}

impl Detection {
    /// Normalize a raw prediction. Returns `None` for class indices outside the
    /// vocabulary and for boxes that collapse once truncated to integer pixels.
    pub fn from_prediction(prediction: &RawPrediction) -> Option<Self> {
        let class = class_name(prediction.class_index)?;
        let bbox = [
            prediction.x1 as i32,
            prediction.y1 as i32,
            prediction.x2 as i32,
            prediction.y2 as i32,
        ];
        if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
            return None;
        }
        Some(Self {
            bbox,
            confidence: prediction.confidence.clamp(0.0, 1.0),
            class: class.to_string(),
        })
    }

    pub fn x1(&self) -> i32 {
        self.bbox[0]
    }

    pub fn y1(&self) -> i32 {
        self.bbox[1]
    }

    pub fn x2(&self) -> i32 {
        self.bbox[2]
    }

    pub fn y2(&self) -> i32 {
        self.bbox[3]
    }

    /// Overlay label, e.g. `"safe: 0.87"`.
    pub fn label(&self) -> String {
        format!("{}: {:.2}", self.class, self.confidence)
    }
}
