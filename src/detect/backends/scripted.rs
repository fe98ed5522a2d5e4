use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawPrediction;

/// One scripted inference outcome.
#[derive(Clone, Debug)]
pub enum ScriptedStep {
    Predict(Vec<RawPrediction>),
    Fail(String),
}

/// Backend that replays scripted predictions instead of running a model.
///
/// Queued steps are consumed one per `detect` call; once the queue is empty every
/// call returns the fallback outcome. Predictions below the confidence threshold are
/// filtered out, as a model backend would.
pub struct ScriptedBackend {
    steps: VecDeque<ScriptedStep>,
    fallback: ScriptedStep,
}

impl ScriptedBackend {
    pub fn new(predictions: Vec<RawPrediction>) -> Self {
        Self {
            steps: VecDeque::new(),
            fallback: ScriptedStep::Predict(predictions),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Backend whose every call fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            steps: VecDeque::new(),
            fallback: ScriptedStep::Fail(message.into()),
        }
    }

    /// Queue outcomes to replay before the fallback.
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = ScriptedStep>) -> Self {
        self.steps.extend(steps);
        self
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(
        &mut self,
        _frame: &RgbImage,
        confidence_threshold: f32,
        _iou_threshold: f32,
    ) -> Result<Vec<RawPrediction>> {
        let step = self.steps.pop_front().unwrap_or_else(|| self.fallback.clone());
        match step {
            ScriptedStep::Predict(predictions) => Ok(predictions
                .into_iter()
                .filter(|p| p.confidence >= confidence_threshold)
                .collect()),
            ScriptedStep::Fail(message) => Err(anyhow!(message)),
        }
    }
}
