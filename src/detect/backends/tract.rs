#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::RawPrediction;

const LETTERBOX_FILL: u8 = 114;

/// Tract-based backend for YOLOv8-style ONNX detection models.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` (or its transpose)
/// with boxes in center/size form, relative to the letterboxed square input.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

/// Scale and padding applied when letterboxing a frame into the model input.
#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(anyhow!("model file not found: {}", model_path.display()));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(&self, canvas: &RgbImage) -> Tensor {
        let side = self.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: Letterbox,
        frame_width: u32,
        frame_height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<RawPrediction>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // [1, attrs, anchors] is the usual export; some exports are transposed.
        let transposed = shape[1] > shape[2];
        let (attrs, anchors) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if attrs < 5 {
            return Err(anyhow!("model output has {} attributes, need at least 5", attrs));
        }
        let value = |attr: usize, anchor: usize| -> f32 {
            if transposed {
                view[[0, anchor, attr]]
            } else {
                view[[0, attr, anchor]]
            }
        };

        let max_x = frame_width as f32;
        let max_y = frame_height as f32;
        let mut predictions = Vec::new();
        for anchor in 0..anchors {
            let (class_index, confidence) = (4..attrs)
                .map(|attr| (attr - 4, value(attr, anchor)))
                .fold((0usize, f32::NEG_INFINITY), |best, candidate| {
                    if candidate.1 > best.1 {
                        candidate
                    } else {
                        best
                    }
                });
            if !confidence.is_finite() || confidence < confidence_threshold {
                continue;
            }

            let cx = value(0, anchor);
            let cy = value(1, anchor);
            let w = value(2, anchor);
            let h = value(3, anchor);
            let unmap_x = |x: f32| ((x - letterbox.pad_x) / letterbox.scale).clamp(0.0, max_x);
            let unmap_y = |y: f32| ((y - letterbox.pad_y) / letterbox.scale).clamp(0.0, max_y);

            predictions.push(RawPrediction {
                x1: unmap_x(cx - w / 2.0),
                y1: unmap_y(cy - h / 2.0),
                x2: unmap_x(cx + w / 2.0),
                y2: unmap_y(cy + h / 2.0),
                confidence,
                class_index,
            });
        }
        Ok(predictions)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<RawPrediction>> {
        let (canvas, letterbox) = letterbox(frame, self.input_size)?;
        let input = self.build_input(&canvas);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let mut predictions = self.decode(
            outputs,
            letterbox,
            frame.width(),
            frame.height(),
            confidence_threshold,
        )?;
        non_max_suppression(&mut predictions, iou_threshold);
        Ok(predictions)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank, 1.0, 1.0).context("warm-up inference failed")?;
        Ok(())
    }
}

/// Resize `frame` into an `input_size` square, preserving aspect ratio.
fn letterbox(frame: &RgbImage, input_size: u32) -> Result<(RgbImage, Letterbox)> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("frame has zero size"));
    }
    let side = input_size as f32;
    let scale = (side / width as f32).min(side / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size);
    let resized = image::imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let pad_x = (input_size - new_w) / 2;
    let pad_y = (input_size - new_h) / 2;
    let mut canvas = RgbImage::from_pixel(
        input_size,
        input_size,
        Rgb([LETTERBOX_FILL; 3]),
    );
    image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Ok((
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_centers_wide_frames() -> Result<()> {
        let frame = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
        let (canvas, lb) = letterbox(&frame, 64)?;
        assert_eq!(canvas.dimensions(), (64, 64));
        assert!((lb.scale - 0.32).abs() < 1e-6);
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 16.0));
        assert_eq!(canvas.get_pixel(32, 2), &Rgb([LETTERBOX_FILL; 3]));
        assert_eq!(canvas.get_pixel(32, 32), &Rgb([10, 20, 30]));
        Ok(())
    }

    #[test]
    fn letterbox_rejects_empty_frames() {
        assert!(letterbox(&RgbImage::new(0, 10), 64).is_err());
    }

    #[test]
    fn missing_model_file_is_reported() {
        let err = TractBackend::new("/nonexistent/best.onnx", 640).err().unwrap();
        assert!(err.to_string().contains("model file not found"));
    }
}
