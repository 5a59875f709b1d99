#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionParams, Detector};
use crate::detect::result::{BoundingBox, DetectionResult};
use crate::frame::GrayFrame;

const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based single-shot detector for ONNX models.
///
/// The model takes a `1x1xHxW` grayscale tensor in `0..1` and returns rows of
/// `[x, y, w, h, score]` in model input pixels. Boxes are rescaled to the frame,
/// filtered by score and size bounds, and de-duplicated with IoU suppression.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    score_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 1, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        })
    }

    /// Override the default score threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Nearest-neighbour resample of the frame into the model input tensor.
    fn build_input(&self, frame: &GrayFrame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let (in_w, in_h) = (self.input_width as usize, self.input_height as usize);
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 1, in_h, in_w), |(_, _, y, x)| {
            let sx = x * src_w / in_w;
            let sy = y * src_h / in_h;
            pixels[sy * src_w + sx] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &GrayFrame,
        params: &DetectionParams,
    ) -> Result<Vec<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = rows.iter().copied().collect();
        if flat.len() % 5 != 0 {
            return Err(anyhow!(
                "model output has {} values, expected rows of 5",
                flat.len()
            ));
        }

        let sx = frame.width as f32 / self.input_width as f32;
        let sy = frame.height as f32 / self.input_height as f32;
        let mut scored: Vec<(f32, BoundingBox)> = flat
            .chunks_exact(5)
            .filter(|row| row[4].is_finite() && row[4] >= self.score_threshold)
            .map(|row| {
                let bbox = BoundingBox::new(
                    (row[0] * sx).round() as i32,
                    (row[1] * sy).round() as i32,
                    (row[2] * sx).max(0.0).round() as u32,
                    (row[3] * sy).max(0.0).round() as u32,
                );
                (row[4], bbox)
            })
            .filter(|(_, b)| params.accepts_size(b.width, b.height))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let mut kept: Vec<BoundingBox> = Vec::new();
        for (_, candidate) in scored {
            if kept.iter().all(|k| k.iou(&candidate) < NMS_IOU_THRESHOLD) {
                kept.push(candidate);
            }
        }
        Ok(kept)
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &GrayFrame, params: &DetectionParams) -> Result<DetectionResult> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(DetectionResult::new(self.decode(outputs, frame, params)?))
    }
}
