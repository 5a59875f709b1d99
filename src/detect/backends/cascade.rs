#![cfg(feature = "backend-opencv")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use opencv::core::{Mat, Rect, Size as CvSize, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;

use crate::detect::backend::{DetectionParams, Detector};
use crate::detect::result::{BoundingBox, DetectionResult};
use crate::frame::GrayFrame;

/// Haar/LBP cascade classifier loaded from an OpenCV XML model.
///
/// Runs `detect_multi_scale` with every field of `DetectionParams`.
pub struct CascadeBackend {
    classifier: CascadeClassifier,
}

impl CascadeBackend {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let path = model_path
            .to_str()
            .ok_or_else(|| anyhow!("cascade path is not valid UTF-8"))?;
        let classifier = CascadeClassifier::new(path)
            .with_context(|| format!("failed to load cascade from {}", model_path.display()))?;
        if classifier.empty()? {
            return Err(anyhow!(
                "cascade file {} contains no classifier",
                model_path.display()
            ));
        }
        Ok(Self { classifier })
    }
}

impl Detector for CascadeBackend {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn detect(&mut self, frame: &GrayFrame, params: &DetectionParams) -> Result<DetectionResult> {
        let image = Mat::new_rows_cols_with_data(
            frame.height as i32,
            frame.width as i32,
            frame.pixels(),
        )
        .context("wrap grayscale frame for opencv")?;

        let mut rects = Vector::<Rect>::new();
        self.classifier
            .detect_multi_scale(
                &*image,
                &mut rects,
                params.scale_factor,
                params.min_neighbors as i32,
                0,
                CvSize::new(params.min_size.width as i32, params.min_size.height as i32),
                CvSize::new(params.max_size.width as i32, params.max_size.height as i32),
            )
            .context("cascade detect_multi_scale failed")?;

        let boxes = rects
            .iter()
            .map(|r| BoundingBox::new(r.x, r.y, r.width.max(0) as u32, r.height.max(0) as u32))
            .collect();
        Ok(DetectionResult::new(boxes))
    }
}
