use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::GrayFrame;

/// Width × height in native image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Sensitivity knobs handed to every detector call.
///
/// Backends use the parameters they understand: a cascade classifier uses all
/// four, a single-shot model only filters on the size bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionParams {
    /// Image pyramid step between scales.
    pub scale_factor: f64,
    /// Neighbouring hits required to keep a candidate.
    pub min_neighbors: u32,
    pub min_size: Size,
    pub max_size: Size,
}

impl DetectionParams {
    /// Tuned for whole vehicles seen by a lot camera at 1080p.
    pub const VEHICLE: DetectionParams = DetectionParams {
        scale_factor: 1.025,
        min_neighbors: 37,
        min_size: Size::new(250, 250),
        max_size: Size::new(600, 600),
    };

    /// True when the box fits within the size bounds (a zero max means unbounded).
    pub fn accepts_size(&self, width: u32, height: u32) -> bool {
        if width < self.min_size.width || height < self.min_size.height {
            return false;
        }
        let unbounded = self.max_size.width == 0 || self.max_size.height == 0;
        unbounded || (width <= self.max_size.width && height <= self.max_size.height)
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self::VEHICLE
    }
}

/// Object detector capability.
///
/// Given a grayscale frame, returns the boxes of candidate objects. Any
/// implementation with this contract can drive the engine: a cascade
/// classifier, a learned model, or a scripted stub.
pub trait Detector: Send {
    /// Backend identifier, for logs.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. The frame is borrowed for the call only.
    fn detect(&mut self, frame: &GrayFrame, params: &DetectionParams) -> Result<DetectionResult>;

    /// Optional warm-up hook, run once before the first cycle.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_params_bound_box_sizes() {
        let params = DetectionParams::VEHICLE;
        assert!(params.accepts_size(250, 250));
        assert!(params.accepts_size(600, 400));
        assert!(!params.accepts_size(249, 300));
        assert!(!params.accepts_size(601, 300));
    }

    #[test]
    fn zero_max_size_is_unbounded() {
        let params = DetectionParams {
            max_size: Size::new(0, 0),
            ..DetectionParams::VEHICLE
        };
        assert!(params.accepts_size(4000, 4000));
    }
}
