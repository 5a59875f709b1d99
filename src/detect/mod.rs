mod backend;
pub mod backends;
mod loader;
mod result;

pub use backend::{DetectionParams, Detector, Size};
pub use backends::ScriptedDetector;
pub use loader::load_detector;
pub use result::{BoundingBox, DetectionResult};
