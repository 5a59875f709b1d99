use std::path::Path;

use crate::detect::backend::Detector;
use crate::detect::backends::ScriptedDetector;
use crate::error::EngineError;

/// Model input size for ONNX detectors.
#[cfg(feature = "backend-tract")]
const TRACT_INPUT_SIZE: (u32, u32) = (640, 640);

/// Load a detector from a model path.
///
/// - `stub://name?counts=...` → scripted detector
/// - `*.xml` → OpenCV cascade (feature: backend-opencv)
/// - `*.onnx` → tract ONNX detector (feature: backend-tract)
pub fn load_detector(model_path: &str) -> Result<Box<dyn Detector>, EngineError> {
    if model_path.starts_with("stub://") {
        let detector = ScriptedDetector::from_model_path(model_path)
            .map_err(|e| EngineError::detector_load(model_path, e))?;
        return Ok(Box::new(detector));
    }

    let path = Path::new(model_path);
    if !path.is_file() {
        return Err(EngineError::detector_load(model_path, "model file not found"));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("xml") => load_cascade(model_path),
        Some("onnx") => load_onnx(model_path),
        _ => Err(EngineError::detector_load(
            model_path,
            "unsupported model format (expected .xml cascade or .onnx)",
        )),
    }
}

#[cfg(feature = "backend-opencv")]
fn load_cascade(model_path: &str) -> Result<Box<dyn Detector>, EngineError> {
    let backend = crate::detect::backends::CascadeBackend::new(model_path)
        .map_err(|e| EngineError::detector_load(model_path, format!("{:#}", e)))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-opencv"))]
fn load_cascade(model_path: &str) -> Result<Box<dyn Detector>, EngineError> {
    Err(EngineError::detector_load(
        model_path,
        "cascade models require the backend-opencv feature",
    ))
}

#[cfg(feature = "backend-tract")]
fn load_onnx(model_path: &str) -> Result<Box<dyn Detector>, EngineError> {
    let (width, height) = TRACT_INPUT_SIZE;
    let backend = crate::detect::backends::TractBackend::new(model_path, width, height)
        .map_err(|e| EngineError::detector_load(model_path, format!("{:#}", e)))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(model_path: &str) -> Result<Box<dyn Detector>, EngineError> {
    Err(EngineError::detector_load(
        model_path,
        "ONNX models require the backend-tract feature",
    ))
}
