//! Failure taxonomy for the occupancy engine.
//!
//! Construction-time failures (`SourceUnavailable`, `DetectorLoad`) surface to the
//! caller. Steady-state failures inside the loops are contained and logged; they
//! never reach this type except as the reason the engine stopped.

/// Errors the engine reports to its caller.
///
/// These travel inside `anyhow::Error` at API boundaries and can be recovered
/// with `downcast_ref::<EngineError>()`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The video source could not be opened or read.
    #[error("video source '{path}' unavailable: {reason}")]
    SourceUnavailable { path: String, reason: String },

    /// The detector model is missing, unsupported or failed to load.
    #[error("detector model '{model_path}' failed to load: {reason}")]
    DetectorLoad { model_path: String, reason: String },

    /// `start()` was called on an engine that already started.
    #[error("engine already started")]
    AlreadyStarted,

    /// A frame did not match its declared geometry.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl EngineError {
    pub fn source_unavailable(path: &str, reason: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn detector_load(model_path: &str, reason: impl std::fmt::Display) -> Self {
        Self::DetectorLoad {
            model_path: model_path.to_string(),
            reason: reason.to_string(),
        }
    }
}
