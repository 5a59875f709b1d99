//! Frame sources.
//!
//! This module provides the sources the capture loop pulls frames from:
//! - Synthetic stream (`stub://...`, tests and demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - RTSP camera streams (feature: rtsp-gstreamer)
//!
//! Every source produces RGB24 `Frame`s. Capture hints (fps, resolution) are
//! best-effort: a source applies what it can and ignores the rest.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod rtsp;
pub mod synthetic;

use anyhow::Result;

use crate::error::EngineError;
use crate::frame::Frame;

pub use file::FileSource;
pub use rtsp::RtspSource;
pub use synthetic::SyntheticSource;

/// Requested capture parameters. Sources may ignore values they cannot honour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureHints {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            fps: 30.0,
            width: 1920,
            height: 1080,
        }
    }
}

/// Capture statistics for health logging.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub location: String,
}

/// A pull-based video source.
pub trait FrameSource: Send {
    /// Where the frames come from (path or URL), for logs.
    fn location(&self) -> &str;

    /// Apply capture hints. Best-effort.
    fn configure(&mut self, hints: &CaptureHints);

    /// Start streaming. Called once by the engine before the capture loop runs.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Blocking pull of the next frame.
    ///
    /// `Ok(None)` means the source is exhausted (end of file); errors mean the
    /// source was lost.
    fn read_next(&mut self) -> Result<Option<Frame>>;

    /// Nominal frame rate the source is producing at.
    fn nominal_fps(&self) -> f64;

    /// Nominal frame size.
    fn resolution(&self) -> (u32, u32);

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Open a source by path or URL.
///
/// - `stub://...` opens a synthetic stream
/// - `rtsp://` / `rtsps://` open a camera stream
/// - anything else is treated as a local video file
pub fn open_source(path: &str) -> Result<Box<dyn FrameSource>, EngineError> {
    if path.trim().is_empty() {
        return Err(EngineError::source_unavailable(path, "empty source path"));
    }
    if path.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::open(path)?));
    }
    if path.starts_with("rtsp://") || path.starts_with("rtsps://") {
        return Ok(Box::new(RtspSource::open(path)?));
    }
    if path.contains("://") {
        return Err(EngineError::source_unavailable(
            path,
            "unsupported URL scheme (expected stub://, rtsp:// or a local path)",
        ));
    }
    Ok(Box::new(FileSource::open(path)?))
}

/// Longest pause between reads, however low the requested rate.
pub const MAX_FRAME_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Pacing interval between reads for a nominal frame rate.
pub fn frame_interval(fps: f64) -> std::time::Duration {
    if fps.is_finite() && fps > 0.0 {
        std::time::Duration::try_from_secs_f64(1.0 / fps)
            .map(|interval| interval.min(MAX_FRAME_INTERVAL))
            .unwrap_or(MAX_FRAME_INTERVAL)
    } else {
        std::time::Duration::from_millis(33)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_sources() {
        let source = open_source("stub://lot").expect("stub source");
        assert_eq!(source.location(), "stub://lot");
    }

    #[test]
    fn rejects_unknown_schemes_and_empty_paths() {
        assert!(matches!(
            open_source("http://camera/feed").err(),
            Some(EngineError::SourceUnavailable { .. })
        ));
        assert!(matches!(
            open_source("  ").err(),
            Some(EngineError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = open_source("/definitely/not/here.mp4").err().expect("error");
        assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    }

    #[test]
    fn frame_interval_follows_fps() {
        assert_eq!(frame_interval(10.0).as_millis(), 100);
        assert_eq!(frame_interval(0.0).as_millis(), 33);
    }

    #[test]
    fn tiny_frame_rates_are_capped() {
        assert_eq!(frame_interval(1e-30), MAX_FRAME_INTERVAL);
        assert_eq!(frame_interval(0.001), MAX_FRAME_INTERVAL);
        assert_eq!(frame_interval(f64::MIN_POSITIVE), MAX_FRAME_INTERVAL);
    }
}
