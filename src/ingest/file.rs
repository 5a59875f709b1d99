//! Local video file source.
//!
//! Decoding runs through FFmpeg when the `ingest-file-ffmpeg` feature is on.
//! Without it, opening a file fails with `SourceUnavailable` so the engine
//! never starts against a source it cannot read.

use anyhow::Result;
use std::path::Path;

use super::{CaptureHints, FrameSource, SourceStats};
use crate::error::EngineError;
use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;

/// Local file frame source.
pub struct FileSource {
    #[cfg(feature = "ingest-file-ffmpeg")]
    inner: FfmpegFileSource,
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    path: String,
}

impl FileSource {
    pub fn open(path: &str) -> Result<Self, EngineError> {
        if !Path::new(path).is_file() {
            return Err(EngineError::source_unavailable(path, "file does not exist"));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let inner = FfmpegFileSource::open(path)
                .map_err(|e| EngineError::source_unavailable(path, format!("{:#}", e)))?;
            Ok(Self { inner })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(EngineError::source_unavailable(
                path,
                "file ingestion requires the ingest-file-ffmpeg feature",
            ))
        }
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
impl FrameSource for FileSource {
    fn location(&self) -> &str {
        self.inner.path()
    }

    fn configure(&mut self, hints: &CaptureHints) {
        self.inner.configure(hints);
    }

    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        self.inner.read_next()
    }

    fn nominal_fps(&self) -> f64 {
        self.inner.nominal_fps()
    }

    fn resolution(&self) -> (u32, u32) {
        self.inner.resolution()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

// Without ffmpeg, open() always fails and this impl is never driven.
#[cfg(not(feature = "ingest-file-ffmpeg"))]
impl FrameSource for FileSource {
    fn location(&self) -> &str {
        &self.path
    }

    fn configure(&mut self, _hints: &CaptureHints) {}

    fn read_next(&mut self) -> Result<Option<Frame>> {
        Err(EngineError::source_unavailable(&self.path, "ffmpeg support not compiled in").into())
    }

    fn nominal_fps(&self) -> f64 {
        0.0
    }

    fn resolution(&self) -> (u32, u32) {
        (0, 0)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            location: self.path.clone(),
        }
    }
}
