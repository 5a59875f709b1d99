//! Synthetic frame source (`stub://`).
//!
//! Produces a moving test pattern so the whole pipeline can run without a camera.
//! `stub://name?frames=N` stops after `N` frames and then reports exhaustion.

use anyhow::Result;

use super::{CaptureHints, FrameSource, SourceStats};
use crate::error::EngineError;
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: f64 = 30.0;

pub struct SyntheticSource {
    location: String,
    width: u32,
    height: u32,
    fps: f64,
    frame_limit: Option<u64>,
    frame_count: u64,
    /// Simulated scene state; changes every 50 frames.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn open(location: &str) -> Result<Self, EngineError> {
        let rest = location
            .strip_prefix("stub://")
            .ok_or_else(|| EngineError::source_unavailable(location, "not a stub:// URL"))?;
        let frame_limit = match rest.split_once('?') {
            Some((_, query)) => parse_frame_limit(query)
                .map_err(|reason| EngineError::source_unavailable(location, reason))?,
            None => None,
        };
        Ok(Self {
            location: location.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            frame_limit,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn configure(&mut self, hints: &CaptureHints) {
        if hints.width > 0 && hints.height > 0 {
            self.width = hints.width;
            self.height = hints.height;
        }
        if hints.fps.is_finite() && hints.fps > 0.0 {
            self.fps = hints.fps;
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.location);
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(Some(Frame::from_rgb(pixels, self.width, self.height)?))
    }

    fn nominal_fps(&self) -> f64 {
        self.fps
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.location.clone(),
        }
    }
}

fn parse_frame_limit(query: &str) -> std::result::Result<Option<u64>, String> {
    for pair in query.split('&') {
        if let Some(("frames", value)) = pair.split_once('=') {
            let limit = value
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("frames must be an integer, got '{}'", value))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_honours_hints() -> Result<()> {
        let mut source = SyntheticSource::open("stub://test")?;
        source.configure(&CaptureHints {
            fps: 12.0,
            width: 32,
            height: 24,
        });
        source.connect()?;

        let frame = source.read_next()?.expect("frame");
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(source.nominal_fps(), 12.0);
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn frame_limit_reports_exhaustion() -> Result<()> {
        let mut source = SyntheticSource::open("stub://test?frames=2")?;
        source.configure(&CaptureHints {
            fps: 30.0,
            width: 4,
            height: 4,
        });
        assert!(source.read_next()?.is_some());
        assert!(source.read_next()?.is_some());
        assert!(source.read_next()?.is_none());
        assert!(source.read_next()?.is_none());
        Ok(())
    }

    #[test]
    fn bad_frame_limit_is_rejected() {
        assert!(SyntheticSource::open("stub://test?frames=many").is_err());
    }
}
