//! In-memory frames and the single-slot frame buffer.
//!
//! - `Frame`: RGB24 raster captured by a source. Pixels are private; readers get a slice.
//! - `GrayFrame`: single-channel copy handed to detectors.
//! - `FrameBuffer`: holds only the most recent frame. The producer overwrites it,
//!   the consumer reads whatever is current. Nothing is queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::EngineError;

// ----------------------------------------------------------------------------
// Frame: RGB raster
// ----------------------------------------------------------------------------

/// A captured RGB24 frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB rows, `width * height * 3` bytes.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonic capture instant.
    captured_at: Instant,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// Wrap packed RGB24 pixels. Fails when the length does not match the geometry.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, EngineError> {
        let expected = rgb_len(width, height)
            .ok_or_else(|| EngineError::InvalidFrame("frame dimensions overflow".into()))?;
        if data.len() != expected {
            return Err(EngineError::InvalidFrame(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Solid-colour frame, handy for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let len = rgb_len(width, height).unwrap_or(0);
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / 3 {
            data.extend_from_slice(&rgb);
        }
        let (width, height) = if len == 0 { (0, 0) } else { (width, height) };
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// A frame with no pixels is never handed to a detector.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Luma conversion with BT.601 weights, the same weighting as a BGR-to-gray pass.
    pub fn to_grayscale(&self) -> GrayFrame {
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| {
                let luma = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
                ((luma + 500) / 1000) as u8
            })
            .collect();
        GrayFrame {
            data,
            width: self.width,
            height: self.height,
        }
    }
}

fn rgb_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
}

// ----------------------------------------------------------------------------
// GrayFrame: detector input
// ----------------------------------------------------------------------------

/// Single-channel frame, one byte per pixel.
#[derive(Clone, Debug)]
pub struct GrayFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayFrame {
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer: newest-frame slot
// ----------------------------------------------------------------------------

/// Single-slot buffer shared by the capture and detection loops.
///
/// Publishing swaps in a new `Arc<Frame>`; readers clone the `Arc` under the
/// lock, so a reader never observes a partially written frame. If the reader
/// is slower than the writer, intermediate frames are dropped.
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Arc<Frame>>>,
    published: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Returns the sequence number of the new frame (1-based).
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(frame);
        self.published.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Most recent frame and its sequence number, or `None` before the first capture.
    pub fn latest(&self) -> Option<(u64, Arc<Frame>)> {
        let slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let frame = slot.as_ref()?.clone();
        Some((self.published.load(Ordering::SeqCst), frame))
    }

    pub fn is_empty(&self) -> bool {
        self.latest().is_none()
    }

    /// Total frames published since creation.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_wrong_length() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4).unwrap_err();
        assert!(matches!(err, EngineError::InvalidFrame(_)));
    }

    #[test]
    fn grayscale_uses_luma_weights() {
        let frame = Frame::from_rgb(vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255], 2, 2)
            .unwrap();
        let gray = frame.to_grayscale();
        assert_eq!(gray.pixels(), &[76, 150, 29, 255]);
        assert_eq!(gray.get(1, 1), Some(255));
        assert_eq!(gray.get(2, 0), None);
    }

    #[test]
    fn frame_buffer_starts_empty() {
        let buffer = FrameBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.published(), 0);
    }

    #[test]
    fn frame_buffer_keeps_only_newest() {
        let buffer = FrameBuffer::new();
        buffer.publish(Frame::filled(2, 2, [1, 1, 1]));
        buffer.publish(Frame::filled(2, 2, [2, 2, 2]));
        let seq = buffer.publish(Frame::filled(3, 1, [3, 3, 3]));

        let (latest_seq, frame) = buffer.latest().expect("frame present");
        assert_eq!(seq, 3);
        assert_eq!(latest_seq, 3);
        assert_eq!(frame.width, 3);
        assert_eq!(frame.pixels()[0], 3);
    }
}
