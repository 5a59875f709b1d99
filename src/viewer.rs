//! Debug visualization of detections.
//!
//! Viewers only run when the debug window is enabled. A viewer failure is
//! logged and visualization carries on; only `ViewerAction::Quit` affects the
//! engine, by stopping it.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::detect::DetectionResult;
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 220, 60]);
const BOX_THICKNESS: u32 = 3;

/// What the viewer wants the engine to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerAction {
    Continue,
    Quit,
}

/// Shows a frame with its detections.
pub trait DebugViewer: Send {
    fn show(&mut self, frame: &Frame, detections: &DetectionResult) -> Result<ViewerAction>;

    /// Release windows/files. Called once when the detection loop ends.
    fn close(&mut self) {}
}

/// Draw detection boxes onto an RGB copy of the frame.
pub fn annotate(frame: &Frame, detections: &DetectionResult) -> Result<RgbImage> {
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .context("frame pixels do not match its dimensions")?;
    for bbox in &detections.boxes {
        if bbox.width == 0 || bbox.height == 0 {
            continue;
        }
        for inset in 0..BOX_THICKNESS {
            let (w, h) = (
                bbox.width.saturating_sub(2 * inset),
                bbox.height.saturating_sub(2 * inset),
            );
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(bbox.x + inset as i32, bbox.y + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(&mut image, rect, BOX_COLOR);
        }
    }
    Ok(image)
}

// ----------------------------------------------------------------------------
// FrameDumpViewer: annotated JPEG on disk
// ----------------------------------------------------------------------------

/// Writes the newest annotated frame to `<dir>/latest.jpg`, overwriting it each cycle.
///
/// Point an image viewer with auto-reload at the file to watch the detector live.
/// A shared quit flag stands in for a window's quit key.
pub struct FrameDumpViewer {
    dir: PathBuf,
    quit: Option<Arc<AtomicBool>>,
    frames_written: u64,
}

impl FrameDumpViewer {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create debug dump dir {}", dir.display()))?;
        Ok(Self {
            dir,
            quit: None,
            frames_written: 0,
        })
    }

    /// Quit once `flag` becomes true.
    pub fn with_quit_signal(mut self, flag: Arc<AtomicBool>) -> Self {
        self.quit = Some(flag);
        self
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join("latest.jpg")
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl DebugViewer for FrameDumpViewer {
    fn show(&mut self, frame: &Frame, detections: &DetectionResult) -> Result<ViewerAction> {
        if self
            .quit
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            return Ok(ViewerAction::Quit);
        }
        let image = annotate(frame, detections)?;
        let tmp = self.dir.join("latest.jpg.tmp");
        image
            .save_with_format(&tmp, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, self.latest_path())
            .with_context(|| format!("failed to publish {}", self.latest_path().display()))?;
        self.frames_written += 1;
        Ok(ViewerAction::Continue)
    }
}

// ----------------------------------------------------------------------------
// HighguiViewer: OpenCV window
// ----------------------------------------------------------------------------

#[cfg(feature = "backend-opencv")]
pub use highgui_viewer::HighguiViewer;

#[cfg(feature = "backend-opencv")]
mod highgui_viewer {
    use anyhow::{Context, Result};
    use opencv::{core, highgui, imgproc, prelude::*};

    use super::{annotate, DebugViewer, ViewerAction};
    use crate::detect::DetectionResult;
    use crate::frame::Frame;

    const KEY_ESC: i32 = 27;
    const KEY_Q: i32 = 113;

    /// Native window; Esc or `q` quits.
    pub struct HighguiViewer {
        title: String,
        opened: bool,
    }

    impl HighguiViewer {
        pub fn new(title: &str) -> Self {
            Self {
                title: title.to_string(),
                opened: false,
            }
        }
    }

    impl DebugViewer for HighguiViewer {
        fn show(&mut self, frame: &Frame, detections: &DetectionResult) -> Result<ViewerAction> {
            if !self.opened {
                highgui::named_window(&self.title, highgui::WINDOW_NORMAL)
                    .context("open debug window")?;
                self.opened = true;
            }
            let annotated = annotate(frame, detections)?;
            let flat = Mat::from_slice(annotated.as_raw()).context("wrap annotated frame")?;
            let rgb = flat
                .reshape(3, frame.height as i32)
                .context("reshape annotated frame")?;
            let mut bgr = Mat::default();
            imgproc::cvt_color(
                &*rgb,
                &mut bgr,
                imgproc::COLOR_RGB2BGR,
                0,
                core::AlgorithmHint::ALGO_HINT_DEFAULT,
            )
            .context("convert annotated frame to BGR")?;
            highgui::imshow(&self.title, &bgr).context("show debug frame")?;
            let key = highgui::wait_key(1)?;
            if key == KEY_ESC || key == KEY_Q {
                return Ok(ViewerAction::Quit);
            }
            Ok(ViewerAction::Continue)
        }

        fn close(&mut self) {
            if self.opened {
                let _ = highgui::destroy_window(&self.title);
                self.opened = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn annotate_draws_box_outline() {
        let frame = Frame::filled(40, 40, [0, 0, 0]);
        let detections = DetectionResult::new(vec![BoundingBox::new(5, 5, 20, 20)]);
        let image = annotate(&frame, &detections).expect("annotate");
        assert_eq!(*image.get_pixel(5, 5), BOX_COLOR);
        assert_eq!(*image.get_pixel(15, 15), Rgb([0, 0, 0]));
    }

    #[test]
    fn frame_dump_viewer_writes_latest_frame() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut viewer = FrameDumpViewer::new(dir.path()).expect("viewer");
        let frame = Frame::filled(16, 16, [10, 20, 30]);
        let action = viewer
            .show(&frame, &DetectionResult::default())
            .expect("show");
        assert_eq!(action, ViewerAction::Continue);
        assert!(viewer.latest_path().is_file());
        assert_eq!(viewer.frames_written(), 1);
    }

    #[test]
    fn quit_flag_maps_to_quit() {
        let dir = tempfile::tempdir().expect("temp dir");
        let flag = Arc::new(AtomicBool::new(false));
        let mut viewer = FrameDumpViewer::new(dir.path())
            .expect("viewer")
            .with_quit_signal(flag.clone());
        let frame = Frame::filled(4, 4, [0, 0, 0]);
        assert_eq!(
            viewer.show(&frame, &DetectionResult::default()).unwrap(),
            ViewerAction::Continue
        );
        flag.store(true, Ordering::SeqCst);
        assert_eq!(
            viewer.show(&frame, &DetectionResult::default()).unwrap(),
            ViewerAction::Quit
        );
    }
}
