//! RTSP camera source.
//!
//! Uses GStreamer (`rtsp-gstreamer` feature) to decode the stream to RGB. The
//! pipeline carries `videoscale` and `videorate` stages so the size and rate
//! hints become caps on the appsink; the camera keeps whatever it natively sends.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::{Duration, Instant};

use super::{CaptureHints, FrameSource, SourceStats};
use crate::error::EngineError;
use crate::frame::Frame;

/// RTSP frame source.
pub struct RtspSource {
    url: String,
    hints: CaptureHints,
    #[cfg(feature = "rtsp-gstreamer")]
    stream: GstreamerStream,
}

impl RtspSource {
    pub fn open(url: &str) -> Result<Self, EngineError> {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            let stream = GstreamerStream::new(url)
                .map_err(|e| EngineError::source_unavailable(url, format!("{:#}", e)))?;
            Ok(Self {
                url: url.to_string(),
                hints: CaptureHints::default(),
                stream,
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(EngineError::source_unavailable(
                url,
                "RTSP requires the rtsp-gstreamer feature",
            ))
        }
    }
}

impl FrameSource for RtspSource {
    fn location(&self) -> &str {
        &self.url
    }

    fn configure(&mut self, hints: &CaptureHints) {
        self.hints = *hints;
        #[cfg(feature = "rtsp-gstreamer")]
        self.stream.apply_caps(hints);
    }

    fn connect(&mut self) -> Result<()> {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            self.stream.connect(&self.url)
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(EngineError::source_unavailable(&self.url, "RTSP support not compiled in").into())
        }
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            self.stream.next_frame(self.hints.fps)
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(EngineError::source_unavailable(&self.url, "RTSP support not compiled in").into())
        }
    }

    fn nominal_fps(&self) -> f64 {
        self.hints.fps
    }

    fn resolution(&self) -> (u32, u32) {
        (self.hints.width, self.hints.height)
    }

    fn is_healthy(&self) -> bool {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            self.stream.is_healthy(self.hints.fps)
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            false
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            #[cfg(feature = "rtsp-gstreamer")]
            frames_captured: self.stream.frame_count,
            #[cfg(not(feature = "rtsp-gstreamer"))]
            frames_captured: 0,
            location: self.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer pipeline
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerStream {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
    eos: bool,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStream {
    fn new(url: &str) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! videoscale ! videorate ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        let stream = Self {
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
            eos: false,
        };
        stream.apply_caps(&CaptureHints::default());
        Ok(stream)
    }

    fn apply_caps(&self, hints: &CaptureHints) {
        let mut caps = gstreamer::Caps::builder("video/x-raw").field("format", "RGB");
        if hints.width > 0 && hints.height > 0 {
            caps = caps
                .field("width", hints.width as i32)
                .field("height", hints.height as i32);
        }
        if hints.fps.is_finite() && hints.fps >= 1.0 {
            caps = caps.field("framerate", gstreamer::Fraction::new(hints.fps.round() as i32, 1));
        }
        self.appsink.set_caps(Some(&caps.build()));
    }

    fn connect(&mut self, url: &str) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", url);
        Ok(())
    }

    fn next_frame(&mut self, fps: f64) -> Result<Option<Frame>> {
        self.poll_bus();
        if self.eos {
            return Ok(None);
        }
        if let Some(err) = &self.last_error {
            anyhow::bail!("{}", err);
        }

        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(frame_timeout(fps).as_millis() as u64))
            .ok_or_else(|| anyhow::anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Ok(Some(Frame::from_rgb(pixels, width, height)?))
    }

    fn is_healthy(&self, fps: f64) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(fps)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.eos = true;
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerStream {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn frame_timeout(fps: f64) -> Duration {
    let base_ms = if fps > 0.0 { (4000.0 / fps) as u64 } else { 500 };
    Duration::from_millis(base_ms.max(500))
}

#[cfg(feature = "rtsp-gstreamer")]
fn health_grace(fps: f64) -> Duration {
    let base_ms = if fps > 0.0 { (6000.0 / fps) as u64 } else { 2_000 };
    Duration::from_millis(base_ms.max(2_000))
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer is shorter than its caps")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
