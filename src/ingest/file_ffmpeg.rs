//! FFmpeg-backed local file decoder.
//!
//! Frames are decoded in-memory and scaled to RGB24 at the hinted resolution
//! (or the native one when no hint applies).

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Instant;

use super::{CaptureHints, SourceStats};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    out_width: u32,
    out_height: u32,
    native_fps: f64,
    frame_count: u64,
    eof_sent: bool,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let native_fps = f64::from(input_stream.avg_frame_rate());
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let (out_width, out_height) = (decoder.width(), decoder.height());
        let scaler = build_scaler(&decoder, out_width, out_height)?;

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            out_width,
            out_height,
            native_fps: if native_fps.is_finite() { native_fps } else { 0.0 },
            frame_count: 0,
            eof_sent: false,
            connected_at: None,
            last_error: None,
        })
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Resolution hints rebuild the scaler; the frame rate of a file is fixed,
    /// so the fps hint only affects how fast the capture loop pulls.
    pub(crate) fn configure(&mut self, hints: &CaptureHints) {
        if hints.width == 0 || hints.height == 0 {
            return;
        }
        if (hints.width, hints.height) == (self.out_width, self.out_height) {
            return;
        }
        match build_scaler(&self.decoder, hints.width, hints.height) {
            Ok(scaler) => {
                self.scaler = scaler;
                self.out_width = hints.width;
                self.out_height = hints.height;
            }
            Err(e) => log::warn!(
                "FileSource: keeping native size for {}, scaler rejected {}x{}: {:#}",
                self.path,
                hints.width,
                hints.height,
                e
            ),
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        log::info!("FileSource: connected to {} (ffmpeg)", self.path);
        Ok(())
    }

    pub(crate) fn read_next(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        // Frames left over from the previous packet come first.
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }

        let mut got_frame = false;
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                got_frame = true;
                break;
            }
        }
        if got_frame {
            return self.convert(&decoded).map(Some);
        }

        if !self.eof_sent {
            self.eof_sent = true;
            self.decoder.send_eof().context("flush ffmpeg decoder")?;
        }
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }

        self.last_error = Some("end of file".to_string());
        Ok(None)
    }

    pub(crate) fn nominal_fps(&self) -> f64 {
        self.native_fps
    }

    pub(crate) fn resolution(&self) -> (u32, u32) {
        (self.out_width, self.out_height)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.connected_at.is_some() && self.last_error.is_none()
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.path.clone(),
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        self.frame_count += 1;
        Ok(Frame::from_rgb(pixels, width, height)?)
    }
}

fn build_scaler(
    decoder: &ffmpeg::codec::decoder::Video,
    width: u32,
    height: u32,
) -> Result<ffmpeg::software::scaling::Context> {
    ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::util::format::pixel::Pixel::RGB24,
        width,
        height,
        ffmpeg::software::scaling::flag::Flags::BILINEAR,
    )
    .context("create ffmpeg scaler")
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its geometry")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
