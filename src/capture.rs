//! Producer side of the engine: pulls frames from the source into the buffer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::{RunControl, StopReason};
use crate::frame::FrameBuffer;
use crate::ingest::FrameSource;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How the capture loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureExit {
    /// A stop was requested.
    Stopped,
    /// The source ran out of frames. The last frame stays in the buffer.
    Exhausted,
    /// The source failed. The engine is stopping.
    Failed,
}

/// Reads frames as fast as the pacing interval allows and publishes each one,
/// replacing whatever the buffer held.
pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    buffer: Arc<FrameBuffer>,
    interval: Duration,
}

impl CaptureLoop {
    pub fn new(source: Box<dyn FrameSource>, buffer: Arc<FrameBuffer>, interval: Duration) -> Self {
        Self {
            source,
            buffer,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn run(mut self, control: &RunControl) -> CaptureExit {
        log::info!(
            "capture started: {} every {:?}",
            self.source.location(),
            self.interval
        );
        let mut last_health_log = Instant::now();

        loop {
            if control.is_stopping() {
                return CaptureExit::Stopped;
            }

            let read_started = Instant::now();
            match self.source.read_next() {
                Ok(Some(frame)) => {
                    let sequence = self.buffer.publish(frame);
                    log::trace!("frame #{} published", sequence);
                }
                Ok(None) => {
                    log::info!(
                        "source {} exhausted after {} frames; keeping last frame",
                        self.source.location(),
                        self.buffer.published()
                    );
                    return CaptureExit::Exhausted;
                }
                Err(e) => {
                    log::error!("source {} failed: {:#}", self.source.location(), e);
                    control.request_stop(StopReason::SourceFailed);
                    return CaptureExit::Failed;
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                log::debug!(
                    "source health={} frames={} location={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.location
                );
                last_health_log = Instant::now();
            }

            let wait = self.interval.saturating_sub(read_started.elapsed());
            if control.pause(wait) {
                return CaptureExit::Stopped;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticSource;
    use anyhow::{anyhow, Result};

    use crate::frame::Frame;
    use crate::ingest::{CaptureHints, SourceStats};

    struct BrokenSource;

    impl FrameSource for BrokenSource {
        fn location(&self) -> &str {
            "broken"
        }
        fn configure(&mut self, _hints: &CaptureHints) {}
        fn read_next(&mut self) -> Result<Option<Frame>> {
            Err(anyhow!("cable unplugged"))
        }
        fn nominal_fps(&self) -> f64 {
            30.0
        }
        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }
        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    #[test]
    fn exhausted_source_keeps_last_frame() {
        let source = SyntheticSource::open("stub://gate?frames=3").expect("source");
        let buffer = Arc::new(FrameBuffer::new());
        let control = RunControl::new();
        let exit = CaptureLoop::new(Box::new(source), buffer.clone(), Duration::from_millis(1))
            .run(&control);
        assert_eq!(exit, CaptureExit::Exhausted);
        assert_eq!(buffer.published(), 3);
        assert!(!buffer.is_empty());
        assert!(!control.is_stopping());
    }

    #[test]
    fn source_failure_requests_stop() {
        let buffer = Arc::new(FrameBuffer::new());
        let control = RunControl::new();
        let exit = CaptureLoop::new(Box::new(BrokenSource), buffer.clone(), Duration::from_millis(1))
            .run(&control);
        assert_eq!(exit, CaptureExit::Failed);
        assert_eq!(control.stop_reason(), Some(StopReason::SourceFailed));
        assert!(buffer.is_empty());
    }

    #[test]
    fn stop_request_ends_capture() {
        let source = SyntheticSource::open("stub://gate").expect("source");
        let control = RunControl::new();
        control.request_stop(StopReason::Requested);
        let exit = CaptureLoop::new(
            Box::new(source),
            Arc::new(FrameBuffer::new()),
            Duration::from_millis(1),
        )
        .run(&control);
        assert_eq!(exit, CaptureExit::Stopped);
    }
}
