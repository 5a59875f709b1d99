//! Consumer side of the engine: detect, diff, dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::control::{RunControl, StopReason};
use crate::detect::{DetectionParams, Detector};
use crate::events::EventDispatcher;
use crate::frame::FrameBuffer;
use crate::occupancy::{OccupancyCounter, OccupancyDelta};
use crate::viewer::{DebugViewer, ViewerAction};

/// Wait between cycles when there is nothing new to look at.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Result of one detection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing captured yet, or the newest frame is empty; detection did not run.
    NoFrame,
    /// The detector failed; the count was left untouched.
    DetectorFailed,
    /// Detection ran and the count was replaced.
    Counted {
        delta: OccupancyDelta,
        /// False when the frame was already examined last cycle.
        fresh_frame: bool,
    },
    /// The debug viewer asked to quit.
    Quit,
}

/// One detection cycle per call: take the newest frame, count vehicles,
/// replace the count and fire one event per unit of change.
pub struct DetectionLoop {
    detector: Box<dyn Detector>,
    params: DetectionParams,
    buffer: Arc<FrameBuffer>,
    counter: Arc<OccupancyCounter>,
    dispatcher: EventDispatcher,
    viewer: Option<Box<dyn DebugViewer>>,
    idle_backoff: Duration,
    last_sequence: u64,
    cycles: Arc<AtomicU64>,
}

impl DetectionLoop {
    pub fn new(
        detector: Box<dyn Detector>,
        buffer: Arc<FrameBuffer>,
        counter: Arc<OccupancyCounter>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            detector,
            params: DetectionParams::VEHICLE,
            buffer,
            counter,
            dispatcher,
            viewer: None,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            last_sequence: 0,
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_params(mut self, params: DetectionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_viewer(mut self, viewer: Box<dyn DebugViewer>) -> Self {
        self.viewer = Some(viewer);
        self
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Shared count of cycles in which detection ran.
    pub fn cycle_counter(&self) -> Arc<AtomicU64> {
        self.cycles.clone()
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        let Some((sequence, frame)) = self.buffer.latest() else {
            return CycleOutcome::NoFrame;
        };
        if frame.is_empty() {
            log::trace!("frame #{} has no pixels; skipping detection", sequence);
            self.last_sequence = sequence;
            return CycleOutcome::NoFrame;
        }
        let fresh_frame = sequence != self.last_sequence;
        self.last_sequence = sequence;

        let gray = frame.to_grayscale();
        let detections = match self.detector.detect(&gray, &self.params) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!(
                    "{} detector failed on frame #{}: {:#}",
                    self.detector.name(),
                    sequence,
                    e
                );
                return CycleOutcome::DetectorFailed;
            }
        };
        self.cycles.fetch_add(1, Ordering::SeqCst);

        let delta = self.counter.observe(detections.count());
        let lot_id = self.dispatcher.engine().lot_id();
        if delta.is_unchanged() {
            log::trace!("lot {}: {} vehicles (unchanged)", lot_id, delta.current);
        } else {
            log::info!(
                "lot {}: {} -> {} vehicles (+{} / -{})",
                lot_id,
                delta.previous,
                delta.current,
                delta.arrivals(),
                delta.departures()
            );
            self.dispatcher.dispatch(&delta);
        }

        if let Some(viewer) = self.viewer.as_mut() {
            match viewer.show(&frame, &detections) {
                Ok(ViewerAction::Continue) => {}
                Ok(ViewerAction::Quit) => return CycleOutcome::Quit,
                Err(e) => log::warn!("debug viewer failed: {:#}", e),
            }
        }

        CycleOutcome::Counted { delta, fresh_frame }
    }

    /// Run cycles until a stop is requested or the viewer quits.
    pub fn run(mut self, control: &RunControl) {
        if let Err(e) = self.detector.warm_up() {
            log::warn!("{} detector warm-up failed: {:#}", self.detector.name(), e);
        }
        log::info!("detection started with {} detector", self.detector.name());

        while !control.is_stopping() {
            let idle = match self.run_cycle() {
                CycleOutcome::Counted { fresh_frame, .. } => !fresh_frame,
                CycleOutcome::NoFrame | CycleOutcome::DetectorFailed => true,
                CycleOutcome::Quit => {
                    log::info!("debug viewer quit; stopping engine");
                    control.request_stop(StopReason::ViewerQuit);
                    break;
                }
            };
            if idle && control.pause(self.idle_backoff) {
                break;
            }
        }

        if let Some(viewer) = self.viewer.as_mut() {
            viewer.close();
        }
        log::info!(
            "detection stopped after {} cycles",
            self.cycles.load(Ordering::SeqCst)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionResult, ScriptedDetector};
    use crate::engine::EngineInfo;
    use crate::events::{handler, EventHandlers};
    use crate::frame::{Frame, GrayFrame};
    use anyhow::{anyhow, Result};
    use std::sync::atomic::AtomicUsize;

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn detect(&mut self, _: &GrayFrame, _: &DetectionParams) -> Result<DetectionResult> {
            Err(anyhow!("model crashed"))
        }
    }

    struct QuitViewer;

    impl DebugViewer for QuitViewer {
        fn show(&mut self, _: &Frame, _: &DetectionResult) -> Result<ViewerAction> {
            Ok(ViewerAction::Quit)
        }
    }

    fn build(
        detector: Box<dyn Detector>,
        arrivals: Arc<AtomicUsize>,
        departures: Arc<AtomicUsize>,
    ) -> (DetectionLoop, Arc<FrameBuffer>, EventDispatcher) {
        let info = Arc::new(EngineInfo::new("stub://lot", 3, "Garage"));
        let buffer = Arc::new(FrameBuffer::new());
        let dispatcher = EventDispatcher::new(
            EventHandlers {
                on_arrive: Some(handler(move |_| {
                    arrivals.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
                on_depart: Some(handler(move |_| {
                    departures.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            },
            info.clone(),
        );
        let detection = DetectionLoop::new(
            detector,
            buffer.clone(),
            info.counter(),
            dispatcher.clone(),
        );
        (detection, buffer, dispatcher)
    }

    #[test]
    fn empty_buffer_skips_detection() {
        let scripted = ScriptedDetector::new(vec![4]);
        let calls = scripted.call_counter();
        let (mut detection, _buffer, _) = build(
            Box::new(scripted),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        );
        assert_eq!(detection.run_cycle(), CycleOutcome::NoFrame);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_frame_skips_detection() {
        let scripted = ScriptedDetector::new(vec![3]);
        let calls = scripted.call_counter();
        let arrivals = Arc::new(AtomicUsize::new(0));
        let (mut detection, buffer, dispatcher) = build(
            Box::new(scripted),
            arrivals.clone(),
            Arc::new(AtomicUsize::new(0)),
        );
        buffer.publish(Frame::from_rgb(Vec::new(), 0, 0).unwrap());
        assert_eq!(detection.run_cycle(), CycleOutcome::NoFrame);
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(arrivals.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.engine().occupancy(), 0);
    }

    #[test]
    fn cycles_fire_events_for_count_changes() {
        let arrivals = Arc::new(AtomicUsize::new(0));
        let departures = Arc::new(AtomicUsize::new(0));
        let (mut detection, buffer, dispatcher) = build(
            Box::new(ScriptedDetector::new(vec![0, 2, 2, 1, 0])),
            arrivals.clone(),
            departures.clone(),
        );
        buffer.publish(Frame::filled(8, 8, [0, 0, 0]));
        for _ in 0..5 {
            assert!(matches!(
                detection.run_cycle(),
                CycleOutcome::Counted { .. }
            ));
        }
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(arrivals.load(Ordering::SeqCst), 2);
        assert_eq!(departures.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.engine().occupancy(), 0);
    }

    #[test]
    fn stale_frame_is_reported() {
        let (mut detection, buffer, _) = build(
            Box::new(ScriptedDetector::new(vec![1])),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        );
        buffer.publish(Frame::filled(4, 4, [0, 0, 0]));
        let first = detection.run_cycle();
        let second = detection.run_cycle();
        assert!(matches!(
            first,
            CycleOutcome::Counted {
                fresh_frame: true,
                ..
            }
        ));
        assert!(matches!(
            second,
            CycleOutcome::Counted {
                fresh_frame: false,
                ..
            }
        ));
    }

    #[test]
    fn detector_failure_leaves_count_untouched() {
        let arrivals = Arc::new(AtomicUsize::new(0));
        let (mut detection, buffer, dispatcher) = build(
            Box::new(FailingDetector),
            arrivals.clone(),
            Arc::new(AtomicUsize::new(0)),
        );
        buffer.publish(Frame::filled(4, 4, [0, 0, 0]));
        assert_eq!(detection.run_cycle(), CycleOutcome::DetectorFailed);
        assert_eq!(dispatcher.engine().occupancy(), 0);
        assert_eq!(arrivals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn viewer_quit_requests_stop() {
        let (detection, buffer, _) = build(
            Box::new(ScriptedDetector::new(vec![0])),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        );
        buffer.publish(Frame::filled(4, 4, [0, 0, 0]));
        let control = RunControl::new();
        detection.with_viewer(Box::new(QuitViewer)).run(&control);
        assert_eq!(control.stop_reason(), Some(StopReason::ViewerQuit));
    }
}
