//! The occupancy engine: one camera, one detector, one lot.
//!
//! An engine is configured, started once, and then runs two loops on their own
//! threads until stopped:
//!
//! - capture: source → `FrameBuffer`, paced at the configured frame rate
//! - detection: `FrameBuffer` → detector → `OccupancyCounter` → event handlers
//!
//! Configuration is frozen at `start()`. Setters called afterwards are logged
//! and ignored, and a second `start()` is rejected with `AlreadyStarted`.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::CaptureLoop;
use crate::control::{EngineState, LoopGuard, RunControl, StopReason};
use crate::detect::{load_detector, DetectionParams, Detector};
use crate::detection_loop::{DetectionLoop, DEFAULT_IDLE_BACKOFF};
use crate::error::EngineError;
use crate::events::{EventDispatcher, EventHandler, EventHandlers};
use crate::frame::FrameBuffer;
use crate::ingest::{frame_interval, open_source, CaptureHints, FrameSource};
use crate::occupancy::OccupancyCounter;
use crate::viewer::DebugViewer;

/// Upper bound on how long `stop()` waits for running event handlers.
pub const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the default debug viewer writes annotated frames.
pub const DEFAULT_DEBUG_DIR: &str = "lotwatch_debug";

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Which lot an engine watches, plus its live vehicle count.
///
/// Shared with every `VehicleEvent` so handlers can tell engines apart.
#[derive(Debug)]
pub struct EngineInfo {
    source_path: String,
    lot_id: i64,
    lot_name: String,
    occupancy: Arc<OccupancyCounter>,
}

impl EngineInfo {
    pub fn new(source_path: &str, lot_id: i64, lot_name: &str) -> Self {
        Self {
            source_path: source_path.to_string(),
            lot_id,
            lot_name: lot_name.to_string(),
            occupancy: Arc::new(OccupancyCounter::new()),
        }
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn lot_id(&self) -> i64 {
        self.lot_id
    }

    pub fn lot_name(&self) -> &str {
        &self.lot_name
    }

    /// Vehicles counted in the most recent detection cycle.
    pub fn occupancy(&self) -> usize {
        self.occupancy.current()
    }

    pub(crate) fn counter(&self) -> Arc<OccupancyCounter> {
        self.occupancy.clone()
    }
}

// ----------------------------------------------------------------------------
// Settings
// ----------------------------------------------------------------------------

/// Tunables that freeze at `start()`.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub frame_rate: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub show_debug_window: bool,
    pub idle_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let hints = CaptureHints::default();
        Self {
            frame_rate: hints.fps,
            frame_width: hints.width,
            frame_height: hints.height,
            show_debug_window: false,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
        }
    }
}

impl EngineSettings {
    pub fn capture_hints(&self) -> CaptureHints {
        CaptureHints {
            fps: self.frame_rate,
            width: self.frame_width,
            height: self.frame_height,
        }
    }
}

/// Counters for health logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames_captured: u64,
    pub detection_cycles: u64,
    pub handlers_in_flight: usize,
    /// Pacing the capture loop runs at; zero before start.
    pub capture_interval: Duration,
}

/// Requests a stop from another thread (signal handler, supervisor).
#[derive(Clone)]
pub struct StopHandle {
    control: Arc<RunControl>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.control.request_stop(StopReason::Requested);
    }
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

struct PendingSetup {
    settings: EngineSettings,
    handlers: EventHandlers,
    viewer: Option<Box<dyn DebugViewer>>,
    params: DetectionParams,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
}

struct Running {
    settings: EngineSettings,
    control: Arc<RunControl>,
    buffer: Arc<FrameBuffer>,
    dispatcher: EventDispatcher,
    cycles: Arc<AtomicU64>,
    capture_interval: Duration,
    loops: Vec<JoinHandle<()>>,
}

enum Lifecycle {
    Configuring(Box<PendingSetup>),
    Started(Box<Running>),
    /// `start()` consumed the components but failed before spawning anything.
    Halted(EngineSettings),
}

/// Watches one lot and fires arrival/departure events as its vehicle count changes.
pub struct OccupancyEngine {
    info: Arc<EngineInfo>,
    lifecycle: Lifecycle,
}

impl OccupancyEngine {
    /// Open the source and load the detector. Both failures surface here.
    pub fn open(source_path: &str, model_path: &str, lot_id: i64, lot_name: &str) -> Result<Self> {
        let source = open_source(source_path)?;
        let detector = load_detector(model_path)?;
        log::info!(
            "engine for lot {} ({}) opened: source={} detector={}",
            lot_id,
            lot_name,
            source_path,
            detector.name()
        );
        Ok(Self::with_components(
            EngineInfo::new(source_path, lot_id, lot_name),
            source,
            detector,
        ))
    }

    /// Build an engine around an already-open source and detector.
    pub fn with_components(
        info: EngineInfo,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
    ) -> Self {
        Self {
            info: Arc::new(info),
            lifecycle: Lifecycle::Configuring(Box::new(PendingSetup {
                settings: EngineSettings::default(),
                handlers: EventHandlers::default(),
                viewer: None,
                params: DetectionParams::VEHICLE,
                source,
                detector,
            })),
        }
    }

    // ------------------------------------------------------------------------
    // Setters (no-ops once started)
    // ------------------------------------------------------------------------

    pub fn set_frame_rate(&mut self, fps: f64) {
        self.configure("frame rate", |setup| setup.settings.frame_rate = fps);
    }

    pub fn set_frame_width(&mut self, width: u32) {
        self.configure("frame width", |setup| setup.settings.frame_width = width);
    }

    pub fn set_frame_height(&mut self, height: u32) {
        self.configure("frame height", |setup| setup.settings.frame_height = height);
    }

    pub fn set_show_debug_window(&mut self, show: bool) {
        self.configure("debug window", |setup| setup.settings.show_debug_window = show);
    }

    pub fn set_on_arrive(&mut self, handler: EventHandler) {
        self.configure("arrival handler", |setup| setup.handlers.on_arrive = Some(handler));
    }

    pub fn set_on_depart(&mut self, handler: EventHandler) {
        self.configure("departure handler", |setup| setup.handlers.on_depart = Some(handler));
    }

    /// Viewer used when the debug window is on. Without one, a
    /// `FrameDumpViewer` writing to `lotwatch_debug/` is created at start.
    pub fn set_debug_viewer(&mut self, viewer: Box<dyn DebugViewer>) {
        self.configure("debug viewer", |setup| setup.viewer = Some(viewer));
    }

    pub fn set_detection_params(&mut self, params: DetectionParams) {
        self.configure("detection parameters", |setup| setup.params = params);
    }

    /// Pause between detection cycles when no new frame has arrived.
    pub fn set_idle_backoff(&mut self, backoff: Duration) {
        self.configure("idle backoff", |setup| setup.settings.idle_backoff = backoff);
    }

    fn configure(&mut self, what: &str, apply: impl FnOnce(&mut PendingSetup)) {
        match &mut self.lifecycle {
            Lifecycle::Configuring(setup) => apply(setup),
            Lifecycle::Started(_) | Lifecycle::Halted(_) => log::debug!(
                "lot {}: ignoring {} change after start",
                self.info.lot_id(),
                what
            ),
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Effective settings; frozen once started.
    pub fn settings(&self) -> EngineSettings {
        match &self.lifecycle {
            Lifecycle::Configuring(setup) => setup.settings.clone(),
            Lifecycle::Started(running) => running.settings.clone(),
            Lifecycle::Halted(settings) => settings.clone(),
        }
    }

    pub fn info(&self) -> Arc<EngineInfo> {
        self.info.clone()
    }

    pub fn occupancy(&self) -> usize {
        self.info.occupancy()
    }

    pub fn state(&self) -> EngineState {
        match &self.lifecycle {
            Lifecycle::Configuring(_) => EngineState::Idle,
            Lifecycle::Started(running) => running.control.state(),
            Lifecycle::Halted(_) => EngineState::Stopped,
        }
    }

    /// Why the loops stopped, once they have been asked to.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match &self.lifecycle {
            Lifecycle::Started(running) => running.control.stop_reason(),
            _ => None,
        }
    }

    pub fn stats(&self) -> EngineStats {
        match &self.lifecycle {
            Lifecycle::Started(running) => EngineStats {
                frames_captured: running.buffer.published(),
                detection_cycles: running.cycles.load(Ordering::SeqCst),
                handlers_in_flight: running.dispatcher.in_flight(),
                capture_interval: running.capture_interval,
            },
            _ => EngineStats::default(),
        }
    }

    /// Handle for stopping the engine from elsewhere. `None` before start.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        match &self.lifecycle {
            Lifecycle::Started(running) => Some(StopHandle {
                control: running.control.clone(),
            }),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Connect the source and spawn both loops. Returns once they are running.
    pub fn start(&mut self) -> Result<()> {
        let placeholder = Lifecycle::Halted(self.settings());
        let setup = match std::mem::replace(&mut self.lifecycle, placeholder) {
            Lifecycle::Configuring(setup) => setup,
            previous => {
                self.lifecycle = previous;
                log::warn!("lot {}: start() called twice", self.info.lot_id());
                return Err(EngineError::AlreadyStarted.into());
            }
        };
        let PendingSetup {
            settings,
            handlers,
            viewer,
            params,
            mut source,
            detector,
        } = *setup;

        source.configure(&settings.capture_hints());
        source
            .connect()
            .map_err(|e| EngineError::source_unavailable(source.location(), format!("{:#}", e)))?;

        let viewer = if settings.show_debug_window {
            viewer.or_else(|| self.default_viewer())
        } else {
            None
        };

        let control = Arc::new(RunControl::new());
        let buffer = Arc::new(FrameBuffer::new());
        let dispatcher = EventDispatcher::new(handlers, self.info.clone());

        let mut detection = DetectionLoop::new(
            detector,
            buffer.clone(),
            self.info.counter(),
            dispatcher.clone(),
        )
        .with_params(params)
        .with_idle_backoff(settings.idle_backoff);
        if let Some(viewer) = viewer {
            detection = detection.with_viewer(viewer);
        }
        let cycles = detection.cycle_counter();
        let capture = CaptureLoop::new(source, buffer.clone(), frame_interval(settings.frame_rate));
        let capture_interval = capture.interval();

        control.mark_running();
        // Register both loops before either runs so an early exit of one
        // cannot report the engine stopped.
        let capture_guard = control.enter_loop();
        let detect_guard = control.enter_loop();
        let mut loops = Vec::with_capacity(2);
        let lot_id = self.info.lot_id();

        let spawned = spawn_loop(
            &control,
            capture_guard,
            format!("lot-{}-capture", lot_id),
            move |control| {
                capture.run(control);
            },
        )
        .and_then(|handle| {
            loops.push(handle);
            spawn_loop(
                &control,
                detect_guard,
                format!("lot-{}-detect", lot_id),
                move |control| detection.run(control),
            )
        });
        match spawned {
            Ok(handle) => loops.push(handle),
            Err(e) => {
                control.request_stop(StopReason::Requested);
                join_all(&mut loops);
                return Err(e);
            }
        }

        log::info!(
            "lot {} ({}) started: {} fps, {}x{}, debug window {}",
            lot_id,
            self.info.lot_name(),
            settings.frame_rate,
            settings.frame_width,
            settings.frame_height,
            if settings.show_debug_window { "on" } else { "off" }
        );

        self.lifecycle = Lifecycle::Started(Box::new(Running {
            settings,
            control,
            buffer,
            dispatcher,
            cycles,
            capture_interval,
            loops,
        }));
        Ok(())
    }

    /// Stop both loops and wait for in-flight handlers (bounded).
    ///
    /// The running detection cycle completes; no new one begins. Calling
    /// `stop()` on an engine that never started only freezes it.
    pub fn stop(&mut self) -> Result<()> {
        match &self.lifecycle {
            Lifecycle::Started(running) => running.control.request_stop(StopReason::Requested),
            Lifecycle::Configuring(_) => {
                self.lifecycle = Lifecycle::Halted(self.settings());
                return Ok(());
            }
            Lifecycle::Halted(_) => return Ok(()),
        }
        self.wait()?;
        Ok(())
    }

    /// Block until both loops have ended, then drain handlers.
    pub fn wait(&mut self) -> Result<Option<StopReason>> {
        let Lifecycle::Started(running) = &mut self.lifecycle else {
            return Ok(None);
        };
        join_all(&mut running.loops);
        if !running.dispatcher.wait_idle(HANDLER_DRAIN_TIMEOUT) {
            log::warn!(
                "lot {}: {} event handlers still running after {:?}",
                self.info.lot_id(),
                running.dispatcher.in_flight(),
                HANDLER_DRAIN_TIMEOUT
            );
        }
        let reason = running.control.stop_reason();
        log::info!(
            "lot {} stopped ({:?}), final occupancy {}",
            self.info.lot_id(),
            reason,
            self.info.occupancy()
        );
        Ok(reason)
    }

    fn default_viewer(&self) -> Option<Box<dyn DebugViewer>> {
        #[cfg(feature = "backend-opencv")]
        {
            Some(Box::new(crate::viewer::HighguiViewer::new(self.info.lot_name())))
        }
        #[cfg(not(feature = "backend-opencv"))]
        {
            match crate::viewer::FrameDumpViewer::new(DEFAULT_DEBUG_DIR) {
                Ok(viewer) => Some(Box::new(viewer)),
                Err(e) => {
                    log::warn!("debug window disabled: {:#}", e);
                    None
                }
            }
        }
    }
}

impl Drop for OccupancyEngine {
    fn drop(&mut self) {
        if let Lifecycle::Started(running) = &mut self.lifecycle {
            running.control.request_stop(StopReason::Requested);
            join_all(&mut running.loops);
        }
    }
}

fn spawn_loop<F>(
    control: &Arc<RunControl>,
    guard: LoopGuard,
    name: String,
    body: F,
) -> Result<JoinHandle<()>>
where
    F: FnOnce(&RunControl) + Send + 'static,
{
    let control = control.clone();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let _guard = guard;
            body(&control);
        })
        .with_context(|| format!("failed to spawn {} thread", name))
}

fn join_all(loops: &mut Vec<JoinHandle<()>>) {
    for handle in loops.drain(..) {
        let name = handle.thread().name().unwrap_or("engine loop").to_string();
        if handle.join().is_err() {
            log::error!("{} exited by panic", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedDetector;
    use crate::ingest::SyntheticSource;

    fn engine(counts: Vec<usize>) -> OccupancyEngine {
        OccupancyEngine::with_components(
            EngineInfo::new("stub://lot", 1, "Main Lot"),
            Box::new(SyntheticSource::open("stub://lot").expect("source")),
            Box::new(ScriptedDetector::new(counts)),
        )
    }

    #[test]
    fn defaults_match_capture_hints() {
        let settings = EngineSettings::default();
        assert_eq!(settings.frame_rate, 30.0);
        assert_eq!((settings.frame_width, settings.frame_height), (1920, 1080));
        assert!(!settings.show_debug_window);
    }

    #[test]
    fn new_engine_is_idle() {
        let engine = engine(vec![0]);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.occupancy(), 0);
        assert!(engine.stop_handle().is_none());
        assert_eq!(engine.stats(), EngineStats::default());
    }

    #[test]
    fn stop_before_start_freezes_settings() {
        let mut engine = engine(vec![0]);
        engine.stop().expect("stop");
        engine.set_frame_rate(5.0);
        assert_eq!(engine.settings().frame_rate, 30.0);
        assert_eq!(engine.state(), EngineState::Stopped);
        let err = engine.start().expect_err("start after stop");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::AlreadyStarted)
        ));
    }

    #[test]
    fn start_counts_and_stop_joins() {
        let mut engine = engine(vec![2]);
        engine.set_frame_rate(200.0);
        engine.set_frame_width(64);
        engine.set_frame_height(48);
        engine.set_idle_backoff(Duration::from_millis(1));
        engine.start().expect("start");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while engine.occupancy() != 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.occupancy(), 2);
        engine.stop().expect("stop");
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.stop_reason(), Some(StopReason::Requested));
        assert!(engine.stats().frames_captured > 0);
    }
}
