//! Lotwatch - parking lot occupancy engine
//!
//! Watches one camera per lot, counts the vehicles in the newest frame, and
//! fires an arrival or departure event for every unit the count changes by.
//!
//! # Architecture
//!
//! Each `OccupancyEngine` runs two loops on their own threads:
//!
//! 1. **Capture**: pulls frames from a `FrameSource` into a single-slot
//!    `FrameBuffer`, paced at the configured frame rate. Slow consumers see
//!    only the newest frame.
//! 2. **Detection**: converts the newest frame to grayscale, runs the
//!    `Detector`, replaces the vehicle count and hands the difference to the
//!    event dispatcher, which runs each handler fire-and-forget.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, grayscale views, the single-slot buffer
//! - `ingest`: frame sources (synthetic, local files, RTSP)
//! - `detect`: detector trait, parameters, backends, model loading
//! - `occupancy`, `events`: count diffing and event dispatch
//! - `capture`, `detection_loop`, `control`, `engine`: the running engine
//! - `viewer`: debug visualization
//! - `storage`, `config`: the daemon's SQLite store and configuration

pub mod capture;
pub mod config;
pub mod control;
pub mod detect;
pub mod detection_loop;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod occupancy;
pub mod storage;
pub mod viewer;

pub use control::{EngineState, StopReason};
pub use detect::{
    load_detector, BoundingBox, DetectionParams, DetectionResult, Detector, ScriptedDetector, Size,
};
pub use engine::{EngineInfo, EngineSettings, EngineStats, OccupancyEngine, StopHandle};
pub use error::EngineError;
pub use events::{handler, EventHandler, EventHandlers, EventKind, VehicleEvent};
pub use frame::{Frame, FrameBuffer, GrayFrame};
pub use ingest::{open_source, CaptureHints, FrameSource, SyntheticSource};
pub use occupancy::{OccupancyCounter, OccupancyDelta};
pub use storage::{occupancy_handlers, OccupancyStore, SqliteOccupancyStore};
pub use viewer::{DebugViewer, FrameDumpViewer, ViewerAction};
