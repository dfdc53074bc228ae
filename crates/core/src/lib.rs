//! Core library for the beatpilot automation engine.
//!
//! A session reads an authored timeline of timed events, takes object
//! detections from an external detector, filters and confirms them in a
//! queue and reconciles them against the timeline to drive a pointer. Each
//! module owns one subsystem; [`session::Session`] wires them together for a
//! single control loop.

pub mod action;
pub mod capture;
pub mod clock;
pub mod config;
pub mod curve;
pub mod detection;
pub mod engine;
pub mod error;
pub mod queue;
pub mod record;
pub mod session;
pub mod timeline;

pub use action::{Action, PointerCommand, PointerDriver, RecordingPointer, TrajectoryMode};
pub use capture::{FrameDims, FrameSlot, FrameSnapshot, StartSignal, WaitOutcome};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{AppConfig, DetectorConfig, MatcherConfig, QueueConfig, ScreenConfig, SessionConfig};
pub use curve::{CurveKind, PathTable, Point};
pub use detection::{
    AffineMapper, CoordinateMapper, Detection, DetectionFilter, Detector, Prediction, TargetClass,
};
pub use engine::{Commit, ReconciliationEngine, TickReport};
pub use error::{PilotError, Result};
pub use queue::{AddOutcome, DetectionQueue};
pub use record::{RecordingSettings, TimelineRecorder};
pub use session::Session;
pub use timeline::{Timeline, TimelineEvent};
