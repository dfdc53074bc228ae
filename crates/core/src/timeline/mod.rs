//! Beat timeline loading and derived per-event timing.

mod parser;

pub use parser::{TYPE_HOLD, TYPE_TAP, TYPE_TRAJECTORY};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    curve::{CurveKind, PathTable, Point},
    detection::TargetClass,
    PilotError, Result,
};

/// Beat duration used when no primary tempo marker precedes an event (120 BPM).
pub const DEFAULT_BEAT_DURATION_MS: f64 = 500.0;
const DEFAULT_DIFFICULTY: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapEvent {
    pub position: Point,
    pub time: f64,
    pub hit_sound: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    pub start_position: Point,
    pub control_points: Vec<Point>,
    pub curve_kind: CurveKind,
    pub repeat_count: u32,
    /// Authored path length in playfield units.
    pub path_length: f64,
    pub time: f64,
    /// Total traversal time across all repeats, derived at load.
    pub duration: f64,
    pub hit_sound: u32,
    pub edge_sounds: Vec<u32>,
    pub edge_sets: Vec<(u32, u32)>,
    pub extras: String,
}

impl TrajectoryEvent {
    pub fn end_time(&self) -> f64 {
        self.time + self.duration
    }

    /// Start position followed by the control points.
    pub fn path_points(&self) -> Vec<Point> {
        let mut points = Vec::with_capacity(self.control_points.len() + 1);
        points.push(self.start_position);
        points.extend_from_slice(&self.control_points);
        points
    }

    pub fn path_table(&self) -> PathTable {
        PathTable::build(self.curve_kind, &self.path_points())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldEvent {
    pub position: Point,
    pub time: f64,
    pub end_time: f64,
    pub hit_sound: u32,
}

/// One expected action on the timeline. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimelineEvent {
    Tap(TapEvent),
    Trajectory(TrajectoryEvent),
    Hold(HoldEvent),
}

impl TimelineEvent {
    pub fn time(&self) -> f64 {
        match self {
            Self::Tap(tap) => tap.time,
            Self::Trajectory(trajectory) => trajectory.time,
            Self::Hold(hold) => hold.time,
        }
    }

    pub fn end_time(&self) -> f64 {
        match self {
            Self::Tap(tap) => tap.time,
            Self::Trajectory(trajectory) => trajectory.end_time(),
            Self::Hold(hold) => hold.end_time,
        }
    }

    pub fn position(&self) -> Point {
        match self {
            Self::Tap(tap) => tap.position,
            Self::Trajectory(trajectory) => trajectory.start_position,
            Self::Hold(hold) => hold.position,
        }
    }

    /// Detector class that announces this event.
    pub fn expected_class(&self) -> TargetClass {
        match self {
            Self::Tap(_) => TargetClass::Circle,
            Self::Trajectory(_) => TargetClass::Slider,
            Self::Hold(_) => TargetClass::Spinner,
        }
    }

    pub fn type_bits(&self) -> u32 {
        match self {
            Self::Tap(_) => TYPE_TAP,
            Self::Trajectory(_) => TYPE_TRAJECTORY,
            Self::Hold(_) => TYPE_HOLD,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Tap(_) => "tap",
            Self::Trajectory(_) => "trajectory",
            Self::Hold(_) => "hold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoMarker {
    pub time: f64,
    /// Milliseconds per beat for primary markers; negative velocity encoding
    /// for secondary ones.
    pub beat_duration_ms: f64,
    pub meter: u32,
    pub sample_set: u32,
    pub sample_index: u32,
    pub volume: u32,
    pub is_primary: bool,
    pub effects: u32,
}

impl TempoMarker {
    /// `100 / |beatDurationMs|` for secondary markers, 1.0 otherwise.
    pub fn velocity_multiplier(&self) -> f64 {
        if self.is_primary || self.beat_duration_ms == 0.0 {
            1.0
        } else {
            100.0 / self.beat_duration_ms.abs()
        }
    }
}

/// Fully prepared timeline: ordered events with derived timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub events: Vec<TimelineEvent>,
    pub tempo_markers: Vec<TempoMarker>,
    pub distance_scale: f64,
    pub overall_difficulty: f64,
    pub approach_rate: Option<f64>,
    /// Time an object is visible before its trigger time.
    pub lead_in_ms: f64,
}

impl Timeline {
    /// Loads and prepares a timeline file. An unreadable file is a
    /// configuration error; malformed content is a parse error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            PilotError::config(format!("cannot read timeline `{}`: {err}", path.display()))
        })?;
        let timeline = Self::parse(&text)?;
        tracing::info!(
            path = %path.display(),
            events = timeline.events.len(),
            tempo_markers = timeline.tempo_markers.len(),
            lead_in_ms = timeline.lead_in_ms,
            "timeline loaded"
        );
        Ok(timeline)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let raw = parser::parse_document(text)?;

        let distance_scale = raw.distance_scale.unwrap_or(1.0);
        let overall_difficulty = raw.overall_difficulty.unwrap_or(DEFAULT_DIFFICULTY);
        let mut tempo_markers = raw.tempo_markers;
        tempo_markers.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut events = raw.events;
        derive_trajectory_timing(&mut events, &tempo_markers, distance_scale);

        Ok(Self {
            events,
            tempo_markers,
            distance_scale,
            overall_difficulty,
            approach_rate: raw.approach_rate,
            lead_in_ms: lead_in_ms(raw.approach_rate.unwrap_or(overall_difficulty)),
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Half-width of the tightest scoring window, `80 - 6 * difficulty` ms.
    pub fn perfect_hit_window_ms(&self) -> f64 {
        80.0 - 6.0 * self.overall_difficulty
    }

    pub fn count_by_kind(&self) -> (usize, usize, usize) {
        self.events
            .iter()
            .fold((0, 0, 0), |(taps, trajectories, holds), event| match event {
                TimelineEvent::Tap(_) => (taps + 1, trajectories, holds),
                TimelineEvent::Trajectory(_) => (taps, trajectories + 1, holds),
                TimelineEvent::Hold(_) => (taps, trajectories, holds + 1),
            })
    }
}

/// Approach delay for a difficulty value, piecewise linear around 5.
pub fn lead_in_ms(approach: f64) -> f64 {
    if approach <= 5.0 {
        1200.0 + 120.0 * (5.0 - approach)
    } else {
        1200.0 - 150.0 * (approach - 5.0)
    }
}

/// Latest primary marker at or before `time`. Markers must be sorted.
pub fn active_primary(markers: &[TempoMarker], time: f64) -> Option<&TempoMarker> {
    markers
        .iter()
        .take_while(|marker| marker.time <= time)
        .filter(|marker| marker.is_primary)
        .last()
}

/// Latest secondary marker at or before `time`. Markers must be sorted.
pub fn active_secondary(markers: &[TempoMarker], time: f64) -> Option<&TempoMarker> {
    markers
        .iter()
        .take_while(|marker| marker.time <= time)
        .filter(|marker| !marker.is_primary)
        .last()
}

/// Traversal time of a path across all repeats under the tempo active at
/// `start`.
pub fn trajectory_duration_ms(
    markers: &[TempoMarker],
    distance_scale: f64,
    start: f64,
    path_length: f64,
    repeat_count: u32,
) -> f64 {
    let beat_duration = active_primary(markers, start)
        .map(|marker| marker.beat_duration_ms)
        .unwrap_or(DEFAULT_BEAT_DURATION_MS);
    let velocity = active_secondary(markers, start)
        .map(TempoMarker::velocity_multiplier)
        .unwrap_or(1.0);

    let pixels_per_beat = distance_scale * 100.0 * velocity;
    if pixels_per_beat <= 0.0 {
        return 0.0;
    }
    let beats = path_length * f64::from(repeat_count) / pixels_per_beat;
    beats * beat_duration
}

fn derive_trajectory_timing(
    events: &mut [TimelineEvent],
    markers: &[TempoMarker],
    distance_scale: f64,
) {
    for event in events.iter_mut() {
        if let TimelineEvent::Trajectory(trajectory) = event {
            trajectory.duration = trajectory_duration_ms(
                markers,
                distance_scale,
                trajectory.time,
                trajectory.path_length,
                trajectory.repeat_count,
            );
        }
    }
}
