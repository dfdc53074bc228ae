use std::{fmt::Write as _, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    curve::Point,
    engine::Commit,
    timeline::{TempoMarker, Timeline, TimelineEvent},
    Result,
};

/// Metadata written at the top of a recorded timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub title: String,
    pub version: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            title: "untitled".to_string(),
            version: "replicated".to_string(),
        }
    }
}

/// One matched event as it was actually executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub event_index: usize,
    pub committed_ms: f64,
    pub event: TimelineEvent,
}

/// Collects committed actions and writes them back out as a timeline.
#[derive(Debug)]
pub struct TimelineRecorder {
    settings: RecordingSettings,
    tempo_markers: Vec<TempoMarker>,
    distance_scale: f64,
    overall_difficulty: f64,
    approach_rate: Option<f64>,
    entries: Vec<RecordedEvent>,
    is_recording: bool,
}

impl TimelineRecorder {
    pub fn new(settings: RecordingSettings, timeline: &Timeline) -> Self {
        Self {
            settings,
            tempo_markers: timeline.tempo_markers.clone(),
            distance_scale: timeline.distance_scale,
            overall_difficulty: timeline.overall_difficulty,
            approach_rate: timeline.approach_rate,
            entries: Vec::new(),
            is_recording: true,
        }
    }

    pub fn start(&mut self) {
        self.is_recording = true;
    }

    pub fn stop(&mut self) {
        self.is_recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn record(&mut self, commit: &Commit, event: &TimelineEvent) {
        if !self.is_recording {
            return;
        }
        self.entries.push(RecordedEvent {
            event_index: commit.event_index,
            committed_ms: commit.at_ms,
            event: event.clone(),
        });
    }

    pub fn entries(&self) -> &[RecordedEvent] {
        &self.entries
    }

    /// Renders the record in the sectioned timeline format, using commit
    /// times in place of authored times.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("osu file format v14\n\n[General]\n\n[Metadata]\n");
        let _ = writeln!(out, "Title:{}", self.settings.title);
        let _ = writeln!(out, "Version:{}", self.settings.version);

        out.push_str("\n[Difficulty]\n");
        let _ = writeln!(out, "OverallDifficulty:{}", self.overall_difficulty);
        if let Some(approach) = self.approach_rate {
            let _ = writeln!(out, "ApproachRate:{approach}");
        }
        let _ = writeln!(out, "SliderMultiplier:{}", self.distance_scale);

        out.push_str("\n[TimingPoints]\n");
        for marker in &self.tempo_markers {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{},{}",
                marker.time,
                marker.beat_duration_ms,
                marker.meter,
                marker.sample_set,
                marker.sample_index,
                marker.volume,
                u8::from(marker.is_primary),
                marker.effects
            );
        }

        out.push_str("\n[HitObjects]\n");
        for entry in &self.entries {
            out.push_str(&render_event(entry));
            out.push('\n');
        }
        out
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.render())?;
        tracing::info!(path = %path.display(), events = self.entries.len(), "timeline record written");
        Ok(())
    }
}

fn render_event(entry: &RecordedEvent) -> String {
    let time = entry.committed_ms.round();
    let event = &entry.event;
    let Point { x, y } = event.position();
    let mut line = format!("{x},{y},{time},{}", event.type_bits());

    match event {
        TimelineEvent::Tap(tap) => {
            let _ = write!(line, ",{}", tap.hit_sound);
        }
        TimelineEvent::Trajectory(trajectory) => {
            let _ = write!(line, ",{},{}", trajectory.hit_sound, trajectory.curve_kind.code());
            for point in &trajectory.control_points {
                let _ = write!(line, "|{}:{}", point.x, point.y);
            }
            let _ = write!(line, ",{},{}", trajectory.repeat_count, trajectory.path_length);
        }
        TimelineEvent::Hold(hold) => {
            let end = (time + (hold.end_time - hold.time)).round();
            let _ = write!(line, ",{},{end}", hold.hit_sound);
        }
    }
    line
}
