//! Line-oriented reader for the sectioned beat-timeline format.

use std::str::FromStr;

use crate::{
    curve::{CurveKind, Point},
    PilotError, Result,
};

use super::{HoldEvent, TapEvent, TempoMarker, TimelineEvent, TrajectoryEvent};

pub const TYPE_TAP: u32 = 1;
pub const TYPE_TRAJECTORY: u32 = 1 << 1;
pub const TYPE_HOLD: u32 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Difficulty,
    TimingPoints,
    HitObjects,
    Other,
}

/// Timeline as authored, before any derived timing is filled in.
#[derive(Debug, Default)]
pub(crate) struct RawTimeline {
    pub distance_scale: Option<f64>,
    pub overall_difficulty: Option<f64>,
    pub approach_rate: Option<f64>,
    pub tempo_markers: Vec<TempoMarker>,
    pub events: Vec<TimelineEvent>,
}

pub(crate) fn parse_document(text: &str) -> Result<RawTimeline> {
    let mut raw = RawTimeline::default();
    let mut section = Section::Other;
    let mut last_event_time = f64::NEG_INFINITY;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = match &line[1..line.len() - 1] {
                "Difficulty" => Section::Difficulty,
                "TimingPoints" => Section::TimingPoints,
                "HitObjects" => Section::HitObjects,
                _ => Section::Other,
            };
            continue;
        }

        match section {
            Section::Difficulty => parse_difficulty(&mut raw, line_no, line)?,
            Section::TimingPoints => {
                if let Some(marker) = parse_tempo_marker(line_no, line)? {
                    raw.tempo_markers.push(marker);
                }
            }
            Section::HitObjects => {
                if let Some(event) = parse_event(line_no, line)? {
                    if event.time() < last_event_time {
                        return Err(PilotError::parse(
                            line_no,
                            line,
                            "event time precedes the previous event",
                        ));
                    }
                    last_event_time = event.time();
                    raw.events.push(event);
                }
            }
            Section::Other => {}
        }
    }

    Ok(raw)
}

fn parse_difficulty(raw: &mut RawTimeline, line_no: usize, line: &str) -> Result<()> {
    let Some((key, value)) = line.split_once(':') else {
        return Ok(());
    };
    let slot = match key.trim() {
        "SliderMultiplier" => &mut raw.distance_scale,
        "OverallDifficulty" => &mut raw.overall_difficulty,
        "ApproachRate" => &mut raw.approach_rate,
        _ => return Ok(()),
    };
    *slot = Some(parse_number(value.trim(), line_no, line, key.trim())?);
    Ok(())
}

/// `time,beatLength,meter,sampleSet,sampleIndex,volume,uninherited,effects`
fn parse_tempo_marker(line_no: usize, line: &str) -> Result<Option<TempoMarker>> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 2 {
        return Ok(None);
    }

    Ok(Some(TempoMarker {
        time: required::<f64>(&fields, 0, line_no, line, "time")?,
        beat_duration_ms: required::<f64>(&fields, 1, line_no, line, "beatLength")?,
        meter: optional::<f64>(&fields, 2, 4.0, line_no, line, "meter")? as u32,
        sample_set: optional(&fields, 3, 0, line_no, line, "sampleSet")?,
        sample_index: optional(&fields, 4, 0, line_no, line, "sampleIndex")?,
        volume: optional(&fields, 5, 100, line_no, line, "volume")?,
        is_primary: optional::<u32>(&fields, 6, 1, line_no, line, "uninherited")? == 1,
        effects: optional(&fields, 7, 0, line_no, line, "effects")?,
    }))
}

/// `x,y,time,type,hitSound,[type specific fields]`
fn parse_event(line_no: usize, line: &str) -> Result<Option<TimelineEvent>> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 5 {
        return Err(PilotError::parse(line_no, line, "expected at least 5 fields"));
    }

    let position = Point::new(
        required(&fields, 0, line_no, line, "x")?,
        required(&fields, 1, line_no, line, "y")?,
    );
    let time = required::<f64>(&fields, 2, line_no, line, "time")?;
    let kind = required::<u32>(&fields, 3, line_no, line, "type")?;
    let hit_sound = required::<u32>(&fields, 4, line_no, line, "hitSound")?;

    if kind & TYPE_TAP != 0 {
        return Ok(Some(TimelineEvent::Tap(TapEvent {
            position,
            time,
            hit_sound,
        })));
    }

    if kind & TYPE_HOLD != 0 {
        return Ok(Some(TimelineEvent::Hold(HoldEvent {
            position,
            time,
            end_time: required(&fields, 5, line_no, line, "endTime")?,
            hit_sound,
        })));
    }

    if kind & TYPE_TRAJECTORY != 0 {
        return parse_trajectory(&fields, line_no, line, position, time, hit_sound)
            .map(|event| Some(TimelineEvent::Trajectory(event)));
    }

    tracing::warn!(line = line_no, kind, "skipping event with unsupported type");
    Ok(None)
}

fn parse_trajectory(
    fields: &[&str],
    line_no: usize,
    line: &str,
    start_position: Point,
    time: f64,
    hit_sound: u32,
) -> Result<TrajectoryEvent> {
    let curve = fields
        .get(5)
        .ok_or_else(|| PilotError::parse(line_no, line, "missing curve field"))?;
    let mut parts = curve.split('|');
    let curve_kind = CurveKind::from_code(parts.next().unwrap_or_default())
        .map_err(|err| PilotError::parse(line_no, line, err.to_string()))?;

    let mut control_points = Vec::new();
    for part in parts.filter(|p| !p.is_empty()) {
        let (x, y) = part
            .split_once(':')
            .ok_or_else(|| PilotError::parse(line_no, line, "control point must be `x:y`"))?;
        control_points.push(Point::new(
            parse_number(x, line_no, line, "control point x")?,
            parse_number(y, line_no, line, "control point y")?,
        ));
    }

    let repeat_count = required::<u32>(fields, 6, line_no, line, "slides")?;
    let path_length = required::<f64>(fields, 7, line_no, line, "length")?;

    let mut edge_sounds = Vec::<u32>::new();
    if let Some(raw) = fields.get(8).filter(|f| !f.is_empty()) {
        for sound in raw.split('|') {
            edge_sounds.push(parse_number(sound, line_no, line, "edgeSounds")?);
        }
    }

    let mut edge_sets = Vec::<(u32, u32)>::new();
    if let Some(raw) = fields.get(9).filter(|f| !f.is_empty()) {
        for set in raw.split('|').filter(|s| !s.is_empty()) {
            let (normal, addition) = set
                .split_once(':')
                .ok_or_else(|| PilotError::parse(line_no, line, "edge set must be `a:b`"))?;
            edge_sets.push((
                parse_number(normal, line_no, line, "edgeSets")?,
                parse_number(addition, line_no, line, "edgeSets")?,
            ));
        }
    }

    Ok(TrajectoryEvent {
        start_position,
        control_points,
        curve_kind,
        repeat_count,
        path_length,
        time,
        duration: 0.0,
        hit_sound,
        edge_sounds,
        edge_sets,
        extras: fields.get(10).map(|s| s.to_string()).unwrap_or_default(),
    })
}

fn required<T: FromStr>(
    fields: &[&str],
    index: usize,
    line_no: usize,
    line: &str,
    name: &str,
) -> Result<T> {
    let value = fields
        .get(index)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| PilotError::parse(line_no, line, format!("missing `{name}`")))?;
    parse_number(value, line_no, line, name)
}

fn optional<T: FromStr>(
    fields: &[&str],
    index: usize,
    default: T,
    line_no: usize,
    line: &str,
    name: &str,
) -> Result<T> {
    match fields.get(index).filter(|f| !f.is_empty()) {
        Some(value) => parse_number(value, line_no, line, name),
        None => Ok(default),
    }
}

fn parse_number<T: FromStr>(value: &str, line_no: usize, line: &str, name: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PilotError::parse(line_no, line, format!("`{name}` is not a number: `{value}`")))
}
