//! Offline session driven by recorded detector output.

use std::{path::PathBuf, time::Duration};

use beatpilot_core::{
    AffineMapper, AppConfig, Detector, FrameDims, FrameSlot, ManualClock, PilotError,
    PointerDriver, Point, Prediction, RecordingSettings, Result, Session, StartSignal, Timeline,
    TimelineRecorder,
};
use serde::{Deserialize, Serialize};

/// One captured frame as the detector saw it.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFrame {
    pub time_ms: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    /// Simulates a detector failure for this frame.
    #[serde(default)]
    pub error: Option<String>,
}

impl FrameDims for ReplayFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

/// Hands back whatever was recorded for the frame.
#[derive(Debug, Default)]
pub struct ReplayDetector {
    calls: u64,
}

impl Detector<ReplayFrame> for ReplayDetector {
    fn infer(&mut self, frame: &ReplayFrame) -> Result<Vec<Prediction>> {
        self.calls += 1;
        match &frame.error {
            Some(reason) => Err(PilotError::Detector(reason.clone())),
            None => Ok(frame.predictions.clone()),
        }
    }
}

/// Pointer that only logs what it would have done.
#[derive(Debug, Default)]
pub struct TracingPointer {
    position: Option<Point>,
    pressed: bool,
    commands: usize,
}

impl PointerDriver for TracingPointer {
    fn move_to(&mut self, position: Point) {
        self.commands += 1;
        self.position = Some(position);
        tracing::trace!(x = position.x, y = position.y, pressed = self.pressed, "pointer move");
    }

    fn pointer_down(&mut self) {
        self.commands += 1;
        self.pressed = true;
        tracing::debug!(position = ?self.position, "pointer down");
    }

    fn pointer_up(&mut self) {
        self.commands += 1;
        self.pressed = false;
        tracing::debug!(position = ?self.position, "pointer up");
    }
}

pub struct ReplayOptions {
    pub timeline_path: PathBuf,
    pub detections_path: PathBuf,
    pub record_path: Option<PathBuf>,
    pub tick_ms: f64,
    /// Capture time at which the operator start fires. Frames before it are
    /// only ingested.
    pub start_at_ms: f64,
    pub config: AppConfig,
}

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub ticks: u64,
    pub frames_used: usize,
    pub frames_before_start: usize,
    pub commits: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub pointer_commands: usize,
    pub finished: bool,
    pub end_ms: f64,
}

pub fn run(options: ReplayOptions) -> Result<ReplaySummary> {
    if options.tick_ms.is_nan() || options.tick_ms <= 0.0 {
        return Err(PilotError::config("tick interval must be positive"));
    }
    if options.start_at_ms.is_nan() || options.start_at_ms < 0.0 {
        return Err(PilotError::config("start time must be >= 0"));
    }

    let timeline = Timeline::load(&options.timeline_path)?;
    let text = std::fs::read_to_string(&options.detections_path).map_err(|err| {
        PilotError::config(format!(
            "cannot read detections `{}`: {err}",
            options.detections_path.display()
        ))
    })?;
    let mut frames: Vec<ReplayFrame> = serde_json::from_str(&text)?;
    frames.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
    tracing::info!(frames = frames.len(), tick_ms = options.tick_ms, "replay loaded");

    let last_event_ms = timeline
        .events
        .iter()
        .map(|event| event.end_time())
        .fold(0.0, f64::max);
    let last_frame_ms = frames.last().map_or(0.0, |frame| frame.time_ms);
    let horizon_ms = last_event_ms.max(last_frame_ms) + timeline.lead_in_ms + 1000.0;
    let deadline_ms = options.start_at_ms + horizon_ms;

    let mapper = AffineMapper::new(&options.config.screen);
    let mut session = Session::new(timeline.clone(), &options.config, ManualClock::new(0.0));
    if options.record_path.is_some() {
        session = session.with_recorder(TimelineRecorder::new(
            RecordingSettings::default(),
            &timeline,
        ));
    }

    // Frame times are capture times; the session clock is rebased at start.
    let slot = FrameSlot::new();
    let start = StartSignal::new();
    let mut capture_ms = 0.0;
    let mut pending = frames.into_iter().peekable();
    let mut last_seen = None;
    let mut detector = ReplayDetector::default();
    let mut pointer = TracingPointer::default();
    let mut summary = ReplaySummary::default();

    loop {
        while let Some(frame) = pending.next_if(|frame| frame.time_ms <= capture_ms) {
            slot.publish(frame)?;
        }
        if !session.is_started() {
            if capture_ms >= options.start_at_ms {
                start.fire()?;
            }
            if start.wait_timeout(Duration::ZERO)?.ready().is_some() {
                session.start();
            }
        }

        let snapshot = slot.wait_for_frame(last_seen, Duration::ZERO)?.ready();
        if let Some(snapshot) = &snapshot {
            last_seen = Some(snapshot.sequence);
            summary.frames_used += 1;
        }

        if session.is_started() {
            let report = session.tick(
                snapshot.as_ref().map(|snapshot| snapshot.frame.as_ref()),
                &mut detector,
                &mut pointer,
                &mapper,
            )?;
            summary.commits += usize::from(report.committed.is_some());
            summary.skipped += report.skipped;
            summary.dropped += usize::from(report.dropped.is_some());

            if report.finished {
                summary.finished = true;
                break;
            }
        } else if let Some(snapshot) = &snapshot {
            session.observe(snapshot.frame.as_ref(), &mut detector)?;
            summary.frames_before_start += 1;
        }

        if capture_ms > deadline_ms {
            tracing::warn!(
                index = session.engine().index(),
                events = session.engine().events().len(),
                "replay ran past the last frame without finishing"
            );
            break;
        }
        capture_ms += options.tick_ms;
        session.clock_mut().advance(options.tick_ms);
    }

    summary.ticks = session.ticks();
    summary.pointer_commands = pointer.commands;
    summary.end_ms = session.now_ms();

    if let (Some(path), Some(recorder)) = (&options.record_path, session.take_recorder()) {
        recorder.write_to(path)?;
    }

    tracing::info!(
        ticks = summary.ticks,
        commits = summary.commits,
        detector_calls = detector.calls,
        finished = summary.finished,
        "replay complete"
    );
    Ok(summary)
}
