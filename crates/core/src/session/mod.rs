use crate::{
    action::PointerDriver,
    capture::FrameDims,
    clock::Clock,
    config::AppConfig,
    detection::{CoordinateMapper, DetectionFilter, Detector, Prediction},
    engine::{ReconciliationEngine, TickReport},
    queue::DetectionQueue,
    record::TimelineRecorder,
    timeline::Timeline,
    Result,
};

/// All mutable state of one automated run, advanced one tick at a time from a
/// single control loop.
#[derive(Debug)]
pub struct Session<C: Clock> {
    clock: C,
    queue: DetectionQueue,
    engine: ReconciliationEngine,
    filter: DetectionFilter,
    recorder: Option<TimelineRecorder>,
    start_offset_ms: f64,
    started: bool,
    ticks: u64,
}

impl<C: Clock> Session<C> {
    pub fn new(timeline: Timeline, config: &AppConfig, clock: C) -> Self {
        let anchored = config.session.anchor_to_first_event && !timeline.is_empty();
        let start_offset_ms = if anchored {
            timeline.events[0].time()
        } else {
            0.0
        };

        let mut engine =
            ReconciliationEngine::new(timeline.events, config.matcher.clone(), timeline.lead_in_ms);
        if anchored {
            engine.start_at(1);
        }

        tracing::debug!(
            age_threshold_ms = engine.age_threshold_ms(),
            start_offset_ms,
            anchored,
            "session prepared"
        );

        Self {
            clock,
            queue: DetectionQueue::new(config.queue.clone()),
            engine,
            filter: DetectionFilter::new(&config.detector),
            recorder: None,
            start_offset_ms,
            started: false,
            ticks: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: TimelineRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Sets session time to the start offset. Everything already in the queue
    /// is shifted with the clock so detection ages and cooldowns carry over.
    pub fn start(&mut self) {
        let before = self.clock.now_ms();
        self.clock.rebase(self.start_offset_ms);
        let delta_ms = self.clock.now_ms() - before;
        self.queue.shift_timestamps(delta_ms);
        self.started = true;
        tracing::info!(
            start_offset_ms = self.start_offset_ms,
            delta_ms,
            carried = self.queue.len(),
            "session started"
        );
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn queue(&self) -> &DetectionQueue {
        &self.queue
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn recorder(&self) -> Option<&TimelineRecorder> {
        self.recorder.as_ref()
    }

    pub fn take_recorder(&mut self) -> Option<TimelineRecorder> {
        self.recorder.take()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_finished(&self) -> bool {
        self.engine.is_finished()
    }

    /// Filters raw predictions and offers the survivors to the queue. Returns
    /// how many became live.
    pub fn ingest(&mut self, predictions: &[Prediction], width: f64, height: f64) -> usize {
        let now = self.clock.now_ms();
        predictions
            .iter()
            .filter_map(|prediction| self.filter.admit(prediction, width, height, now))
            .collect::<Vec<_>>()
            .into_iter()
            .filter(|detection| self.queue.add(*detection, now))
            .count()
    }

    /// Runs inference on `frame` and ingests the result. Usable before
    /// [`Session::start`]. A recoverable detector failure is logged and counts
    /// as an empty frame.
    pub fn observe<F, D>(&mut self, frame: &F, detector: &mut D) -> Result<usize>
    where
        F: FrameDims,
        D: Detector<F> + ?Sized,
    {
        match detector.infer(frame) {
            Ok(predictions) => Ok(self.ingest(
                &predictions,
                f64::from(frame.width()),
                f64::from(frame.height()),
            )),
            Err(err) if err.is_recoverable() => {
                tracing::warn!(tick = self.ticks, error = %err, "skipping inference this tick");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs inference on `frame` (if any), then advances the engine.
    ///
    /// A failing detector only skips ingestion for this tick.
    pub fn tick<F, D, P, M>(
        &mut self,
        frame: Option<&F>,
        detector: &mut D,
        pointer: &mut P,
        mapper: &M,
    ) -> Result<TickReport>
    where
        F: FrameDims,
        D: Detector<F> + ?Sized,
        P: PointerDriver + ?Sized,
        M: CoordinateMapper + ?Sized,
    {
        self.ticks += 1;

        if let Some(frame) = frame {
            self.observe(frame, detector)?;
        }

        let now = self.clock.now_ms();
        let report = self.engine.tick(now, &mut self.queue, pointer, mapper);

        if let (Some(commit), Some(recorder)) = (&report.committed, self.recorder.as_mut()) {
            if let Some(event) = self.engine.events().get(commit.event_index) {
                recorder.record(commit, event);
            }
        }

        if report.finished && report.completed.is_some() {
            tracing::info!(ticks = self.ticks, "timeline exhausted");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action::{PointerCommand, RecordingPointer},
        clock::ManualClock,
        config::ScreenConfig,
        curve::Point,
        detection::AffineMapper,
        record::RecordingSettings,
        PilotError,
    };

    struct TestFrame;

    impl FrameDims for TestFrame {
        fn width(&self) -> u32 {
            640
        }

        fn height(&self) -> u32 {
            480
        }
    }

    /// Returns the scripted result for each call in turn.
    struct ScriptedDetector {
        script: Vec<Result<Vec<Prediction>>>,
    }

    impl Detector<TestFrame> for ScriptedDetector {
        fn infer(&mut self, _frame: &TestFrame) -> Result<Vec<Prediction>> {
            if self.script.is_empty() {
                Ok(Vec::new())
            } else {
                self.script.remove(0)
            }
        }
    }

    fn circle_at(x: f64, y: f64) -> Prediction {
        Prediction {
            class: "circle".to_string(),
            confidence: 0.95,
            x,
            y,
            width: 40.0,
            height: 40.0,
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.matcher.lead_in_offset_ms = 0.0;
        config.screen = ScreenConfig {
            origin_x: 0.0,
            origin_y: 0.0,
            width: 1280.0,
            height: 960.0,
        };
        config
    }

    fn timeline() -> Timeline {
        // Approach rate 10 gives a 450 ms lead-in.
        Timeline::parse("[Difficulty]\nApproachRate:10\n[HitObjects]\n100,100,1000,1,0\n").unwrap()
    }

    #[test]
    fn detections_flow_through_to_a_tap() {
        let config = config();
        let mapper = AffineMapper::new(&config.screen);
        let mut session = Session::new(timeline(), &config, ManualClock::new(0.0))
            .with_recorder(TimelineRecorder::new(RecordingSettings::default(), &timeline()));
        session.start();
        let mut pointer = RecordingPointer::new();
        let mut detector = ScriptedDetector {
            script: vec![
                Ok(vec![circle_at(100.0, 100.0)]),
                Ok(vec![circle_at(100.0, 100.0)]),
                Ok(vec![circle_at(100.0, 100.0)]),
            ],
        };

        let mut committed_at = None;
        for step in 0..40 {
            session.clock_mut().set(500.0 + step as f64 * 20.0);
            let report = session
                .tick(Some(&TestFrame), &mut detector, &mut pointer, &mapper)
                .unwrap();
            if report.committed.is_some() {
                committed_at = Some(session.now_ms());
            }
            if report.finished {
                break;
            }
        }

        // Third observation lands at 540 ms; it is ready 450 ms later.
        assert_eq!(committed_at, Some(1000.0));
        assert!(session.is_finished());
        assert_eq!(
            pointer.commands[0],
            PointerCommand::MoveTo(Point::new(200.0, 200.0))
        );
        assert_eq!(session.recorder().unwrap().entries().len(), 1);
    }

    #[test]
    fn detector_failure_skips_only_that_tick() {
        let mut config = config();
        config.queue.min_observation_count = 1;
        let mapper = AffineMapper::new(&config.screen);
        let mut session = Session::new(timeline(), &config, ManualClock::new(0.0));
        let mut pointer = RecordingPointer::new();
        let mut detector = ScriptedDetector {
            script: vec![
                Err(PilotError::Detector("model offline".to_string())),
                Ok(vec![circle_at(10.0, 10.0)]),
            ],
        };

        let report = session
            .tick(Some(&TestFrame), &mut detector, &mut pointer, &mapper)
            .unwrap();
        assert!(!report.finished);
        assert!(session.queue().is_empty());

        session
            .tick(Some(&TestFrame), &mut detector, &mut pointer, &mapper)
            .unwrap();
        assert_eq!(session.queue().len(), 1);
    }

    #[test]
    fn fatal_detector_errors_propagate() {
        let config = config();
        let mapper = AffineMapper::new(&config.screen);
        let mut session = Session::new(timeline(), &config, ManualClock::new(0.0));
        let mut detector = ScriptedDetector {
            script: vec![Err(PilotError::msg("broken"))],
        };
        let result = session.tick(
            Some(&TestFrame),
            &mut detector,
            &mut RecordingPointer::new(),
            &mapper,
        );
        assert!(result.is_err());
    }

    #[test]
    fn detections_seen_before_start_keep_their_age() {
        let mut config = config();
        config.queue.min_observation_count = 1;
        let mapper = AffineMapper::new(&config.screen);
        let mut session = Session::new(timeline(), &config, ManualClock::new(0.0));
        let mut detector = ScriptedDetector {
            script: vec![Ok(vec![circle_at(100.0, 100.0)])],
        };

        assert_eq!(session.observe(&TestFrame, &mut detector).unwrap(), 1);
        session.clock_mut().set(3000.0);
        session.start();
        assert_eq!(session.now_ms(), 0.0);
        assert_eq!(session.queue().iter().next().unwrap().timestamp_ms, -3000.0);

        let mut pointer = RecordingPointer::new();
        let mut committed_at = None;
        for step in 0..200 {
            session.clock_mut().set(step as f64 * 10.0);
            let report = session
                .tick::<TestFrame, _, _, _>(None, &mut detector, &mut pointer, &mapper)
                .unwrap();
            if report.committed.is_some() {
                committed_at = Some(session.now_ms());
                break;
            }
        }

        // Already 3 s old at start, so it is ready on the first tick.
        assert_eq!(committed_at, Some(0.0));
    }

    #[test]
    fn anchored_session_starts_after_first_event() {
        let mut config = config();
        config.session.anchor_to_first_event = true;
        let timeline = Timeline::parse("[HitObjects]\n1,1,2500,1,0\n2,2,3000,1,0\n").unwrap();
        let mut session = Session::new(timeline, &config, ManualClock::new(0.0));
        session.start();

        assert_eq!(session.now_ms(), 2500.0);
        assert_eq!(session.engine().index(), 1);
    }
}
