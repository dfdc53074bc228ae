use crate::{
    action::{Action, HoldAction, PointerDriver, TapAction, TrajectoryAction},
    config::MatcherConfig,
    curve::Point,
    detection::{CoordinateMapper, Detection},
    queue::DetectionQueue,
    timeline::TimelineEvent,
};

/// An action created for a timeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub event_index: usize,
    pub at_ms: f64,
    /// Screen target for detection-driven events.
    pub target: Option<Point>,
    pub detection: Option<Detection>,
}

/// What one engine tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub committed: Option<Commit>,
    /// Event index whose action finished this tick.
    pub completed: Option<usize>,
    /// Events passed over by a lookahead skip.
    pub skipped: usize,
    /// A ready detection was discarded without a match.
    pub dropped: Option<Detection>,
    pub finished: bool,
}

/// Walks the timeline, pairing ready detections with expected events.
///
/// Taps are detection-driven; trajectories and holds are time-driven. At most
/// one [`Action`] runs at a time and the timeline index only moves forward.
#[derive(Debug)]
pub struct ReconciliationEngine {
    events: Vec<TimelineEvent>,
    index: usize,
    current: Option<Action>,
    config: MatcherConfig,
    age_threshold_ms: f64,
}

impl ReconciliationEngine {
    pub fn new(events: Vec<TimelineEvent>, config: MatcherConfig, lead_in_ms: f64) -> Self {
        let age_threshold_ms = config.age_threshold_ms(lead_in_ms);
        Self {
            events,
            index: 0,
            current: None,
            config,
            age_threshold_ms,
        }
    }

    /// Positions the engine at `index` before the first tick.
    pub fn start_at(&mut self, index: usize) {
        self.index = index.min(self.events.len());
        self.current = None;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn current_action(&self) -> Option<&Action> {
        self.current.as_ref()
    }

    pub fn age_threshold_ms(&self) -> f64 {
        self.age_threshold_ms
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.events.len()
    }

    pub fn tick<P, M>(
        &mut self,
        now_ms: f64,
        queue: &mut DetectionQueue,
        pointer: &mut P,
        mapper: &M,
    ) -> TickReport
    where
        P: PointerDriver + ?Sized,
        M: CoordinateMapper + ?Sized,
    {
        let mut report = TickReport::default();

        if self.current.is_none() && !self.is_finished() {
            let detection = queue
                .pop_ready(now_ms, self.age_threshold_ms)
                .into_iter()
                .next();
            if detection.is_some() || self.time_triggered(now_ms) {
                self.match_event(detection, now_ms, queue, mapper, &mut report);
            }
        }

        if let Some(action) = self.current.as_mut() {
            action.update(now_ms, pointer);
            if action.is_done() {
                report.completed = Some(action.event_index());
                self.current = None;
                self.index += 1;
                tracing::trace!(index = self.index, "action complete");
            }
        }

        report.finished = self.is_finished();
        report
    }

    /// Holds are always evaluated; trajectories once their time has come.
    fn time_triggered(&self, now_ms: f64) -> bool {
        match self.events.get(self.index) {
            Some(TimelineEvent::Hold(_)) => true,
            Some(TimelineEvent::Trajectory(trajectory)) => now_ms >= trajectory.time,
            _ => false,
        }
    }

    fn match_event<M: CoordinateMapper + ?Sized>(
        &mut self,
        detection: Option<Detection>,
        now_ms: f64,
        queue: &mut DetectionQueue,
        mapper: &M,
        report: &mut TickReport,
    ) {
        // One skip at most, then the landing event always resolves.
        for _ in 0..2 {
            let Some(event) = self.events.get(self.index) else {
                return;
            };

            match event {
                TimelineEvent::Tap(_) => {
                    if let Some(found) = detection.filter(|d| d.class == event.expected_class()) {
                        let target = mapper.map_detection(
                            found.x,
                            found.y,
                            found.source_width,
                            found.source_height,
                        );
                        self.current = Some(Action::Tap(TapAction::new(self.index, target)));
                        queue.remove(&found, now_ms);
                        report.committed = Some(self.commit(now_ms, Some(target), Some(found)));
                        return;
                    }

                    match self.trajectory_ahead() {
                        Some(offset) => {
                            tracing::debug!(
                                from = self.index,
                                to = self.index + offset,
                                class = ?detection.map(|d| d.class),
                                "skipping to upcoming trajectory"
                            );
                            self.index += offset;
                            report.skipped += offset;
                        }
                        None => {
                            if let Some(unmatched) = detection {
                                queue.remove(&unmatched, now_ms);
                                report.dropped = Some(unmatched);
                                tracing::debug!(
                                    index = self.index,
                                    class = %unmatched.class,
                                    "dropping unmatched detection"
                                );
                            }
                            return;
                        }
                    }
                }
                TimelineEvent::Trajectory(trajectory) => {
                    if now_ms >= trajectory.time {
                        self.current = Some(Action::Trajectory(TrajectoryAction::new(
                            self.index,
                            trajectory,
                            mapper,
                            self.config.trajectory_mode,
                        )));
                        if let Some(consumed) = detection {
                            queue.remove(&consumed, now_ms);
                        }
                        report.committed = Some(self.commit(now_ms, None, detection));
                    }
                    return;
                }
                TimelineEvent::Hold(hold) => {
                    if now_ms >= hold.time {
                        self.current = Some(Action::Hold(HoldAction::new(
                            self.index,
                            hold,
                            mapper,
                            &self.config,
                        )));
                        report.committed = Some(self.commit(now_ms, None, None));
                    }
                    return;
                }
            }
        }
    }

    /// Offset of the first trajectory within the lookahead window.
    fn trajectory_ahead(&self) -> Option<usize> {
        let window_end = (self.index + self.config.lookahead_window).min(self.events.len());
        self.events[self.index..window_end]
            .iter()
            .position(|event| matches!(event, TimelineEvent::Trajectory(_)))
    }

    fn commit(&self, at_ms: f64, target: Option<Point>, detection: Option<Detection>) -> Commit {
        let kind = self.events.get(self.index).map(TimelineEvent::kind_name);
        tracing::info!(index = self.index, kind, at_ms, "action committed");
        Commit {
            event_index: self.index,
            at_ms,
            target,
            detection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action::{PointerCommand, RecordingPointer},
        config::{QueueConfig, ScreenConfig},
        curve::CurveKind,
        detection::{AffineMapper, TargetClass},
        timeline::{HoldEvent, TapEvent, TrajectoryEvent},
    };

    fn mapper() -> AffineMapper {
        AffineMapper::new(&ScreenConfig {
            origin_x: 0.0,
            origin_y: 0.0,
            width: 640.0,
            height: 480.0,
        })
    }

    fn matcher() -> MatcherConfig {
        MatcherConfig {
            lead_in_offset_ms: 0.0,
            ..MatcherConfig::default()
        }
    }

    fn queue() -> DetectionQueue {
        DetectionQueue::new(QueueConfig::default())
    }

    fn tap(time: f64) -> TimelineEvent {
        TimelineEvent::Tap(TapEvent {
            position: Point::new(100.0, 100.0),
            time,
            hit_sound: 0,
        })
    }

    fn trajectory(time: f64) -> TimelineEvent {
        TimelineEvent::Trajectory(TrajectoryEvent {
            start_position: Point::new(0.0, 0.0),
            control_points: vec![Point::new(256.0, 0.0)],
            curve_kind: CurveKind::Linear,
            repeat_count: 1,
            path_length: 256.0,
            time,
            duration: 100.0,
            hit_sound: 0,
            edge_sounds: Vec::new(),
            edge_sets: Vec::new(),
            extras: String::new(),
        })
    }

    fn hold(time: f64, end_time: f64) -> TimelineEvent {
        TimelineEvent::Hold(HoldEvent {
            position: Point::new(256.0, 192.0),
            time,
            end_time,
            hit_sound: 0,
        })
    }

    fn detection(class: TargetClass, x: f64, y: f64, timestamp_ms: f64) -> Detection {
        Detection {
            class,
            x,
            y,
            confidence: 0.9,
            source_width: 640.0,
            source_height: 480.0,
            timestamp_ms,
        }
    }

    fn confirm(queue: &mut DetectionQueue, d: Detection, times: &[f64]) {
        for t in times {
            queue.add(d, *t);
        }
    }

    #[test]
    fn confirmed_circle_becomes_a_tap() {
        let mut engine = ReconciliationEngine::new(vec![tap(1000.0)], matcher(), 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();
        let circle = detection(TargetClass::Circle, 100.0, 100.0, 900.0);
        confirm(&mut queue, circle, &[900.0, 910.0, 920.0]);

        let report = engine.tick(1000.0, &mut queue, &mut pointer, &mapper());

        let commit = report.committed.expect("tap should be committed");
        assert_eq!(commit.event_index, 0);
        assert_eq!(commit.target, Some(Point::new(100.0, 100.0)));
        assert_eq!(report.completed, Some(0));
        assert!(report.finished);
        assert_eq!(engine.index(), 1);
        assert!(queue.is_empty());
        assert_eq!(
            pointer.commands,
            vec![
                PointerCommand::MoveTo(Point::new(100.0, 100.0)),
                PointerCommand::Down,
                PointerCommand::Up
            ]
        );
    }

    #[test]
    fn detections_wait_for_the_age_threshold() {
        let mut engine = ReconciliationEngine::new(vec![tap(1000.0)], matcher(), 500.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();
        confirm(&mut queue, detection(TargetClass::Circle, 1.0, 1.0, 600.0), &[600.0, 600.0, 600.0]);

        let report = engine.tick(1099.0, &mut queue, &mut pointer, &mapper());
        assert!(report.committed.is_none());
        let report = engine.tick(1100.0, &mut queue, &mut pointer, &mapper());
        assert!(report.committed.is_some());
    }

    #[test]
    fn mismatch_skips_to_trajectory_in_window() {
        let events = vec![tap(1000.0), tap(1100.0), trajectory(1200.0), tap(1400.0)];
        let mut engine = ReconciliationEngine::new(events, matcher(), 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();
        confirm(
            &mut queue,
            detection(TargetClass::Slider, 50.0, 50.0, 900.0),
            &[900.0, 900.0, 900.0],
        );

        // Too early for the trajectory: skip happens but nothing is consumed.
        let report = engine.tick(1000.0, &mut queue, &mut pointer, &mapper());
        assert_eq!(report.skipped, 2);
        assert!(report.committed.is_none());
        assert_eq!(engine.index(), 2);
        assert_eq!(queue.len(), 1);

        let report = engine.tick(1200.0, &mut queue, &mut pointer, &mapper());
        assert_eq!(report.committed.unwrap().event_index, 2);
        assert!(queue.is_empty());
        assert!(matches!(engine.current_action(), Some(Action::Trajectory(_))));

        let report = engine.tick(1300.0, &mut queue, &mut pointer, &mapper());
        assert_eq!(report.completed, Some(2));
        assert_eq!(engine.index(), 3);
    }

    #[test]
    fn mismatch_without_trajectory_drops_detection() {
        let events = vec![tap(1000.0), tap(1100.0)];
        let mut engine = ReconciliationEngine::new(events, matcher(), 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();
        let spinner = detection(TargetClass::Spinner, 50.0, 50.0, 900.0);
        confirm(&mut queue, spinner, &[900.0, 900.0, 900.0]);

        let report = engine.tick(1000.0, &mut queue, &mut pointer, &mapper());
        assert_eq!(report.dropped, Some(spinner));
        assert_eq!(engine.index(), 0);
        assert!(queue.is_empty());
        assert_eq!(queue.cooldowns().len(), 1);
        assert!(pointer.commands.is_empty());
    }

    #[test]
    fn skip_never_exceeds_lookahead_window() {
        let mut events: Vec<TimelineEvent> = (0..6).map(|i| tap(1000.0 + i as f64)).collect();
        events.push(trajectory(2000.0));
        let config = MatcherConfig {
            lookahead_window: 5,
            ..matcher()
        };
        let mut engine = ReconciliationEngine::new(events, config, 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();
        confirm(
            &mut queue,
            detection(TargetClass::Slider, 50.0, 50.0, 900.0),
            &[900.0, 900.0, 900.0],
        );

        let report = engine.tick(1000.0, &mut queue, &mut pointer, &mapper());
        assert_eq!(report.skipped, 0);
        assert_eq!(engine.index(), 0);
        assert!(report.dropped.is_some());
    }

    #[test]
    fn hold_starts_on_time_without_consuming() {
        let events = vec![hold(1000.0, 1200.0)];
        let mut engine = ReconciliationEngine::new(events, matcher(), 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();
        let circle = detection(TargetClass::Circle, 10.0, 10.0, 900.0);
        confirm(&mut queue, circle, &[900.0, 900.0, 900.0]);

        assert!(engine.tick(999.0, &mut queue, &mut pointer, &mapper()).committed.is_none());
        assert!(engine.tick(1000.0, &mut queue, &mut pointer, &mapper()).committed.is_some());
        assert_eq!(queue.len(), 1);

        engine.tick(1100.0, &mut queue, &mut pointer, &mapper());
        let report = engine.tick(1200.0, &mut queue, &mut pointer, &mapper());
        assert_eq!(report.completed, Some(0));
        assert!(report.finished);
        assert_eq!(pointer.commands.last(), Some(&PointerCommand::Up));
    }

    #[test]
    fn hold_starts_on_time_with_empty_queue() {
        let mut engine = ReconciliationEngine::new(vec![hold(1000.0, 1100.0)], matcher(), 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();

        let report = engine.tick(990.0, &mut queue, &mut pointer, &mapper());
        assert!(report.committed.is_none());
        assert!(pointer.commands.is_empty());

        let report = engine.tick(1000.0, &mut queue, &mut pointer, &mapper());
        let commit = report.committed.expect("hold should start without a detection");
        assert_eq!(commit.event_index, 0);
        assert!(commit.detection.is_none());
        assert!(matches!(engine.current_action(), Some(Action::Hold(_))));
        assert_eq!(pointer.count(PointerCommand::Down), 1);

        let report = engine.tick(1100.0, &mut queue, &mut pointer, &mapper());
        assert_eq!(report.completed, Some(0));
        assert!(report.finished);
    }

    #[test]
    fn trajectory_fires_on_time_without_detection() {
        let mut engine = ReconciliationEngine::new(vec![trajectory(500.0)], matcher(), 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();

        assert!(engine.tick(499.0, &mut queue, &mut pointer, &mapper()).committed.is_none());
        let report = engine.tick(550.0, &mut queue, &mut pointer, &mapper());
        assert!(report.committed.is_some());
        let position = pointer.last_position().unwrap();
        assert!(position.distance(Point::new(160.0, 0.0)) < 1e-6);
    }

    #[test]
    fn finished_engine_ignores_detections() {
        let mut engine = ReconciliationEngine::new(Vec::new(), matcher(), 0.0);
        let mut queue = queue();
        let mut pointer = RecordingPointer::new();
        confirm(&mut queue, detection(TargetClass::Circle, 1.0, 1.0, 0.0), &[0.0, 0.0, 0.0]);

        let report = engine.tick(10.0, &mut queue, &mut pointer, &mapper());
        assert!(report.finished);
        assert_eq!(queue.len(), 1);
    }
}
