//! In-progress execution of matched timeline events.

use serde::{Deserialize, Serialize};

use crate::{
    config::MatcherConfig,
    curve::{slide_progress, PathTable, Point},
    detection::CoordinateMapper,
    timeline::{HoldEvent, TrajectoryEvent},
};

/// Pointer injection backend. Calls are assumed infallible.
pub trait PointerDriver {
    fn move_to(&mut self, position: Point);
    fn pointer_down(&mut self);
    fn pointer_up(&mut self);
}

/// Whether the pointer is held down while a trajectory plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryMode {
    #[default]
    MoveOnly,
    ClickThrough,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerCommand {
    MoveTo(Point),
    Down,
    Up,
}

/// Driver that keeps every command, for replays and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingPointer {
    pub commands: Vec<PointerCommand>,
}

impl RecordingPointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_position(&self) -> Option<Point> {
        self.commands.iter().rev().find_map(|command| match command {
            PointerCommand::MoveTo(position) => Some(*position),
            _ => None,
        })
    }

    pub fn count(&self, wanted: PointerCommand) -> usize {
        self.commands.iter().filter(|command| **command == wanted).count()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl PointerDriver for RecordingPointer {
    fn move_to(&mut self, position: Point) {
        self.commands.push(PointerCommand::MoveTo(position));
    }

    fn pointer_down(&mut self) {
        self.commands.push(PointerCommand::Down);
    }

    fn pointer_up(&mut self) {
        self.commands.push(PointerCommand::Up);
    }
}

#[derive(Debug, Clone)]
pub struct TapAction {
    event_index: usize,
    target: Point,
    done: bool,
}

impl TapAction {
    pub fn new(event_index: usize, target: Point) -> Self {
        Self {
            event_index,
            target,
            done: false,
        }
    }

    pub fn target(&self) -> Point {
        self.target
    }

    pub fn update<P: PointerDriver + ?Sized>(&mut self, pointer: &mut P) {
        if self.done {
            return;
        }
        pointer.move_to(self.target);
        pointer.pointer_down();
        pointer.pointer_up();
        self.done = true;
    }
}

#[derive(Debug, Clone)]
pub struct TrajectoryAction {
    event_index: usize,
    start_ms: f64,
    end_ms: f64,
    repeat_count: u32,
    /// Sampled in screen space.
    table: PathTable,
    mode: TrajectoryMode,
    pressed: bool,
    done: bool,
}

impl TrajectoryAction {
    pub fn new<M: CoordinateMapper + ?Sized>(
        event_index: usize,
        event: &TrajectoryEvent,
        mapper: &M,
        mode: TrajectoryMode,
    ) -> Self {
        let screen_points: Vec<Point> = event
            .path_points()
            .into_iter()
            .map(|point| mapper.map_playfield(point))
            .collect();

        Self {
            event_index,
            start_ms: event.time,
            end_ms: event.end_time(),
            repeat_count: event.repeat_count,
            table: PathTable::build(event.curve_kind, &screen_points),
            mode,
            pressed: false,
            done: false,
        }
    }

    /// Raw progress in [0, 1]; zero-length trajectories complete at once.
    pub fn progress(&self, now_ms: f64) -> f64 {
        let span = self.end_ms - self.start_ms;
        if span <= 0.0 {
            return 1.0;
        }
        ((now_ms - self.start_ms) / span).clamp(0.0, 1.0)
    }

    pub fn position_at(&self, now_ms: f64) -> Point {
        let progress = slide_progress(self.progress(now_ms), self.repeat_count);
        self.table.point_at(progress)
    }

    pub fn update<P: PointerDriver + ?Sized>(&mut self, now_ms: f64, pointer: &mut P) {
        if self.done {
            return;
        }

        pointer.move_to(self.position_at(now_ms));
        if self.mode == TrajectoryMode::ClickThrough && !self.pressed {
            pointer.pointer_down();
            self.pressed = true;
        }

        if self.progress(now_ms) >= 1.0 {
            if self.pressed {
                pointer.pointer_up();
                self.pressed = false;
            }
            self.done = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HoldAction {
    event_index: usize,
    center: Point,
    end_ms: f64,
    radius: f64,
    angular_step: f64,
    angle: f64,
    pressed: bool,
    done: bool,
}

impl HoldAction {
    pub fn new<M: CoordinateMapper + ?Sized>(
        event_index: usize,
        event: &HoldEvent,
        mapper: &M,
        config: &MatcherConfig,
    ) -> Self {
        Self {
            event_index,
            center: mapper.map_playfield(event.position),
            end_ms: event.end_time,
            radius: config.hold_radius,
            angular_step: config.hold_angular_step,
            angle: 0.0,
            pressed: false,
            done: false,
        }
    }

    pub fn update<P: PointerDriver + ?Sized>(&mut self, now_ms: f64, pointer: &mut P) {
        if self.done {
            return;
        }

        if now_ms >= self.end_ms {
            if self.pressed {
                pointer.pointer_up();
                self.pressed = false;
            }
            self.done = true;
            return;
        }

        pointer.move_to(Point::new(
            self.center.x + self.radius * self.angle.cos(),
            self.center.y + self.radius * self.angle.sin(),
        ));
        if !self.pressed {
            pointer.pointer_down();
            self.pressed = true;
        }
        self.angle += self.angular_step;
    }
}

/// The single in-progress action of a session.
#[derive(Debug, Clone)]
pub enum Action {
    Tap(TapAction),
    Trajectory(TrajectoryAction),
    Hold(HoldAction),
}

impl Action {
    pub fn update<P: PointerDriver + ?Sized>(&mut self, now_ms: f64, pointer: &mut P) {
        match self {
            Self::Tap(action) => action.update(pointer),
            Self::Trajectory(action) => action.update(now_ms, pointer),
            Self::Hold(action) => action.update(now_ms, pointer),
        }
    }

    pub fn is_done(&self) -> bool {
        match self {
            Self::Tap(action) => action.done,
            Self::Trajectory(action) => action.done,
            Self::Hold(action) => action.done,
        }
    }

    /// Index of the timeline event this action executes.
    pub fn event_index(&self) -> usize {
        match self {
            Self::Tap(action) => action.event_index,
            Self::Trajectory(action) => action.event_index,
            Self::Hold(action) => action.event_index,
        }
    }
}
