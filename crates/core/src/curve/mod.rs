//! Trajectory geometry: control-point curves flattened into an arc-length
//! table so that playback moves at constant speed along the path.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::{PilotError, Result};

/// Subdivisions per straight segment.
pub const LINEAR_SAMPLES_PER_SEGMENT: usize = 12;
/// Evaluations per curved path.
pub const CURVE_SAMPLES: usize = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn lerp(self, other: Point, t: f64) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveKind {
    Linear,
    Bezier,
    PerfectCircle,
    Catmull,
}

impl CurveKind {
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "L" => Ok(Self::Linear),
            "B" => Ok(Self::Bezier),
            "P" => Ok(Self::PerfectCircle),
            "C" => Ok(Self::Catmull),
            other => Err(PilotError::msg(format!("unknown curve type `{other}`"))),
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::Linear => 'L',
            Self::Bezier => 'B',
            Self::PerfectCircle => 'P',
            Self::Catmull => 'C',
        }
    }
}

/// Sampled path with cumulative distances, `distances[i]` being the arc length
/// from the first sample to `samples[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathTable {
    samples: Vec<Point>,
    distances: Vec<f64>,
}

impl PathTable {
    /// Flattens `points` (start position first) according to `kind`.
    pub fn build(kind: CurveKind, points: &[Point]) -> Self {
        if points.len() < 2 {
            return Self::from_samples(points.to_vec());
        }

        match kind {
            CurveKind::Linear | CurveKind::Catmull => {
                Self::polyline(points, LINEAR_SAMPLES_PER_SEGMENT)
            }
            CurveKind::Bezier => Self::bezier(points, CURVE_SAMPLES),
            CurveKind::PerfectCircle => match points {
                [a, b, c] => circular_arc(*a, *b, *c, CURVE_SAMPLES)
                    .map(Self::from_samples)
                    .unwrap_or_else(|| Self::bezier(points, CURVE_SAMPLES)),
                _ => Self::bezier(points, CURVE_SAMPLES),
            },
        }
    }

    /// Uniform subdivision of each straight segment.
    pub fn polyline(points: &[Point], per_segment: usize) -> Self {
        let per_segment = per_segment.max(1);
        let mut samples = Vec::with_capacity(points.len() * per_segment);
        if let Some(first) = points.first() {
            samples.push(*first);
        }
        for pair in points.windows(2) {
            for step in 1..=per_segment {
                samples.push(pair[0].lerp(pair[1], step as f64 / per_segment as f64));
            }
        }
        Self::from_samples(samples)
    }

    /// Dense Bezier evaluation. Repeated consecutive control points split the
    /// path into independent Bezier segments.
    pub fn bezier(points: &[Point], count: usize) -> Self {
        let count = count.max(2);
        let segments = bezier_segments(points);
        if segments.is_empty() {
            // Every point coincides; the path is a single position.
            return Self::from_samples(points.iter().take(1).copied().collect());
        }

        let mut samples: Vec<Point> = Vec::with_capacity(count * segments.len());
        for segment in segments {
            let start = if samples.is_empty() { 0 } else { 1 };
            for i in start..count {
                samples.push(de_casteljau(segment, i as f64 / (count - 1) as f64));
            }
        }

        Self::from_samples(samples)
    }

    fn from_samples(samples: Vec<Point>) -> Self {
        let mut distances = Vec::with_capacity(samples.len().max(1));
        distances.push(0.0);
        for pair in samples.windows(2) {
            let last = distances.last().copied().unwrap_or(0.0);
            distances.push(last + pair[0].distance(pair[1]));
        }
        Self { samples, distances }
    }

    pub fn samples(&self) -> &[Point] {
        &self.samples
    }

    pub fn length(&self) -> f64 {
        self.distances.last().copied().unwrap_or(0.0)
    }

    /// Position at arc-length fraction `fraction` in [0, 1].
    pub fn point_at(&self, fraction: f64) -> Point {
        let Some(first) = self.samples.first() else {
            return Point::default();
        };

        let target = self.length() * fraction.clamp(0.0, 1.0);
        let index = self.distances.partition_point(|d| *d < target);
        if index == 0 {
            return *first;
        }
        if index >= self.samples.len() {
            return self.samples[self.samples.len() - 1];
        }

        let (a, b) = (self.distances[index - 1], self.distances[index]);
        let frac = if b > a { (target - a) / (b - a) } else { 0.0 };
        self.samples[index - 1].lerp(self.samples[index], frac)
    }
}

/// Folds raw progress over `repeat_count` back-and-forth traversals.
pub fn slide_progress(raw_progress: f64, repeat_count: u32) -> f64 {
    let total = raw_progress.clamp(0.0, 1.0) * f64::from(repeat_count.max(1));
    let slide_index = total.floor();
    let slide_pos = total - slide_index;
    if (slide_index as u64) % 2 == 0 {
        slide_pos
    } else {
        1.0 - slide_pos
    }
}

fn bezier_segments(points: &[Point]) -> Vec<&[Point]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for i in 1..points.len() {
        if points[i] == points[i - 1] {
            if i - start >= 2 {
                segments.push(&points[start..i]);
            }
            start = i;
        }
    }
    if points.len() - start >= 2 {
        segments.push(&points[start..]);
    }
    segments
}

fn de_casteljau(points: &[Point], t: f64) -> Point {
    let mut work = points.to_vec();
    let n = work.len();
    for round in 1..n {
        for i in 0..n - round {
            work[i] = work[i].lerp(work[i + 1], t);
        }
    }
    work.first().copied().unwrap_or_default()
}

/// Arc from `a` through `b` to `c`, or `None` when the points are collinear.
fn circular_arc(a: Point, b: Point, c: Point, count: usize) -> Option<Vec<Point>> {
    let d = 2.0 * (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y));
    if d.abs() < 1e-9 {
        return None;
    }

    let (a2, b2, c2) = (
        a.x * a.x + a.y * a.y,
        b.x * b.x + b.y * b.y,
        c.x * c.x + c.y * c.y,
    );
    let center = Point::new(
        (a2 * (b.y - c.y) + b2 * (c.y - a.y) + c2 * (a.y - b.y)) / d,
        (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / d,
    );
    let radius = center.distance(a);

    let start = (a.y - center.y).atan2(a.x - center.x);
    let mut end = (c.y - center.y).atan2(c.x - center.x);
    let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
    if cross > 0.0 {
        while end < start {
            end += TAU;
        }
    } else {
        while end > start {
            end -= TAU;
        }
    }

    let count = count.max(2);
    Some(
        (0..count)
            .map(|i| {
                let angle = start + (end - start) * i as f64 / (count - 1) as f64;
                Point::new(
                    center.x + radius * angle.cos(),
                    center.y + radius * angle.sin(),
                )
            })
            .collect(),
    )
}
