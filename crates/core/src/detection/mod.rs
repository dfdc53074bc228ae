//! Boundary with the external object detector and the coordinate mapping.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{config::DetectorConfig, config::ScreenConfig, curve::Point, PilotError, Result};

pub const PLAYFIELD_WIDTH: f64 = 512.0;
pub const PLAYFIELD_HEIGHT: f64 = 384.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    Circle,
    Slider,
    Spinner,
}

impl TargetClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Circle => "circle",
            Self::Slider => "slider",
            Self::Spinner => "spinner",
        }
    }
}

impl FromStr for TargetClass {
    type Err = PilotError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "circle" => Ok(Self::Circle),
            "slider" => Ok(Self::Slider),
            "spinner" => Ok(Self::Spinner),
            other => Err(PilotError::msg(format!("unknown target class `{other}`"))),
        }
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw detector output for one object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Confirmed-class observation in detector frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: TargetClass,
    pub x: f64,
    pub y: f64,
    pub confidence: f32,
    pub source_width: f64,
    pub source_height: f64,
    pub timestamp_ms: f64,
}

impl Detection {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// The object detector: frame in, predictions out.
pub trait Detector<F> {
    fn infer(&mut self, frame: &F) -> Result<Vec<Prediction>>;
}

/// Affine projection from detector frames and the playfield onto the screen.
pub trait CoordinateMapper {
    fn map_detection(&self, x: f64, y: f64, source_width: f64, source_height: f64) -> Point;

    fn map_playfield(&self, position: Point) -> Point;
}

/// Drops predictions outside the allowed class set or below the confidence
/// floor.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    allowed: Vec<TargetClass>,
    min_confidence: f32,
}

impl DetectionFilter {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            allowed: config.allowed_classes.clone(),
            min_confidence: config.min_confidence,
        }
    }

    pub fn admit(
        &self,
        prediction: &Prediction,
        source_width: f64,
        source_height: f64,
        timestamp_ms: f64,
    ) -> Option<Detection> {
        if prediction.confidence < self.min_confidence {
            return None;
        }
        let class = prediction.class.parse::<TargetClass>().ok()?;
        if !self.allowed.contains(&class) {
            return None;
        }

        Some(Detection {
            class,
            x: prediction.x,
            y: prediction.y,
            confidence: prediction.confidence,
            source_width,
            source_height,
            timestamp_ms,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AffineMapper {
    origin: Point,
    width: f64,
    height: f64,
}

impl AffineMapper {
    pub fn new(screen: &ScreenConfig) -> Self {
        Self {
            origin: Point::new(screen.origin_x, screen.origin_y),
            width: screen.width,
            height: screen.height,
        }
    }

    fn scale(&self, x: f64, y: f64, from_width: f64, from_height: f64) -> Point {
        let fx = if from_width > 0.0 { x / from_width } else { 0.0 };
        let fy = if from_height > 0.0 { y / from_height } else { 0.0 };
        Point::new(self.origin.x + fx * self.width, self.origin.y + fy * self.height)
    }
}

impl CoordinateMapper for AffineMapper {
    fn map_detection(&self, x: f64, y: f64, source_width: f64, source_height: f64) -> Point {
        self.scale(x, y, source_width, source_height)
    }

    fn map_playfield(&self, position: Point) -> Point {
        self.scale(position.x, position.y, PLAYFIELD_WIDTH, PLAYFIELD_HEIGHT)
    }
}
