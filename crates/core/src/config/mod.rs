use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{action::TrajectoryMode, detection::TargetClass, PilotError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub matcher: MatcherConfig,
    pub detector: DetectorConfig,
    pub screen: ScreenConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            PilotError::config(format!("cannot read config `{}`: {err}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let queue = &self.queue;
        if queue.distance_threshold.is_nan() || queue.distance_threshold < 0.0 {
            return Err(PilotError::config("queue.distance_threshold must be >= 0"));
        }
        if queue.cooldown_ms.is_nan() || queue.cooldown_ms < 0.0 {
            return Err(PilotError::config("queue.cooldown_ms must be >= 0"));
        }
        if queue.min_observation_count == 0 {
            return Err(PilotError::config(
                "queue.min_observation_count must be at least 1",
            ));
        }
        if queue.confirmation_cell_px.is_nan() || queue.confirmation_cell_px <= 0.0 {
            return Err(PilotError::config("queue.confirmation_cell_px must be > 0"));
        }
        if let Some(threshold) = queue.time_threshold_ms {
            if threshold.is_nan() || threshold < 0.0 {
                return Err(PilotError::config("queue.time_threshold_ms must be >= 0"));
            }
        }
        if let Some(ttl) = queue.confirmation_ttl_ms {
            if ttl.is_nan() || ttl <= 0.0 {
                return Err(PilotError::config("queue.confirmation_ttl_ms must be > 0"));
            }
        }
        if self.matcher.lookahead_window == 0 {
            return Err(PilotError::config("matcher.lookahead_window must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(PilotError::config(
                "detector.min_confidence must lie in [0, 1]",
            ));
        }
        if [self.screen.width, self.screen.height]
            .iter()
            .any(|side| side.is_nan() || *side <= 0.0)
        {
            return Err(PilotError::config("screen dimensions must be positive"));
        }
        Ok(())
    }
}

/// Policies of the detection queue. Distance dedup, time dedup and
/// confirmation counting can each be switched off independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub distance_threshold: f64,
    pub distance_dedup: bool,
    /// Same-class detections closer in time than this are duplicates.
    pub time_threshold_ms: Option<f64>,
    pub cooldown_ms: f64,
    /// 1 disables confirmation counting.
    pub min_observation_count: u32,
    pub confirmation_cell_px: f64,
    /// Partial counts not seen for this long are forgotten. `None` keeps them
    /// for the whole session.
    pub confirmation_ttl_ms: Option<f64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 25.0,
            distance_dedup: true,
            time_threshold_ms: None,
            cooldown_ms: 200.0,
            min_observation_count: 3,
            confirmation_cell_px: 1.0,
            confirmation_ttl_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub lookahead_window: usize,
    /// Subtracted from the timeline lead-in; bigger reacts earlier.
    pub lead_in_offset_ms: f64,
    pub trajectory_mode: TrajectoryMode,
    pub hold_radius: f64,
    pub hold_angular_step: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            lookahead_window: 5,
            lead_in_offset_ms: 200.0,
            trajectory_mode: TrajectoryMode::MoveOnly,
            hold_radius: 150.0,
            hold_angular_step: 0.35,
        }
    }
}

impl MatcherConfig {
    /// Minimum dwell time before a live detection may be matched.
    pub fn age_threshold_ms(&self, lead_in_ms: f64) -> f64 {
        (lead_in_ms - self.lead_in_offset_ms).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub allowed_classes: Vec<TargetClass>,
    pub min_confidence: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            allowed_classes: vec![TargetClass::Circle, TargetClass::Slider, TargetClass::Spinner],
            min_confidence: 0.8,
        }
    }
}

/// Screen rectangle the playfield is projected onto.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            width: 1920.0,
            height: 1080.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// The operator triggers the first event by hand; the clock starts at its
    /// time and matching begins with the second event.
    pub anchor_to_first_event: bool,
}
