use std::collections::{HashMap, VecDeque};

use crate::{config::QueueConfig, detection::Detection, detection::TargetClass};

/// Region suppressed after its detection was resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownEntry {
    pub class: TargetClass,
    pub x: f64,
    pub y: f64,
    pub expire_at_ms: f64,
}

/// Why a detection did or did not become live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Live,
    Pending { observations: u32 },
    Cooldown,
    Duplicate,
}

impl AddOutcome {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

type ConfirmationKey = (i64, i64, TargetClass);

#[derive(Debug, Clone, Copy)]
struct Confirmation {
    count: u32,
    last_seen_ms: f64,
}

/// Pending detections in arrival order.
///
/// Three policies gate entry and can be toggled independently through
/// [`QueueConfig`]: spatial dedup, temporal dedup (the two are OR-ed) and
/// confirmation counting. A detection is never live while its region is in
/// cooldown.
#[derive(Debug, Clone)]
pub struct DetectionQueue {
    config: QueueConfig,
    live: VecDeque<Detection>,
    cooldowns: Vec<CooldownEntry>,
    confirmations: HashMap<ConfirmationKey, Confirmation>,
}

impl DetectionQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            live: VecDeque::new(),
            cooldowns: Vec::new(),
            confirmations: HashMap::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns true only when `detection` becomes live on this call.
    pub fn add(&mut self, detection: Detection, now_ms: f64) -> bool {
        self.offer(detection, now_ms).is_live()
    }

    pub fn offer(&mut self, detection: Detection, now_ms: f64) -> AddOutcome {
        self.expire_cooldowns(now_ms);
        self.expire_confirmations(now_ms);

        if self.in_cooldown(&detection, now_ms) {
            tracing::trace!(x = detection.x, y = detection.y, class = %detection.class, "detection in cooldown");
            return AddOutcome::Cooldown;
        }

        if self.live.iter().any(|live| self.is_duplicate(live, &detection)) {
            return AddOutcome::Duplicate;
        }

        let key = self.confirmation_key(&detection);
        let observations = {
            let entry = self.confirmations.entry(key).or_insert(Confirmation {
                count: 0,
                last_seen_ms: now_ms,
            });
            entry.count += 1;
            entry.last_seen_ms = now_ms;
            entry.count
        };

        if observations < self.config.min_observation_count {
            return AddOutcome::Pending { observations };
        }

        self.confirmations.remove(&key);
        self.live.push_back(detection);
        tracing::debug!(
            x = detection.x,
            y = detection.y,
            class = %detection.class,
            size = self.live.len(),
            "detection live"
        );
        AddOutcome::Live
    }

    /// Live detections at least `age_threshold_ms` old, in queue order. Nothing
    /// is removed.
    pub fn pop_ready(&self, now_ms: f64, age_threshold_ms: f64) -> Vec<Detection> {
        self.live
            .iter()
            .filter(|detection| now_ms - detection.timestamp_ms >= age_threshold_ms)
            .copied()
            .collect()
    }

    /// Removes the first live detection of the same class within the distance
    /// threshold and puts its region into cooldown.
    pub fn remove(&mut self, detection: &Detection, now_ms: f64) -> bool {
        let threshold = self.config.distance_threshold;
        let Some(index) = self.live.iter().position(|live| {
            live.class == detection.class && live.distance_to(detection.x, detection.y) <= threshold
        }) else {
            return false;
        };

        let Some(removed) = self.live.remove(index) else {
            return false;
        };
        self.cooldowns.push(CooldownEntry {
            class: removed.class,
            x: removed.x,
            y: removed.y,
            expire_at_ms: now_ms + self.config.cooldown_ms,
        });
        tracing::debug!(
            x = removed.x,
            y = removed.y,
            class = %removed.class,
            size = self.live.len(),
            "detection removed"
        );
        true
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.live.iter()
    }

    pub fn cooldowns(&self) -> &[CooldownEntry] {
        &self.cooldowns
    }

    /// Partial confirmation count for the cell `detection` falls into.
    pub fn observations(&self, detection: &Detection) -> u32 {
        self.confirmations
            .get(&self.confirmation_key(detection))
            .map_or(0, |confirmation| confirmation.count)
    }

    /// Number of keys with a partial confirmation count.
    pub fn pending_keys(&self) -> usize {
        self.confirmations.len()
    }

    /// Moves every stored time by `delta_ms`, keeping ages and remaining
    /// cooldowns intact when the clock origin changes.
    pub fn shift_timestamps(&mut self, delta_ms: f64) {
        for detection in &mut self.live {
            detection.timestamp_ms += delta_ms;
        }
        for entry in &mut self.cooldowns {
            entry.expire_at_ms += delta_ms;
        }
        for confirmation in self.confirmations.values_mut() {
            confirmation.last_seen_ms += delta_ms;
        }
    }

    fn expire_cooldowns(&mut self, now_ms: f64) {
        self.cooldowns.retain(|entry| entry.expire_at_ms > now_ms);
    }

    fn expire_confirmations(&mut self, now_ms: f64) {
        if let Some(ttl) = self.config.confirmation_ttl_ms {
            self.confirmations
                .retain(|_, confirmation| now_ms - confirmation.last_seen_ms <= ttl);
        }
    }

    fn in_cooldown(&self, detection: &Detection, now_ms: f64) -> bool {
        let threshold = self.config.distance_threshold;
        self.cooldowns.iter().any(|entry| {
            entry.class == detection.class
                && entry.expire_at_ms > now_ms
                && detection.distance_to(entry.x, entry.y) <= threshold
        })
    }

    fn is_duplicate(&self, live: &Detection, candidate: &Detection) -> bool {
        if live.class != candidate.class {
            return false;
        }
        let near = self.config.distance_dedup
            && live.distance_to(candidate.x, candidate.y) <= self.config.distance_threshold;
        let recent = self
            .config
            .time_threshold_ms
            .is_some_and(|threshold| (candidate.timestamp_ms - live.timestamp_ms).abs() < threshold);
        near || recent
    }

    fn confirmation_key(&self, detection: &Detection) -> ConfirmationKey {
        let cell = self.config.confirmation_cell_px;
        (
            (detection.x / cell).round() as i64,
            (detection.y / cell).round() as i64,
            detection.class,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_observation_count: u32, distance_threshold: f64) -> QueueConfig {
        QueueConfig {
            distance_threshold,
            min_observation_count,
            cooldown_ms: 200.0,
            ..QueueConfig::default()
        }
    }

    fn circle(x: f64, y: f64, timestamp_ms: f64) -> Detection {
        Detection {
            class: TargetClass::Circle,
            x,
            y,
            confidence: 0.9,
            source_width: 640.0,
            source_height: 480.0,
            timestamp_ms,
        }
    }

    #[test]
    fn becomes_live_exactly_on_the_nth_observation() {
        let mut queue = DetectionQueue::new(config(3, 25.0));
        assert!(!queue.add(circle(100.0, 100.0, 900.0), 900.0));
        assert!(!queue.add(circle(100.0, 100.0, 910.0), 910.0));
        assert_eq!(queue.observations(&circle(100.0, 100.0, 0.0)), 2);
        assert!(queue.add(circle(100.0, 100.0, 920.0), 920.0));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.observations(&circle(100.0, 100.0, 0.0)), 0);
    }

    #[test]
    fn never_holds_two_nearby_detections_of_one_class() {
        let mut queue = DetectionQueue::new(config(1, 25.0));
        for i in 0..20 {
            let jitter = (i % 5) as f64;
            queue.add(circle(100.0 + jitter, 100.0 - jitter, i as f64), i as f64);
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn distance_threshold_is_inclusive() {
        let mut queue = DetectionQueue::new(config(1, 25.0));
        assert!(queue.add(circle(10.0, 10.0, 0.0), 0.0));
        assert!(queue.add(circle(40.0, 40.0, 0.0), 0.0));
        assert_eq!(queue.len(), 2);

        let mut queue = DetectionQueue::new(config(1, 50.0));
        assert!(queue.add(circle(10.0, 10.0, 0.0), 0.0));
        assert_eq!(queue.offer(circle(40.0, 40.0, 0.0), 0.0), AddOutcome::Duplicate);

        let mut queue = DetectionQueue::new(config(1, 25.0));
        assert!(queue.add(circle(0.0, 0.0, 0.0), 0.0));
        assert!(!queue.add(circle(15.0, 20.0, 0.0), 0.0));
    }

    #[test]
    fn other_classes_are_not_duplicates() {
        let mut queue = DetectionQueue::new(config(1, 25.0));
        assert!(queue.add(circle(10.0, 10.0, 0.0), 0.0));
        let mut slider = circle(10.0, 10.0, 0.0);
        slider.class = TargetClass::Slider;
        assert!(queue.add(slider, 0.0));
    }

    #[test]
    fn time_dedup_is_ored_with_distance() {
        let mut queue = DetectionQueue::new(QueueConfig {
            distance_dedup: false,
            time_threshold_ms: Some(50.0),
            min_observation_count: 1,
            ..QueueConfig::default()
        });
        assert!(queue.add(circle(0.0, 0.0, 0.0), 0.0));
        assert_eq!(queue.offer(circle(300.0, 300.0, 30.0), 30.0), AddOutcome::Duplicate);
        assert!(queue.add(circle(300.0, 300.0, 100.0), 100.0));
        // Distance dedup is off, so a nearby but later detection is distinct.
        assert!(queue.add(circle(1.0, 1.0, 200.0), 200.0));
    }

    #[test]
    fn cooldown_suppresses_then_requires_reconfirmation() {
        let mut queue = DetectionQueue::new(config(3, 25.0));
        for t in [900.0, 910.0, 920.0] {
            queue.add(circle(100.0, 100.0, t), t);
        }
        assert!(queue.remove(&circle(102.0, 98.0, 1000.0), 1000.0));
        assert!(queue.is_empty());
        assert_eq!(queue.cooldowns().len(), 1);

        assert_eq!(queue.offer(circle(100.0, 100.0, 1100.0), 1100.0), AddOutcome::Cooldown);
        assert_eq!(queue.observations(&circle(100.0, 100.0, 0.0)), 0);

        assert_eq!(
            queue.offer(circle(100.0, 100.0, 1200.0), 1200.0),
            AddOutcome::Pending { observations: 1 }
        );
        assert!(queue.cooldowns().is_empty());
        assert!(!queue.add(circle(100.0, 100.0, 1210.0), 1210.0));
        assert!(queue.add(circle(100.0, 100.0, 1220.0), 1220.0));
    }

    #[test]
    fn idle_partial_counts_expire_when_configured() {
        let mut queue = DetectionQueue::new(QueueConfig {
            confirmation_ttl_ms: Some(100.0),
            ..config(3, 25.0)
        });
        for (i, t) in [0.0, 10.0, 20.0].into_iter().enumerate() {
            queue.add(circle(10.0 + 50.0 * i as f64, 10.0, t), t);
        }
        assert_eq!(queue.pending_keys(), 3);

        // First two keys idle past the limit; only the fresh one survives.
        assert!(!queue.add(circle(300.0, 300.0, 115.0), 115.0));
        assert_eq!(queue.pending_keys(), 2);
        assert_eq!(queue.observations(&circle(10.0, 10.0, 0.0)), 0);
        assert_eq!(queue.observations(&circle(110.0, 10.0, 0.0)), 1);
    }

    #[test]
    fn partial_counts_persist_without_ttl() {
        let mut queue = DetectionQueue::new(config(3, 25.0));
        queue.add(circle(10.0, 10.0, 0.0), 0.0);
        queue.add(circle(300.0, 300.0, 60_000.0), 60_000.0);
        assert_eq!(queue.observations(&circle(10.0, 10.0, 0.0)), 1);
    }

    #[test]
    fn shifting_keeps_ages_and_cooldowns() {
        let mut queue = DetectionQueue::new(config(1, 25.0));
        queue.add(circle(0.0, 0.0, 3000.0), 3000.0);
        queue.add(circle(200.0, 0.0, 3000.0), 3000.0);
        assert!(queue.remove(&circle(200.0, 0.0, 3000.0), 3000.0));

        queue.shift_timestamps(-3000.0);
        assert_eq!(queue.pop_ready(450.0, 450.0).len(), 1);
        assert_eq!(queue.cooldowns()[0].expire_at_ms, 200.0);
        assert_eq!(queue.offer(circle(200.0, 0.0, 100.0), 100.0), AddOutcome::Cooldown);
    }

    #[test]
    fn remove_without_match_returns_false() {
        let mut queue = DetectionQueue::new(config(1, 25.0));
        queue.add(circle(0.0, 0.0, 0.0), 0.0);
        assert!(!queue.remove(&circle(200.0, 200.0, 0.0), 10.0));
        assert!(queue.cooldowns().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn readiness_only_grows_with_time() {
        let mut queue = DetectionQueue::new(config(1, 25.0));
        queue.add(circle(0.0, 0.0, 100.0), 100.0);
        queue.add(circle(100.0, 0.0, 150.0), 150.0);
        queue.add(circle(200.0, 0.0, 200.0), 200.0);

        assert!(queue.pop_ready(150.0, 100.0).is_empty());
        assert_eq!(queue.pop_ready(200.0, 100.0).len(), 1);
        let ready = queue.pop_ready(250.0, 100.0);
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].x, 0.0);
        assert_eq!(ready[1].x, 100.0);
        assert_eq!(queue.pop_ready(1000.0, 100.0).len(), 3);
        assert_eq!(queue.len(), 3);
    }
}
