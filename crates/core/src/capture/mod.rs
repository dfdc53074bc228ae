//! Hand-off points between the frame producer and the control loop.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{PilotError, Result};

/// Pixel dimensions of a captured frame.
pub trait FrameDims {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
}

impl<T> WaitOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::TimedOut => None,
        }
    }
}

/// A frame together with its publication sequence number.
#[derive(Debug)]
pub struct FrameSnapshot<F> {
    pub sequence: u64,
    pub frame: Arc<F>,
}

impl<F> Clone for FrameSnapshot<F> {
    fn clone(&self) -> Self {
        Self {
            sequence: self.sequence,
            frame: Arc::clone(&self.frame),
        }
    }
}

#[derive(Debug)]
struct SlotState<F> {
    sequence: u64,
    frame: Option<Arc<F>>,
}

/// Single-frame slot: the producer overwrites, the control loop reads the most
/// recent frame. Frames are skipped, never queued.
#[derive(Debug)]
pub struct FrameSlot<F> {
    shared: Arc<(Mutex<SlotState<F>>, Condvar)>,
}

impl<F> Clone for FrameSlot<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F> Default for FrameSlot<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> FrameSlot<F> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new((
                Mutex::new(SlotState {
                    sequence: 0,
                    frame: None,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Replaces the stored frame and wakes any waiter.
    pub fn publish(&self, frame: F) -> Result<u64> {
        let (_, condvar) = &*self.shared;
        let sequence = {
            let mut state = self.lock()?;
            state.sequence += 1;
            state.frame = Some(Arc::new(frame));
            state.sequence
        };
        condvar.notify_all();
        Ok(sequence)
    }

    pub fn latest(&self) -> Result<Option<FrameSnapshot<F>>> {
        let state = self.lock()?;
        Ok(snapshot(&state))
    }

    /// Waits until a frame newer than `after` is available.
    pub fn wait_for_frame(
        &self,
        after: Option<u64>,
        timeout: Duration,
    ) -> Result<WaitOutcome<FrameSnapshot<F>>> {
        let (_, condvar) = &*self.shared;
        let after = after.unwrap_or(0);
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;

        loop {
            if state.sequence > after {
                if let Some(found) = snapshot(&state) {
                    return Ok(WaitOutcome::Ready(found));
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(WaitOutcome::TimedOut);
            }
            state = condvar
                .wait_timeout(state, remaining)
                .map_err(|_| PilotError::msg("frame slot has been poisoned"))?
                .0;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SlotState<F>>> {
        self.shared
            .0
            .lock()
            .map_err(|_| PilotError::msg("frame slot has been poisoned"))
    }
}

fn snapshot<F>(state: &SlotState<F>) -> Option<FrameSnapshot<F>> {
    state.frame.as_ref().map(|frame| FrameSnapshot {
        sequence: state.sequence,
        frame: Arc::clone(frame),
    })
}

/// One-shot latch used to start a session from an external trigger.
#[derive(Debug, Clone, Default)]
pub struct StartSignal {
    shared: Arc<(Mutex<bool>, Condvar)>,
}

impl StartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) -> Result<()> {
        let (flag, condvar) = &*self.shared;
        *flag
            .lock()
            .map_err(|_| PilotError::msg("start signal has been poisoned"))? = true;
        condvar.notify_all();
        Ok(())
    }

    pub fn is_fired(&self) -> Result<bool> {
        let (flag, _) = &*self.shared;
        flag.lock()
            .map(|fired| *fired)
            .map_err(|_| PilotError::msg("start signal has been poisoned"))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<WaitOutcome<()>> {
        let (flag, condvar) = &*self.shared;
        let guard = flag
            .lock()
            .map_err(|_| PilotError::msg("start signal has been poisoned"))?;
        let (fired, _) = condvar
            .wait_timeout_while(guard, timeout, |fired| !*fired)
            .map_err(|_| PilotError::msg("start signal has been poisoned"))?;
        Ok(if *fired {
            WaitOutcome::Ready(())
        } else {
            WaitOutcome::TimedOut
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn latest_frame_wins() {
        let slot = FrameSlot::new();
        assert!(slot.latest().unwrap().is_none());
        slot.publish(1_u32).unwrap();
        slot.publish(2_u32).unwrap();

        let latest = slot.latest().unwrap().unwrap();
        assert_eq!(*latest.frame, 2);
        assert_eq!(latest.sequence, 2);
    }

    #[test]
    fn wait_times_out_without_new_frame() {
        let slot = FrameSlot::new();
        let seq = slot.publish("frame").unwrap();
        let outcome = slot
            .wait_for_frame(Some(seq), Duration::from_millis(10))
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::TimedOut));

        let outcome = slot.wait_for_frame(None, Duration::from_millis(10)).unwrap();
        assert_eq!(*outcome.ready().unwrap().frame, "frame");
    }

    #[test]
    fn wait_wakes_on_publish_from_producer() {
        let slot = FrameSlot::new();
        let producer = slot.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.publish(7_u8).unwrap();
        });

        let outcome = slot.wait_for_frame(None, Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(*outcome.ready().unwrap().frame, 7);
    }

    #[test]
    fn start_signal_latches() {
        let signal = StartSignal::new();
        assert_eq!(
            signal.wait_timeout(Duration::from_millis(5)).unwrap(),
            WaitOutcome::TimedOut
        );
        signal.fire().unwrap();
        assert!(signal.is_fired().unwrap());
        assert_eq!(
            signal.wait_timeout(Duration::from_millis(5)).unwrap(),
            WaitOutcome::Ready(())
        );
    }
}
