use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::ViolationType;

pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(5000);

/// Per-type rate limiter guarding the reporting backend.
///
/// Each session owns its own tracker; nothing here is process-global. The
/// check-and-stamp in [`ViolationTracker::should_report_at`] happens under one
/// lock, so two racing callers for the same type cannot both pass.
#[derive(Debug)]
pub struct ViolationTracker {
    window_ms: u64,
    epoch: Instant,
    last_accepted: Mutex<HashMap<ViolationType, u64>>,
}

impl Default for ViolationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_WINDOW)
    }
}

impl ViolationTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            epoch: Instant::now(),
            last_accepted: Mutex::new(HashMap::with_capacity(ViolationType::ALL.len())),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Milliseconds since the tracker was created.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn should_report(&self, kind: ViolationType) -> bool {
        self.should_report_at(kind, self.now_ms())
    }

    /// Accepts `kind` at `now_ms` unless a report of the same type was accepted
    /// less than one window earlier. Acceptance stamps `now_ms`.
    pub fn should_report_at(&self, kind: ViolationType, now_ms: u64) -> bool {
        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match last.get(&kind) {
            Some(&previous) if now_ms.saturating_sub(previous) < self.window_ms => false,
            _ => {
                last.insert(kind, now_ms);
                true
            }
        }
    }

    pub fn reset(&self) {
        self.last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
