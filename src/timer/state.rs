use serde::{Deserialize, Serialize};

use crate::api::TimerStateResponse;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TimerPhase {
    #[default]
    NotStarted,
    Running,
    Expired,
}

/// Local view of the exam clock. `Expired` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CountdownState {
    pub phase: TimerPhase,
    pub has_started: bool,
    pub has_expired: bool,
    pub remaining_seconds: u64,
    pub total_duration_seconds: Option<u64>,
}

impl CountdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an authoritative backend reading. Returns `true` when this
    /// call moved the timer into `Expired`.
    pub fn apply_server_state(&mut self, server: &TimerStateResponse) -> bool {
        if self.has_expired {
            return false;
        }

        self.has_started = true;
        if server.total_duration_seconds.is_some() {
            self.total_duration_seconds = server.total_duration_seconds;
        }

        if server.has_expired || server.remaining_seconds == 0 {
            return self.mark_expired();
        }

        self.phase = TimerPhase::Running;
        self.remaining_seconds = server.remaining_seconds;
        false
    }

    /// One local second. Returns `true` only on the tick that reaches zero.
    pub fn tick(&mut self) -> bool {
        if self.phase != TimerPhase::Running {
            return false;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            return self.mark_expired();
        }
        false
    }

    /// Moves to `Expired`. Returns `false` if already expired.
    pub fn mark_expired(&mut self) -> bool {
        if self.has_expired {
            return false;
        }
        self.phase = TimerPhase::Expired;
        self.has_expired = true;
        self.remaining_seconds = 0;
        true
    }

    /// Fraction of the exam already used, when the total is known.
    pub fn progress(&self) -> Option<f64> {
        let total = self.total_duration_seconds.filter(|total| *total > 0)?;
        let used = total.saturating_sub(self.remaining_seconds);
        Some((used as f64 / total as f64).clamp(0.0, 1.0))
    }
}
