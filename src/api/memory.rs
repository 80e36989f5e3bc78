use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ApiError, ExamSessionApi, ProctoringApi, TimerStateResponse};
use crate::violations::ViolationEvent;

/// In-process backend: fixed exam duration, session start times kept in
/// memory, reported violations recorded for inspection.
pub struct InMemoryExamApi {
    duration_secs: u64,
    sessions: Mutex<HashMap<String, Instant>>,
    reported: Mutex<Vec<ViolationEvent>>,
    fail_reports: AtomicBool,
}

impl InMemoryExamApi {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration_secs,
            sessions: Mutex::new(HashMap::new()),
            reported: Mutex::new(Vec::new()),
            fail_reports: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent `report_violation` fail with a transport error.
    pub fn set_fail_reports(&self, fail: bool) {
        self.fail_reports.store(fail, Ordering::SeqCst);
    }

    pub fn reported(&self) -> Vec<ViolationEvent> {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ExamSessionApi for InMemoryExamApi {
    async fn start_session(&self, session_id: &str) -> Result<(), ApiError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(session_id) {
            return Err(ApiError::Conflict(format!(
                "session {session_id} already active"
            )));
        }
        sessions.insert(session_id.to_string(), Instant::now());
        Ok(())
    }

    async fn get_timer_state(&self, session_id: &str) -> Result<TimerStateResponse, ApiError> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let started = sessions.get(session_id).ok_or_else(|| ApiError::Status {
            code: 404,
            message: format!("session {session_id} not started"),
        })?;

        let remaining = self
            .duration_secs
            .saturating_sub(started.elapsed().as_secs());
        Ok(TimerStateResponse {
            has_expired: remaining == 0,
            remaining_seconds: remaining,
            total_duration_seconds: Some(self.duration_secs),
        })
    }
}

#[async_trait]
impl ProctoringApi for InMemoryExamApi {
    async fn report_violation(&self, event: &ViolationEvent) -> Result<(), ApiError> {
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("backend unreachable".into()));
        }
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_conflict() {
        let api = InMemoryExamApi::new(60);
        api.start_session("s1").await.unwrap();

        let err = api.start_session("s1").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_time_counts_down() {
        let api = InMemoryExamApi::new(10);
        api.start_session("s1").await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        let state = api.get_timer_state("s1").await.unwrap();
        assert_eq!(state.remaining_seconds, 6);
        assert!(!state.has_expired);

        tokio::time::advance(Duration::from_secs(7)).await;
        let state = api.get_timer_state("s1").await.unwrap();
        assert_eq!(state.remaining_seconds, 0);
        assert!(state.has_expired);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let api = InMemoryExamApi::new(10);
        let err = api.get_timer_state("missing").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { code: 404, .. }));
    }
}
