//! Seams to the remote exam backend. The backend itself lives elsewhere; the
//! pipeline only needs these calls.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::violations::ViolationEvent;

pub use memory::InMemoryExamApi;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 409; for session start this means "already active".
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict(_)) || matches!(self, ApiError::Status { code: 409, .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStateResponse {
    pub has_expired: bool,
    pub remaining_seconds: u64,
    pub total_duration_seconds: Option<u64>,
}

#[async_trait]
pub trait ProctoringApi: Send + Sync {
    async fn report_violation(&self, event: &ViolationEvent) -> Result<(), ApiError>;
}

#[async_trait]
pub trait ExamSessionApi: Send + Sync {
    /// Registers the contestant's start time. Calling it again for an active
    /// session yields [`ApiError::Conflict`].
    async fn start_session(&self, session_id: &str) -> Result<(), ApiError>;

    async fn get_timer_state(&self, session_id: &str) -> Result<TimerStateResponse, ApiError>;
}

/// Reporter that only writes accepted violations to the log. Used when no
/// backend is configured.
#[derive(Debug, Default, Clone)]
pub struct LogReporter;

#[async_trait]
impl ProctoringApi for LogReporter {
    async fn report_violation(&self, event: &ViolationEvent) -> Result<(), ApiError> {
        let payload =
            serde_json::to_string(event).map_err(|err| ApiError::Transport(err.to_string()))?;
        log::info!("violation reported: {}", payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_response_uses_camel_case() {
        let raw = r#"{"hasExpired":false,"remainingSeconds":120,"totalDurationSeconds":3600}"#;
        let parsed: TimerStateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed,
            TimerStateResponse {
                has_expired: false,
                remaining_seconds: 120,
                total_duration_seconds: Some(3600),
            }
        );
    }

    #[test]
    fn status_409_counts_as_conflict() {
        assert!(ApiError::Conflict("already active".into()).is_conflict());
        assert!(ApiError::Status {
            code: 409,
            message: "Session already active".into()
        }
        .is_conflict());
        assert!(!ApiError::Timeout.is_conflict());
    }
}
