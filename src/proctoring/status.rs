use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use super::Subsystem;
use crate::detection::{AudioLevel, BrightnessReading, DetectionResult, FaceStatus, SuspiciousObject};
use crate::violations::ViolationType;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum SubsystemState {
    /// Spawned, nothing to load; acquiring its input.
    Starting,
    LoadingModels,
    WaitingForVideo,
    Running,
    /// Disabled for this session; the reason is shown to the caller.
    Unavailable(String),
    Stopped,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceState {
    Loading,
    Loaded,
    /// No enrollment photo or no face in it; identity checks are off.
    Absent,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemStates {
    pub face: SubsystemState,
    pub brightness: SubsystemState,
    pub audio: SubsystemState,
    pub objects: SubsystemState,
}

impl SubsystemStates {
    pub fn get(&self, subsystem: Subsystem) -> &SubsystemState {
        match subsystem {
            Subsystem::Face => &self.face,
            Subsystem::Brightness => &self.brightness,
            Subsystem::Audio => &self.audio,
            Subsystem::Objects => &self.objects,
        }
    }

    pub fn set(&mut self, subsystem: Subsystem, state: SubsystemState) {
        let slot = match subsystem {
            Subsystem::Face => &mut self.face,
            Subsystem::Brightness => &mut self.brightness,
            Subsystem::Audio => &mut self.audio,
            Subsystem::Objects => &mut self.objects,
        };
        *slot = state;
    }
}

/// Single headline state for the camera overlay.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Indicator {
    Starting,
    Ok,
    NoFace,
    MultipleFaces,
    FaceMismatch,
    Unverified,
    CameraBlocked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: ViolationType,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    #[serde(skip)]
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctoringStatus {
    pub session_id: String,
    pub subsystems: SubsystemStates,
    pub reference: ReferenceState,
    pub face: Option<DetectionResult>,
    pub brightness: Option<BrightnessReading>,
    pub audio: Option<AudioLevel>,
    pub objects: Vec<SuspiciousObject>,
    pub indicator: Indicator,
    pub alerts: Vec<Alert>,
    pub updated_at: DateTime<Utc>,
}

impl ProctoringStatus {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            subsystems: SubsystemStates {
                face: SubsystemState::LoadingModels,
                brightness: SubsystemState::WaitingForVideo,
                audio: SubsystemState::Starting,
                objects: SubsystemState::LoadingModels,
            },
            reference: ReferenceState::Loading,
            face: None,
            brightness: None,
            audio: None,
            objects: Vec::new(),
            indicator: Indicator::Starting,
            alerts: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn prune_alerts(&mut self, now: Instant) {
        self.alerts.retain(|alert| alert.expires_at > now);
    }

    fn compute_indicator(&self) -> Indicator {
        if self.brightness.map(|b| b.is_black).unwrap_or(false) {
            return Indicator::CameraBlocked;
        }

        match self.face.as_ref().map(|face| face.status) {
            Some(FaceStatus::NoFace) => Indicator::NoFace,
            Some(FaceStatus::Multiple) => Indicator::MultipleFaces,
            Some(FaceStatus::Mismatch) => Indicator::FaceMismatch,
            Some(FaceStatus::Unverified) => Indicator::Unverified,
            Some(FaceStatus::Match) => Indicator::Ok,
            None if self.brightness.is_some() => Indicator::Ok,
            None => Indicator::Starting,
        }
    }
}

/// Latest aggregated status, shared by every loop and read by the UI.
#[derive(Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<ProctoringStatus>>,
    alert_duration: Duration,
}

impl StatusBoard {
    pub fn new(session_id: impl Into<String>, alert_duration: Duration) -> Self {
        let (tx, _) = watch::channel(ProctoringStatus::new(session_id));
        Self {
            tx: Arc::new(tx),
            alert_duration,
        }
    }

    pub fn update(&self, apply: impl FnOnce(&mut ProctoringStatus)) {
        self.tx.send_modify(|status| {
            apply(status);
            status.prune_alerts(Instant::now());
            status.indicator = status.compute_indicator();
            status.updated_at = Utc::now();
        });
    }

    pub fn set_state(&self, subsystem: Subsystem, state: SubsystemState) {
        self.update(|status| status.subsystems.set(subsystem, state));
    }

    pub fn push_alert(&self, kind: ViolationType) {
        let alert = Alert {
            kind,
            message: kind.message().to_string(),
            raised_at: Utc::now(),
            expires_at: Instant::now() + self.alert_duration,
        };
        self.update(|status| status.alerts.push(alert));
    }

    /// Drops alerts whose display time has passed.
    pub fn dismiss_expired(&self) {
        self.update(|_| {});
    }

    pub fn alert_duration(&self) -> Duration {
        self.alert_duration
    }

    pub fn snapshot(&self) -> ProctoringStatus {
        let mut status = self.tx.borrow().clone();
        status.prune_alerts(Instant::now());
        status
    }

    pub fn subscribe(&self) -> watch::Receiver<ProctoringStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(status: FaceStatus, count: usize) -> DetectionResult {
        DetectionResult {
            face_count: count,
            status,
            confidence: 0.9,
            distance: None,
            detection_scores: Vec::new(),
        }
    }

    #[test]
    fn initial_states_match_what_each_subsystem_waits_on() {
        let status = ProctoringStatus::new("s1");
        assert_eq!(status.subsystems.face, SubsystemState::LoadingModels);
        assert_eq!(status.subsystems.objects, SubsystemState::LoadingModels);
        assert_eq!(status.subsystems.brightness, SubsystemState::WaitingForVideo);
        assert_eq!(status.subsystems.audio, SubsystemState::Starting);
        assert_eq!(
            serde_json::to_value(&status.subsystems.audio).unwrap(),
            serde_json::json!({ "state": "starting" })
        );
    }

    #[test]
    fn blocked_camera_outranks_face_status() {
        let board = StatusBoard::new("s1", Duration::from_secs(3));
        board.update(|status| {
            status.face = Some(face(FaceStatus::Match, 1));
            status.brightness = Some(BrightnessReading {
                brightness: 2.0,
                is_black: true,
            });
        });
        assert_eq!(board.snapshot().indicator, Indicator::CameraBlocked);
    }

    #[test]
    fn indicator_follows_face_status() {
        let board = StatusBoard::new("s1", Duration::from_secs(3));
        assert_eq!(board.snapshot().indicator, Indicator::Starting);

        board.update(|status| status.face = Some(face(FaceStatus::Multiple, 2)));
        assert_eq!(board.snapshot().indicator, Indicator::MultipleFaces);

        board.update(|status| status.face = Some(face(FaceStatus::Unverified, 1)));
        assert_eq!(board.snapshot().indicator, Indicator::Unverified);
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_dismiss_themselves() {
        let board = StatusBoard::new("s1", Duration::from_secs(3));
        board.push_alert(ViolationType::NoFaceDetected);
        assert_eq!(board.snapshot().alerts.len(), 1);

        tokio::time::advance(Duration::from_millis(2_999)).await;
        assert_eq!(board.snapshot().alerts.len(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(board.snapshot().alerts.is_empty());
    }

    #[test]
    fn unavailable_state_serializes_reason() {
        let encoded =
            serde_json::to_value(SubsystemState::Unavailable("model failed".into())).unwrap();
        assert_eq!(encoded["state"], "unavailable");
        assert_eq!(encoded["reason"], "model failed");
    }
}
