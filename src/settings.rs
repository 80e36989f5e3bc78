use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, sync::PoisonError, time::Duration};

use crate::detection::{
    audio::DEFAULT_NOISE_THRESHOLD_DB, brightness::DEFAULT_BLACK_THRESHOLD, FaceDetectorConfig,
    ObjectDetectorConfig,
};

/// Tunables for one proctoring session. Every field has a default so a
/// partial settings file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProctorSettings {
    pub face_interval_ms: u64,
    pub audio_interval_ms: u64,
    pub object_interval_ms: u64,
    pub noise_threshold_db: f32,
    pub black_screen_threshold: f32,
    pub throttle_window_ms: u64,
    pub alert_duration_ms: u64,
    pub detection_timeout_ms: u64,
    pub report_timeout_ms: u64,
    pub video_poll_ms: u64,
    pub face: FaceDetectorConfig,
    pub objects: ObjectDetectorConfig,
}

impl Default for ProctorSettings {
    fn default() -> Self {
        Self {
            face_interval_ms: 2000,
            audio_interval_ms: 1000,
            object_interval_ms: 3000,
            noise_threshold_db: DEFAULT_NOISE_THRESHOLD_DB,
            black_screen_threshold: DEFAULT_BLACK_THRESHOLD,
            throttle_window_ms: 5000,
            alert_duration_ms: 3000,
            detection_timeout_ms: 10_000,
            report_timeout_ms: 5000,
            video_poll_ms: 100,
            face: FaceDetectorConfig::default(),
            objects: ObjectDetectorConfig::default(),
        }
    }
}

impl ProctorSettings {
    pub fn face_interval(&self) -> Duration {
        Duration::from_millis(self.face_interval_ms.max(1))
    }

    pub fn audio_interval(&self) -> Duration {
        Duration::from_millis(self.audio_interval_ms.max(1))
    }

    pub fn object_interval(&self) -> Duration {
        Duration::from_millis(self.object_interval_ms.max(1))
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn alert_duration(&self) -> Duration {
        Duration::from_millis(self.alert_duration_ms)
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms.max(1))
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms.max(1))
    }

    pub fn video_poll(&self) -> Duration {
        Duration::from_millis(self.video_poll_ms.max(1))
    }
}

/// Debug mode (`PROCTOR_DEBUG=1`) turns on per-cycle logging in the binary.
pub fn debug_mode() -> bool {
    std::env::var("PROCTOR_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ProctorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid settings in {}", path.display()))?
        } else {
            ProctorSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> ProctorSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, settings: ProctorSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: ProctorSettings = serde_json::from_str(&contents)?;
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
        Ok(())
    }

    fn persist(&self, data: &ProctorSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = ProctorSettings::default();
        assert_eq!(settings.face_interval_ms, 2000);
        assert_eq!(settings.audio_interval_ms, 1000);
        assert_eq!(settings.object_interval_ms, 3000);
        assert_eq!(settings.noise_threshold_db, -25.0);
        assert_eq!(settings.black_screen_threshold, 20.0);
        assert_eq!(settings.face.match_threshold, 0.5);
        assert_eq!(settings.face.tiers[0].score_threshold, 0.3);
        assert_eq!(settings.objects.min_confidence, 0.5);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"faceIntervalMs": 500, "objects": {"disallowedClasses": ["cell phone"]}}"#)
            .unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.settings();
        assert_eq!(settings.face_interval_ms, 500);
        assert_eq!(settings.audio_interval_ms, 1000);
        assert_eq!(settings.objects.disallowed_classes, vec!["cell phone".to_string()]);
        assert_eq!(settings.objects.min_confidence, 0.5);
    }

    #[test]
    fn missing_file_uses_defaults_and_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.settings(), ProctorSettings::default());

        let mut changed = store.settings();
        changed.noise_threshold_db = -30.0;
        store.update(changed.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.settings(), changed);
        reopened.reload().unwrap();
        assert_eq!(reopened.settings().noise_threshold_db, -30.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(SettingsStore::new(path).is_err());
    }
}
