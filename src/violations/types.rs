use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categories understood by the reporting backend. The serialized names are
/// part of the backend contract and must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    NoFaceDetected,
    MultipleFaces,
    FaceMismatch,
    AudioNoiseDetected,
    ScreenBlackDetected,
    UnwantedObjectDetected,
}

impl ViolationType {
    pub const ALL: [ViolationType; 6] = [
        ViolationType::NoFaceDetected,
        ViolationType::MultipleFaces,
        ViolationType::FaceMismatch,
        ViolationType::AudioNoiseDetected,
        ViolationType::ScreenBlackDetected,
        ViolationType::UnwantedObjectDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::NoFaceDetected => "NO_FACE_DETECTED",
            ViolationType::MultipleFaces => "MULTIPLE_FACES",
            ViolationType::FaceMismatch => "FACE_MISMATCH",
            ViolationType::AudioNoiseDetected => "AUDIO_NOISE_DETECTED",
            ViolationType::ScreenBlackDetected => "SCREEN_BLACK_DETECTED",
            ViolationType::UnwantedObjectDetected => "UNWANTED_OBJECT_DETECTED",
        }
    }

    /// Short message shown in the transient notification.
    pub fn message(&self) -> &'static str {
        match self {
            ViolationType::NoFaceDetected => "No face detected",
            ViolationType::MultipleFaces => "Multiple faces detected",
            ViolationType::FaceMismatch => "Face does not match the registered photo",
            ViolationType::AudioNoiseDetected => "Background noise detected",
            ViolationType::ScreenBlackDetected => "Camera appears to be blocked",
            ViolationType::UnwantedObjectDetected => "Unauthorized object detected",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViolationEvent {
    #[serde(rename = "type")]
    pub kind: ViolationType,
    pub metadata: Value,
    #[serde(with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ViolationEvent {
    pub fn new(kind: ViolationType, metadata: Value) -> Self {
        Self::at(kind, metadata, Utc::now())
    }

    pub fn at(kind: ViolationType, metadata: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            metadata,
            timestamp,
        }
    }

    pub fn timestamp_iso(&self) -> String {
        iso_timestamp::format(&self.timestamp)
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix, e.g. `2026-10-16T09:30:00.125Z`.
mod iso_timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn wire_names_match_backend_contract() {
        for kind in ViolationType::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn timestamp_parses_back_to_same_instant() {
        let ts = Utc.timestamp_millis_opt(1_760_000_000_123).unwrap();
        let event = ViolationEvent::at(
            ViolationType::ScreenBlackDetected,
            json!({ "brightness": 4.2 }),
            ts,
        );

        let iso = event.timestamp_iso();
        let parsed = DateTime::parse_from_rfc3339(&iso).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), ts);
    }

    #[test]
    fn event_serializes_with_type_key() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let event = ViolationEvent::at(ViolationType::MultipleFaces, json!({ "faceCount": 2 }), ts);

        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "MULTIPLE_FACES");
        assert_eq!(encoded["metadata"]["faceCount"], 2);
        assert_eq!(encoded["timestamp"], "2026-01-02T03:04:05.000Z");

        let decoded: ViolationEvent = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, event);
    }
}
