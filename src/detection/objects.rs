use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_DISALLOWED_CLASSES: [&str; 6] =
    ["phone", "laptop", "book", "tablet", "tv", "monitor"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub class: String,
    pub score: f32,
    /// `[x, y, width, height]` in frame pixels.
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousObject {
    pub class: String,
    pub confidence: f32,
}

#[async_trait]
pub trait ObjectModel: Send + Sync {
    async fn detect(&self, frame: &RgbImage) -> Result<Vec<ObjectDetection>>;
}

#[async_trait]
pub trait ObjectModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn ObjectModel>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectDetectorConfig {
    pub disallowed_classes: Vec<String>,
    pub min_confidence: f32,
}

impl Default for ObjectDetectorConfig {
    fn default() -> Self {
        Self {
            disallowed_classes: DEFAULT_DISALLOWED_CLASSES
                .iter()
                .map(|class| class.to_string())
                .collect(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

pub struct ObjectDetector {
    model: Arc<dyn ObjectModel>,
    config: ObjectDetectorConfig,
}

impl ObjectDetector {
    pub fn new(model: Arc<dyn ObjectModel>, config: ObjectDetectorConfig) -> Self {
        Self { model, config }
    }

    pub async fn detect(&self, frame: &RgbImage) -> Result<Vec<SuspiciousObject>> {
        let detections = self.model.detect(frame).await?;
        Ok(filter_suspicious(&detections, &self.config))
    }
}

/// A detection is suspicious when its label contains one of the configured
/// class names (case-insensitive), so "phone" also covers "cell phone".
pub fn filter_suspicious(
    detections: &[ObjectDetection],
    config: &ObjectDetectorConfig,
) -> Vec<SuspiciousObject> {
    let classes: Vec<String> = config
        .disallowed_classes
        .iter()
        .map(|class| class.to_lowercase())
        .collect();

    detections
        .iter()
        .filter(|d| d.score >= config.min_confidence)
        .filter(|d| {
            let label = d.class.to_lowercase();
            classes.iter().any(|class| label.contains(class.as_str()))
        })
        .map(|d| SuspiciousObject {
            class: d.class.clone(),
            confidence: d.score,
        })
        .collect()
}

/// Violation metadata for one cycle: every matched object in a single list.
pub fn objects_metadata(objects: &[SuspiciousObject]) -> Value {
    json!({ "objects": objects })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class: &str, score: f32) -> ObjectDetection {
        ObjectDetection {
            class: class.to_string(),
            score,
            bbox: [0.0, 0.0, 10.0, 10.0],
        }
    }

    #[test]
    fn only_configured_classes_are_reported() {
        let config = ObjectDetectorConfig {
            disallowed_classes: vec!["cell phone".into()],
            min_confidence: 0.5,
        };
        let found = filter_suspicious(
            &[detection("cell phone", 0.6), detection("book", 0.9)],
            &config,
        );

        assert_eq!(
            found,
            vec![SuspiciousObject {
                class: "cell phone".into(),
                confidence: 0.6
            }]
        );
    }

    #[test]
    fn low_confidence_detections_are_ignored() {
        let found = filter_suspicious(
            &[detection("laptop", 0.49), detection("book", 0.5)],
            &ObjectDetectorConfig::default(),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].class, "book");
    }

    #[test]
    fn default_classes_cover_coco_phone_label() {
        let found = filter_suspicious(
            &[detection("Cell Phone", 0.8), detection("person", 0.99)],
            &ObjectDetectorConfig::default(),
        );
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn metadata_lists_all_objects() {
        let metadata = objects_metadata(&[
            SuspiciousObject {
                class: "book".into(),
                confidence: 0.7,
            },
            SuspiciousObject {
                class: "laptop".into(),
                confidence: 0.9,
            },
        ]);
        assert_eq!(metadata["objects"].as_array().unwrap().len(), 2);
        assert_eq!(metadata["objects"][1]["class"], "laptop");
    }

    struct FixedModel(Vec<ObjectDetection>);

    #[async_trait]
    impl ObjectModel for FixedModel {
        async fn detect(&self, _frame: &RgbImage) -> Result<Vec<ObjectDetection>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn detector_filters_model_output() {
        let detector = ObjectDetector::new(
            Arc::new(FixedModel(vec![detection("tv", 0.7), detection("cup", 0.9)])),
            ObjectDetectorConfig::default(),
        );
        let found = detector.detect(&RgbImage::new(4, 4)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].class, "tv");
    }
}
