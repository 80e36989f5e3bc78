//! Face presence and identity checks.
//!
//! Detection runs through an ordered chain of [`FaceBackend`]s: the first
//! backend that returns at least one face wins, later ones are fallbacks for
//! poor lighting. Identity is decided by Euclidean distance between face
//! descriptors.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub const DESCRIPTOR_LEN: usize = 128;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Identity embedding of one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != DESCRIPTOR_LEN {
            bail!(
                "face descriptor must have {} values, got {}",
                DESCRIPTOR_LEN,
                values.len()
            );
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn distance(&self, other: &FaceDescriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub score: f32,
    /// Absent when the backend could not compute landmarks for the face.
    pub descriptor: Option<FaceDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceBackendOptions {
    pub input_size: u32,
    pub score_threshold: f32,
}

/// One face-detection model.
#[async_trait]
pub trait FaceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(
        &self,
        frame: &RgbImage,
        options: &FaceBackendOptions,
    ) -> Result<Vec<DetectedFace>>;
}

/// Loads the backend chain, most accurate first.
#[async_trait]
pub trait FaceModelLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Arc<dyn FaceBackend>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaceStatus {
    NoFace,
    Match,
    Mismatch,
    Multiple,
    /// One face, but there is no reference descriptor to compare against.
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub face_count: usize,
    pub status: FaceStatus,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub detection_scores: Vec<f32>,
}

impl DetectionResult {
    pub fn no_face() -> Self {
        Self {
            face_count: 0,
            status: FaceStatus::NoFace,
            confidence: 0.0,
            distance: None,
            detection_scores: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaceDetectorConfig {
    /// Options per backend tier, in chain order. Backends beyond the end of
    /// this list reuse the last entry.
    pub tiers: Vec<FaceBackendOptions>,
    pub match_threshold: f32,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                FaceBackendOptions {
                    input_size: 512,
                    score_threshold: DEFAULT_SCORE_THRESHOLD,
                },
                FaceBackendOptions {
                    input_size: 320,
                    score_threshold: 0.2,
                },
            ],
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

pub struct FaceDetector {
    backends: Vec<Arc<dyn FaceBackend>>,
    config: FaceDetectorConfig,
}

impl FaceDetector {
    pub fn new(backends: Vec<Arc<dyn FaceBackend>>, config: FaceDetectorConfig) -> Self {
        Self { backends, config }
    }

    pub fn config(&self) -> &FaceDetectorConfig {
        &self.config
    }

    fn options_for(&self, tier: usize) -> FaceBackendOptions {
        self.config
            .tiers
            .get(tier)
            .or_else(|| self.config.tiers.last())
            .copied()
            .unwrap_or(FaceBackendOptions {
                input_size: 416,
                score_threshold: DEFAULT_SCORE_THRESHOLD,
            })
    }

    /// Walks the chain until a backend reports at least one face. Errors only
    /// when every backend failed; a backend that ran and saw nothing counts as
    /// a clean empty result.
    pub async fn find_faces(&self, frame: &RgbImage) -> Result<Vec<DetectedFace>> {
        let mut last_err = None;
        let mut any_ran = false;

        for (tier, backend) in self.backends.iter().enumerate() {
            let options = self.options_for(tier);
            match backend.detect(frame, &options).await {
                Ok(faces) if !faces.is_empty() => {
                    log_debug!("{} found {} face(s)", backend.name(), faces.len());
                    return Ok(faces);
                }
                Ok(_) => {
                    any_ran = true;
                    log_debug!("{} found no faces, trying next backend", backend.name());
                }
                Err(err) => {
                    log_debug!("{} failed: {err:#}", backend.name());
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) if !any_ran => Err(err.context("every face backend failed")),
            _ => Ok(Vec::new()),
        }
    }

    /// Like [`FaceDetector::detect`] but surfaces a total backend failure.
    pub async fn try_detect(
        &self,
        frame: &RgbImage,
        reference: Option<&FaceDescriptor>,
    ) -> Result<DetectionResult> {
        let faces = self.find_faces(frame).await?;
        Ok(classify_faces(&faces, reference, self.config.match_threshold))
    }

    /// Never fails: a detection error reads as `NoFace` with zero confidence.
    pub async fn detect(
        &self,
        frame: &RgbImage,
        reference: Option<&FaceDescriptor>,
    ) -> DetectionResult {
        self.try_detect(frame, reference)
            .await
            .unwrap_or_else(|_| DetectionResult::no_face())
    }

    /// Descriptor of the most confident face in an enrollment photo. `None`
    /// when the photo has no usable face.
    pub async fn compute_reference_descriptor(&self, photo: &RgbImage) -> Option<FaceDescriptor> {
        let faces = self.find_faces(photo).await.unwrap_or_default();
        let best = faces
            .into_iter()
            .filter(|face| face.descriptor.is_some())
            .max_by(|a, b| a.score.total_cmp(&b.score));

        match best {
            Some(face) => {
                log_info!("reference descriptor computed (score {:.2})", face.score);
                face.descriptor
            }
            None => {
                log_info!("no face found in reference photo; identity checks disabled");
                None
            }
        }
    }
}

pub fn classify_faces(
    faces: &[DetectedFace],
    reference: Option<&FaceDescriptor>,
    match_threshold: f32,
) -> DetectionResult {
    let detection_scores: Vec<f32> = faces.iter().map(|face| face.score).collect();

    match faces {
        [] => DetectionResult::no_face(),
        [face] => {
            let distance = match (reference, face.descriptor.as_ref()) {
                (Some(reference), Some(descriptor)) => Some(reference.distance(descriptor)),
                _ => None,
            };

            let (status, confidence) = match distance {
                Some(d) if d <= match_threshold => (FaceStatus::Match, (1.0 - d).max(0.0)),
                Some(d) => (FaceStatus::Mismatch, (1.0 - d).max(0.0)),
                None => (FaceStatus::Unverified, face.score.clamp(0.0, 1.0)),
            };

            DetectionResult {
                face_count: 1,
                status,
                confidence,
                distance,
                detection_scores,
            }
        }
        _ => DetectionResult {
            face_count: faces.len(),
            status: FaceStatus::Multiple,
            confidence: 0.0,
            distance: None,
            detection_scores,
        },
    }
}
