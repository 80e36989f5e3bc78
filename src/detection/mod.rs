pub mod audio;
pub mod brightness;
pub mod face;
pub mod objects;

pub use audio::{AudioLevel, AudioMonitor};
pub use brightness::BrightnessReading;
pub use face::{
    DetectedFace, DetectionResult, FaceBackend, FaceBackendOptions, FaceDescriptor, FaceDetector,
    FaceDetectorConfig, FaceModelLoader, FaceStatus,
};
pub use objects::{
    ObjectDetection, ObjectDetector, ObjectDetectorConfig, ObjectModel, ObjectModelLoader,
    SuspiciousObject,
};
