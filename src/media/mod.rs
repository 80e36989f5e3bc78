//! Capture handles. The exam page owns the camera and microphone; the
//! proctoring pipeline only borrows read access through these traits.

pub mod frames;

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

pub use frames::{DirectoryFrameSource, StaticFrameSource};

/// Read-only access to the current camera frame.
pub trait FrameSource: Send + Sync {
    /// Whether a frame with non-zero dimensions is available yet.
    fn is_ready(&self) -> bool;

    fn grab_frame(&self) -> Result<RgbImage>;
}

/// Frequency-domain view of a live microphone, one byte per bin (0..=255).
///
/// Dropping the analyser releases the underlying audio context.
pub trait AudioAnalyser: Send {
    fn frequency_bin_count(&self) -> usize;

    fn byte_frequency_data(&mut self, out: &mut [u8]);
}

pub trait AudioInput: Send + Sync {
    fn open_analyser(&self) -> Result<Box<dyn AudioAnalyser>>;
}

/// Camera plus optional microphone, cloned cheaply into each detector loop.
#[derive(Clone)]
pub struct MediaStream {
    pub video: Arc<dyn FrameSource>,
    pub audio: Option<Arc<dyn AudioInput>>,
}

impl MediaStream {
    pub fn new(video: Arc<dyn FrameSource>) -> Self {
        Self { video, audio: None }
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioInput>) -> Self {
        self.audio = Some(audio);
        self
    }
}
