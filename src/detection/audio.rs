use serde::{Deserialize, Serialize};

use crate::media::AudioAnalyser;

pub const SILENCE_FLOOR_DB: f32 = -100.0;
pub const DEFAULT_NOISE_THRESHOLD_DB: f32 = -25.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioLevel {
    pub amplitude: f32,
    pub decibels: f32,
    pub is_noisy: bool,
}

/// Converts a mean byte amplitude (0..=255) to dBFS. Zero maps to the
/// -100 dB floor instead of negative infinity.
pub fn amplitude_to_db(avg_amplitude: f32) -> f32 {
    if avg_amplitude <= 0.0 || !avg_amplitude.is_finite() {
        return SILENCE_FLOOR_DB;
    }
    20.0 * (avg_amplitude / 255.0).log10()
}

pub fn classify(avg_amplitude: f32, threshold_db: f32) -> AudioLevel {
    let decibels = amplitude_to_db(avg_amplitude);
    AudioLevel {
        amplitude: avg_amplitude,
        decibels,
        is_noisy: decibels > threshold_db,
    }
}

/// Samples an analyser into a reusable bin buffer.
pub struct AudioMonitor {
    threshold_db: f32,
    bins: Vec<u8>,
}

impl AudioMonitor {
    pub fn new(threshold_db: f32) -> Self {
        Self {
            threshold_db,
            bins: Vec::new(),
        }
    }

    pub fn sample(&mut self, analyser: &mut dyn AudioAnalyser) -> AudioLevel {
        let count = analyser.frequency_bin_count();
        self.bins.resize(count, 0);
        analyser.byte_frequency_data(&mut self.bins);

        let avg = if self.bins.is_empty() {
            0.0
        } else {
            self.bins.iter().map(|&b| b as f32).sum::<f32>() / self.bins.len() as f32
        };
        classify(avg, self.threshold_db)
    }
}
