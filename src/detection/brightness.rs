use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub const SAMPLE_WIDTH: u32 = 100;
pub const SAMPLE_HEIGHT: u32 = 75;
pub const DEFAULT_BLACK_THRESHOLD: f32 = 20.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrightnessReading {
    /// Mean luma on a 0..=255 scale.
    pub brightness: f32,
    pub is_black: bool,
}

/// Mean Rec. 601 luma of the frame after downsampling to 100×75.
pub fn average_luma(frame: &RgbImage) -> f32 {
    if frame.width() == 0 || frame.height() == 0 {
        return 0.0;
    }

    let sample = imageops::resize(frame, SAMPLE_WIDTH, SAMPLE_HEIGHT, FilterType::Triangle);
    let total: f64 = sample
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();

    (total / (SAMPLE_WIDTH * SAMPLE_HEIGHT) as f64) as f32
}

pub fn classify(brightness: f32, threshold: f32) -> BrightnessReading {
    BrightnessReading {
        brightness,
        is_black: brightness < threshold,
    }
}

pub fn measure(frame: &RgbImage, threshold: f32) -> BrightnessReading {
    classify(average_luma(frame), threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn uniform_frame_luma_matches_weights() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([100, 200, 50]));
        let expected = 0.299 * 100.0 + 0.587 * 200.0 + 0.114 * 50.0;
        assert!((average_luma(&frame) - expected).abs() < 0.5);
    }

    #[test]
    fn covered_camera_is_black() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([3, 3, 3]));
        assert!(measure(&frame, DEFAULT_BLACK_THRESHOLD).is_black);
    }

    #[test]
    fn threshold_itself_is_not_black() {
        assert!(!classify(20.0, 20.0).is_black);
        assert!(classify(19.99, 20.0).is_black);
    }

    #[test]
    fn empty_frame_reads_as_zero() {
        let frame = RgbImage::new(0, 0);
        assert_eq!(average_luma(&frame), 0.0);
    }
}
