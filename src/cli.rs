use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_EXAM_SECS: u64 = 60 * 60;

/// Replays recorded camera frames through the proctoring pipeline.
#[derive(Debug, Parser, Clone)]
#[command(name = "exam-proctor", version, about)]
pub struct ProctorArgs {
    /// Directory of frame images, replayed in file-name order
    pub frames_dir: PathBuf,

    /// Exam length in seconds
    #[arg(default_value_t = DEFAULT_EXAM_SECS)]
    pub duration_secs: u64,

    /// Settings file; falls back to PROCTOR_SETTINGS, then proctor-settings.json
    #[arg(long, env = "PROCTOR_SETTINGS", default_value = "proctor-settings.json")]
    pub settings: PathBuf,
}
