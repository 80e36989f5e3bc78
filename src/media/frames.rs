use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;

use super::FrameSource;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Holds a single frame that callers can swap at any time.
#[derive(Default)]
pub struct StaticFrameSource {
    frame: RwLock<Option<RgbImage>>,
}

impl StaticFrameSource {
    pub fn new(frame: RgbImage) -> Self {
        Self {
            frame: RwLock::new(Some(frame)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set_frame(&self, frame: RgbImage) {
        *self.frame.write().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }
}

impl FrameSource for StaticFrameSource {
    fn is_ready(&self) -> bool {
        self.frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|frame| frame.width() > 0 && frame.height() > 0)
            .unwrap_or(false)
    }

    fn grab_frame(&self) -> Result<RgbImage> {
        self.frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow!("no frame available"))
    }
}

/// Replays the images of a directory in name order, one per grab, looping.
pub struct DirectoryFrameSource {
    paths: Vec<PathBuf>,
    cursor: AtomicUsize,
}

impl DirectoryFrameSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect::<Vec<_>>();

        if paths.is_empty() {
            bail!("no image frames found in {}", dir.display());
        }
        paths.sort();

        Ok(Self {
            paths,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for DirectoryFrameSource {
    fn is_ready(&self) -> bool {
        !self.paths.is_empty()
    }

    fn grab_frame(&self) -> Result<RgbImage> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.paths.len();
        let path = &self.paths[index];
        let img = image::open(path)
            .with_context(|| format!("Failed to decode frame {}", path.display()))?;
        Ok(img.to_rgb8())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
