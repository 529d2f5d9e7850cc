//! Directory scanning
//!
//! Picks the images worth analyzing: anything larger than the minimum size in
//! both dimensions, up to a limit, in path order.

use std::path::{Path, PathBuf};
use tracing::debug;

// Must match the decoders enabled on the workspace `image` dependency
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// An image found on disk with its decoded dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl ScanCandidate {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }
}

/// Keep candidates strictly larger than `min_size` on both sides, at most `limit`
pub fn select(candidates: Vec<ScanCandidate>, min_size: u32, limit: usize) -> Vec<ScanCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.width > min_size && c.height > min_size)
        .take(limit)
        .collect()
}

/// Collect image candidates directly inside `dir`
pub fn collect(dir: &Path, min_size: u32, limit: usize) -> anyhow::Result<Vec<ScanCandidate>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    paths.sort();

    let candidates = paths
        .into_iter()
        .filter_map(|path| match image::image_dimensions(&path) {
            Ok((width, height)) => Some(ScanCandidate::new(path, width, height)),
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect();

    Ok(select(candidates, min_size, limit))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
