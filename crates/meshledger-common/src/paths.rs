//! Path utilities for detecting pipeline inputs by extension.
//!
//! Extraction consumes source videos; reconstruction consumes directories of
//! extracted frames. Both are discovered by extension.

use std::path::Path;

/// List of supported source video extensions.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "mts"];

/// List of frame image extensions accepted by the reconstruction stage.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "tif", "tiff", "png"];

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check if a path has a source video extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use meshledger_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("transect_T1.MP4")));
/// assert!(!is_video_file(Path::new("frame_0001.jpg")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

/// Check if a path has a frame image extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use meshledger_common::paths::is_image_file;
///
/// assert!(is_image_file(Path::new("frame_0001.tif")));
/// assert!(!is_image_file(Path::new("transect.mov")));
/// ```
pub fn is_image_file(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

/// Get the list of video file extensions.
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}

/// Get the list of frame image extensions.
pub fn image_extensions() -> &'static [&'static str] {
    IMAGE_EXTENSIONS
}

/// Count frame images directly inside `dir`. Missing directories count as zero.
pub fn count_images(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file() && is_image_file(&e.path()))
                .count()
        })
        .unwrap_or(0)
}
