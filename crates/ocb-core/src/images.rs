//! Image selection among extracted archive entries.

use std::path::{Component, Path, PathBuf};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp", "gif"];

/// True for file names with a known raster image extension (case-insensitive).
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Archive tooling leaves metadata next to real pages (`__MACOSX/`, `._foo.png`,
/// `.DS_Store`); none of it is a page.
fn is_metadata_entry(rel: &Path) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(os) => {
            let s = os.to_string_lossy();
            s == "__MACOSX" || s.starts_with('.')
        }
        _ => false,
    })
}

/// Filter extracted entries (relative paths, listing order) down to page images.
///
/// The input order is kept as-is so delivery follows the archive listing.
pub fn select_images(extracted: &[PathBuf]) -> Vec<PathBuf> {
    extracted
        .iter()
        .filter(|rel| !is_metadata_entry(rel) && has_image_extension(rel))
        .cloned()
        .collect()
}

/// Display name for a page: the file name without its directories.
pub fn page_name(rel: &Path) -> String {
    rel.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| rel.display().to_string())
}
