//! Input discovery: enumerate receipt images in a folder.
//!
//! A flat, non-recursive scan — receipts land in one folder, and recursing
//! would silently pull in whatever subdirectories happen to exist. The
//! extension filter is case-insensitive (`IMG_2041.JPG` is a JPEG) and the
//! result is sorted so dispatch order is stable across runs and platforms.

use crate::error::BatchError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// List image files in `folder` whose extension matches `extensions`.
///
/// Returns paths in sorted order. The folder itself must exist and be a
/// directory; anything else is fatal to the run.
pub fn discover_images(folder: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, BatchError> {
    if !folder.exists() {
        return Err(BatchError::FolderNotFound {
            path: folder.to_path_buf(),
        });
    }
    if !folder.is_dir() {
        return Err(BatchError::NotAFolder {
            path: folder.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(folder).map_err(|e| BatchError::FolderReadFailed {
        path: folder.to_path_buf(),
        source: e,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BatchError::FolderReadFailed {
            path: folder.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)) {
            paths.push(path);
        }
    }

    paths.sort();
    debug!("Discovered {} images in {}", paths.len(), folder.display());
    Ok(paths)
}
