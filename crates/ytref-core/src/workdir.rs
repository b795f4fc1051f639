use std::path::{Path, PathBuf};

use crate::source::VideoId;

pub const INTERVAL_FRAMES_DIR: &str = "frames";
pub const SCENE_FRAMES_DIR: &str = "frames_scene";

/// Per-run working directory; defaults to `./yt-extract-<video id>`.
pub fn get_work_dir(video_id: &VideoId, output_override: Option<&Path>) -> PathBuf {
    match output_override {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from(format!("./yt-extract-{}", video_id)),
    }
}

/// Find the downloaded `video.*` file in the work directory
pub fn find_video_in_dir(work_dir: &Path) -> Option<PathBuf> {
    let Ok(entries) = std::fs::read_dir(work_dir) else {
        return None;
    };

    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|path| {
            let is_video_stem = path.file_stem().is_some_and(|s| s == "video");
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            is_video_stem && matches!(ext.as_str(), "mp4" | "mkv" | "webm")
        })
        .collect();
    found.sort();
    found.into_iter().next()
}

pub fn get_metadata_path(work_dir: &Path) -> PathBuf {
    work_dir.join("metadata.json")
}

pub fn get_ocr_results_path(work_dir: &Path) -> PathBuf {
    work_dir.join("ocr-results.json")
}

pub fn get_palette_path(work_dir: &Path) -> PathBuf {
    work_dir.join("color-palette.json")
}

pub fn get_document_path(work_dir: &Path) -> PathBuf {
    work_dir.join("extracted-reference.md")
}
