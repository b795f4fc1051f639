use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::info;

use crate::{
    error::{ExtractError, Result, Stage},
    process::{Invocation, ProcessRunner, failure},
    source::SourceLocator,
    workdir::find_video_in_dir,
};

const TOOL: &str = "yt-dlp";

/// yt-dlp format selector: best stream at or under `max_height`, else best available.
pub fn format_selector(max_height: u32) -> String {
    format!(
        "bestvideo[height<={h}]+bestaudio/best[height<={h}]/best",
        h = max_height
    )
}

/// Download a video into `work_dir` as `video.<ext>` using yt-dlp
pub async fn download_video(
    runner: &dyn ProcessRunner,
    locator: &SourceLocator,
    work_dir: &Path,
    max_height: u32,
    timeout: Duration,
) -> Result<PathBuf> {
    let output_template = work_dir.join("video.%(ext)s");
    let inv = Invocation::new(TOOL, timeout)
        .arg("-f")
        .arg(format_selector(max_height))
        .args(["--merge-output-format", "mp4", "-o"])
        .arg(&output_template)
        .arg("--no-playlist")
        .arg(&locator.raw)
        .current_dir(work_dir);

    info!(max_height, "downloading video");
    let output = runner
        .run(&inv)
        .await
        .map_err(|e| e.into_stage_error(Stage::Acquisition))?;

    if !output.success() {
        return Err(failure(Stage::Acquisition, TOOL, &output));
    }

    find_video_in_dir(work_dir).ok_or_else(|| ExtractError::ArtifactNotFound {
        stage: Stage::Acquisition,
        tool: TOOL.to_string(),
        dir: work_dir.to_path_buf(),
        pattern: "video.{mp4,mkv,webm}".to_string(),
    })
}
