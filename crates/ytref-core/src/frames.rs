//! Still-frame sampling through ffmpeg.
//!
//! Two modes share one shape: run ffmpeg with a filter graph that writes numbered PNGs into
//! a dedicated directory, then list that directory back in numeric order. Interval frames get
//! timestamps from their position; scene frames take the presentation time ffmpeg's
//! `showinfo` filter reports for them.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::{
    error::{Result, Stage},
    process::{Invocation, ProcessRunner, failure},
    workdir::{INTERVAL_FRAMES_DIR, SCENE_FRAMES_DIR},
};

const TOOL: &str = "ffmpeg";

static PTS_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Parsed_showinfo.*\bpts_time:\s*(-?[0-9]+(?:\.[0-9]+)?)").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrigin {
    Interval,
    Scene,
}

impl FrameOrigin {
    fn stage(&self) -> Stage {
        match self {
            FrameOrigin::Interval => Stage::IntervalFrames,
            FrameOrigin::Scene => Stage::SceneFrames,
        }
    }

    fn dir_name(&self) -> &'static str {
        match self {
            FrameOrigin::Interval => INTERVAL_FRAMES_DIR,
            FrameOrigin::Scene => SCENE_FRAMES_DIR,
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            FrameOrigin::Interval => "frame_",
            FrameOrigin::Scene => "scene_",
        }
    }
}

/// One sampled still image on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub path: PathBuf,
    /// Zero-based position within its origin's sequence.
    pub index: usize,
    /// Seconds from the start of the video.
    pub timestamp: f64,
    pub origin: FrameOrigin,
}

/// Sample one frame every `interval` seconds into `frames/`.
pub async fn sample_interval(
    runner: &dyn ProcessRunner,
    video: &Path,
    work_dir: &Path,
    interval: u32,
    timeout: Duration,
) -> Result<Vec<Frame>> {
    let origin = FrameOrigin::Interval;
    let filter = format!("fps=1/{interval}");
    let (files, _) = run_sampler(runner, video, work_dir, origin, &filter, false, timeout).await?;

    let frames: Vec<Frame> = files
        .into_iter()
        .enumerate()
        .map(|(index, path)| Frame {
            path,
            index,
            timestamp: index as f64 * f64::from(interval),
            origin,
        })
        .collect();

    report_count(origin, frames.len());
    Ok(frames)
}

/// Sample frames where the scene-change score exceeds `threshold` into `frames_scene/`.
pub async fn sample_scenes(
    runner: &dyn ProcessRunner,
    video: &Path,
    work_dir: &Path,
    threshold: f64,
    timeout: Duration,
) -> Result<Vec<Frame>> {
    let origin = FrameOrigin::Scene;
    let filter = format!("select='gt(scene,{threshold})',showinfo");
    let (files, stderr) =
        run_sampler(runner, video, work_dir, origin, &filter, true, timeout).await?;

    let times = parse_showinfo_times(&stderr);
    let mut last = 0.0_f64;
    let mut frames: Vec<Frame> = files
        .into_iter()
        .enumerate()
        .map(|(index, path)| {
            // A frame without a reported time keeps the previous one.
            let t = times.get(index).copied().unwrap_or(last).max(last);
            last = t;
            Frame {
                path,
                index,
                timestamp: t,
                origin,
            }
        })
        .collect();
    frames.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then(a.index.cmp(&b.index))
    });

    report_count(origin, frames.len());
    Ok(frames)
}

/// Presentation times from ffmpeg `showinfo` lines, in emission order.
pub fn parse_showinfo_times(stderr: &str) -> Vec<f64> {
    stderr
        .lines()
        .filter_map(|line| PTS_TIME.captures(line))
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .map(|t| t.max(0.0))
        .collect()
}

async fn run_sampler(
    runner: &dyn ProcessRunner,
    video: &Path,
    work_dir: &Path,
    origin: FrameOrigin,
    filter: &str,
    variable_rate: bool,
    timeout: Duration,
) -> Result<(Vec<PathBuf>, String)> {
    let frames_dir = work_dir.join(origin.dir_name());
    fs::create_dir_all(&frames_dir).await?;
    clear_frames(&frames_dir, origin).await?;

    let pattern = frames_dir.join(format!("{}%04d.png", origin.file_prefix()));
    let mut inv = Invocation::new(TOOL, timeout)
        .args(["-y", "-i"])
        .arg(video)
        .args(["-vf", filter]);
    if variable_rate {
        inv = inv.args(["-vsync", "vfr"]);
    }
    let inv = inv.args(["-q:v", "2"]).arg(&pattern).current_dir(work_dir);

    info!(mode = ?origin, filter, "sampling frames");
    let output = runner
        .run(&inv)
        .await
        .map_err(|e| e.into_stage_error(origin.stage()))?;

    if !output.success() {
        return Err(failure(origin.stage(), TOOL, &output));
    }

    let files = list_frames(&frames_dir, origin).await?;
    Ok((files, output.stderr))
}

/// Frame files sorted by their numeric suffix, never by directory order.
async fn list_frames(frames_dir: &Path, origin: FrameOrigin) -> Result<Vec<PathBuf>> {
    let mut numbered: Vec<(u64, PathBuf)> = Vec::new();
    let mut dir = fs::read_dir(frames_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(n) = frame_number(&name, origin) {
            numbered.push((n, entry.path()));
        }
    }
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

async fn clear_frames(frames_dir: &Path, origin: FrameOrigin) -> Result<()> {
    for stale in list_frames(frames_dir, origin).await? {
        fs::remove_file(stale).await?;
    }
    Ok(())
}

fn frame_number(name: &str, origin: FrameOrigin) -> Option<u64> {
    name.strip_prefix(origin.file_prefix())?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

fn report_count(origin: FrameOrigin, count: usize) {
    if count == 0 {
        match origin {
            FrameOrigin::Interval => warn!(
                "ffmpeg succeeded but produced no interval frames; the video may be too short or corrupt"
            ),
            FrameOrigin::Scene => warn!(
                "no scene-change frames detected; try lowering the scene threshold"
            ),
        }
    } else {
        info!(mode = ?origin, count, "frames captured");
    }
}
