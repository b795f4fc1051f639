use std::path::Path;

use serde::Deserialize;
use tokio::fs;
use tracing::info;

use crate::{
    error::{ExtractError, Result, Stage},
    process::{Invocation, ProcessRunner, failure},
    source::SourceLocator,
    types::{Chapter, VideoMetadata},
    workdir::get_metadata_path,
};

const TOOL: &str = "yt-dlp";

/// Subset of `yt-dlp --dump-json` we care about. Every field is optional upstream.
#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    description: Option<String>,
    chapters: Option<Vec<RawChapter>>,
    tags: Option<Vec<String>>,
    webpage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChapter {
    start_time: Option<f64>,
    title: Option<String>,
}

impl From<RawInfo> for VideoMetadata {
    fn from(raw: RawInfo) -> Self {
        let mut chapters: Vec<Chapter> = raw
            .chapters
            .unwrap_or_default()
            .into_iter()
            .map(|c| Chapter {
                start_time: c.start_time.unwrap_or(0.0).max(0.0),
                title: c.title.unwrap_or_default(),
            })
            .collect();
        chapters.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        VideoMetadata {
            title: raw.title.unwrap_or_else(|| "Untitled Video".to_string()),
            channel: raw
                .channel
                .or(raw.uploader)
                .unwrap_or_else(|| "Unknown".to_string()),
            duration_seconds: raw.duration.unwrap_or(0.0).max(0.0),
            description: raw.description.unwrap_or_default(),
            chapters,
            tags: raw.tags.unwrap_or_default(),
            webpage_url: raw.webpage_url.unwrap_or_default(),
        }
    }
}

/// Parse a raw `--dump-json` document.
pub fn parse_metadata(value: &serde_json::Value) -> Result<VideoMetadata> {
    let raw = RawInfo::deserialize(value)?;
    Ok(raw.into())
}

/// Fetch metadata with yt-dlp and dump the raw JSON into the work directory.
pub async fn fetch_metadata(
    runner: &dyn ProcessRunner,
    locator: &SourceLocator,
    work_dir: &Path,
    timeout: std::time::Duration,
) -> Result<VideoMetadata> {
    let inv = Invocation::new(TOOL, timeout)
        .args(["--dump-json", "--no-download", "--no-playlist"])
        .arg(&locator.raw)
        .current_dir(work_dir);

    let output = runner
        .run(&inv)
        .await
        .map_err(|e| e.into_stage_error(Stage::Metadata))?;

    if !output.success() {
        return Err(failure(Stage::Metadata, TOOL, &output));
    }

    let value: serde_json::Value =
        serde_json::from_str(output.stdout.trim()).map_err(|e| ExtractError::InvalidToolOutput {
            stage: Stage::Metadata,
            tool: TOOL.to_string(),
            reason: format!(
                "invalid JSON ({e}); first 200 chars: {}",
                output.stdout.chars().take(200).collect::<String>()
            ),
        })?;

    let pretty_json = serde_json::to_string_pretty(&value)?;
    fs::write(get_metadata_path(work_dir), &pretty_json).await?;

    let metadata = parse_metadata(&value)?;
    info!(
        title = %metadata.title,
        channel = %metadata.channel,
        duration = metadata.duration_seconds,
        "metadata fetched"
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::process::fake::{FakeRunner, exit, ok};

    #[test]
    fn falls_back_to_uploader_and_sorts_chapters() {
        let value = json!({
            "title": "Design systems",
            "uploader": "Some Studio",
            "duration": 95,
            "chapters": [
                {"start_time": 60.0, "end_time": 95.0, "title": "Outro"},
                {"start_time": 0.0, "end_time": 60.0, "title": "Intro"}
            ],
            "tags": ["ui", "design"],
            "webpage_url": "https://www.youtube.com/watch?v=eVnQFWGDEdY"
        });
        let meta = parse_metadata(&value).unwrap();
        assert_eq!(meta.channel, "Some Studio");
        assert_eq!(meta.duration_seconds, 95.0);
        assert_eq!(meta.chapters[0].title, "Intro");
        assert_eq!(meta.chapters[1].title, "Outro");
    }

    #[test]
    fn tolerates_nulls() {
        let value = json!({"title": null, "duration": null, "chapters": null, "tags": null});
        let meta = parse_metadata(&value).unwrap();
        assert_eq!(meta.title, "Untitled Video");
        assert_eq!(meta.channel, "Unknown");
        assert_eq!(meta.duration_seconds, 0.0);
        assert!(meta.chapters.is_empty());
    }

    #[tokio::test]
    async fn writes_raw_dump() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok(r#"{"title":"T","channel":"C","duration":12.5}"#));
        let loc = SourceLocator::parse("eVnQFWGDEdY").unwrap();

        let meta = fetch_metadata(&runner, &loc, dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(meta.title, "T");

        let dumped = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        assert!(dumped.contains("\"title\": \"T\""));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| exit(1, "ERROR: Private video"));
        let loc = SourceLocator::parse("eVnQFWGDEdY").unwrap();

        let err = fetch_metadata(&runner, &loc, dir.path(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::ExternalToolFailure {
                stage: Stage::Metadata,
                ..
            }
        ));
        assert!(!dir.path().join("metadata.json").exists());
    }

    #[tokio::test]
    async fn garbage_stdout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok("not json"));
        let loc = SourceLocator::parse("eVnQFWGDEdY").unwrap();

        let err = fetch_metadata(&runner, &loc, dir.path(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidToolOutput { .. }));
    }
}
