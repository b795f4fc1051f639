//! Caption retrieval and chunking.
//!
//! Captions come from yt-dlp's `json3` subtitle format, which carries millisecond timings
//! per caption event. Manual subtitles win over automatic ones for the same language.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info};

use crate::{
    error::{ExtractError, Result, Stage},
    process::{Invocation, ProcessRunner, failure},
    source::SourceLocator,
    types::{TranscriptChunk, TranscriptEntry},
};

const TOOL: &str = "yt-dlp";
const SUB_STEM: &str = "transcript";

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: f64,
    #[serde(default)]
    d_duration_ms: f64,
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse a yt-dlp `json3` caption file into start-ordered entries.
pub fn parse_json3(content: &str) -> Result<Vec<TranscriptEntry>> {
    let doc: Json3 = serde_json::from_str(content)?;

    let mut entries: Vec<TranscriptEntry> = doc
        .events
        .into_iter()
        .filter_map(|event| {
            let text = event
                .segs
                .iter()
                .map(|s| s.utf8.as_str())
                .collect::<String>()
                .replace('\n', " ");
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptEntry {
                text: text.to_string(),
                start: (event.t_start_ms / 1000.0).max(0.0),
                duration: (event.d_duration_ms / 1000.0).max(0.0),
            })
        })
        .collect();

    entries.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(entries)
}

/// Coalesce entries into windows of at least `chunk_seconds`; only the last may be shorter.
pub fn chunk_transcript(entries: &[TranscriptEntry], chunk_seconds: u32) -> Vec<TranscriptChunk> {
    let Some(first) = entries.first() else {
        return Vec::new();
    };
    let window = f64::from(chunk_seconds);

    let mut chunks = Vec::new();
    let mut current = TranscriptChunk {
        start: first.start,
        text: String::new(),
    };

    for entry in entries {
        if entry.start - current.start >= window && !current.text.is_empty() {
            chunks.push(current);
            current = TranscriptChunk {
                start: entry.start,
                text: String::new(),
            };
        }
        current.text.push(' ');
        current.text.push_str(&entry.text);
    }
    if !current.text.is_empty() {
        chunks.push(current);
    }

    for chunk in &mut chunks {
        chunk.text = chunk.text.trim().to_string();
    }
    chunks
}

/// Download captions with yt-dlp and parse them. An empty result means the video has none.
pub async fn fetch_transcript(
    runner: &dyn ProcessRunner,
    locator: &SourceLocator,
    work_dir: &Path,
    lang: &str,
    timeout: std::time::Duration,
) -> Result<Vec<TranscriptEntry>> {
    let template = work_dir.join(format!("{SUB_STEM}.%(ext)s"));
    let inv = Invocation::new(TOOL, timeout)
        .args(["--skip-download", "--write-subs", "--write-auto-subs"])
        .arg("--sub-langs")
        .arg(format!("{lang},{lang}.*,{lang}-orig"))
        .args(["--sub-format", "json3", "--no-playlist", "-o"])
        .arg(&template)
        .arg(&locator.raw)
        .current_dir(work_dir);

    let output = runner
        .run(&inv)
        .await
        .map_err(|e| e.into_stage_error(Stage::Transcript))?;

    if !output.success() {
        return Err(failure(Stage::Transcript, TOOL, &output));
    }

    let files = caption_files(work_dir).await?;
    let Some(chosen) = pick_caption_file(&files, lang) else {
        debug!("no caption files written");
        return Ok(Vec::new());
    };

    let content = fs::read_to_string(chosen).await?;
    let parsed = parse_json3(&content).map_err(|e| ExtractError::InvalidToolOutput {
        stage: Stage::Transcript,
        tool: TOOL.to_string(),
        reason: e.to_string(),
    });

    // Caption files are scratch; the document is the artifact.
    for file in &files {
        let _ = fs::remove_file(file).await;
    }

    let entries = parsed?;
    info!(entries = entries.len(), "transcript fetched");
    Ok(entries)
}

async fn caption_files(work_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut dir = fs::read_dir(work_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&format!("{SUB_STEM}.")) && name.ends_with(".json3") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Prefer `transcript.<lang>.json3`, then any other variant of the language.
fn pick_caption_file<'a>(files: &'a [PathBuf], lang: &str) -> Option<&'a PathBuf> {
    let exact = format!("{SUB_STEM}.{lang}.json3");
    files
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == exact))
        .or_else(|| files.first())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::process::fake::{FakeRunner, arg_after, exit, ok};

    fn entry(text: &str, start: f64, duration: f64) -> TranscriptEntry {
        TranscriptEntry {
            text: text.to_string(),
            start,
            duration,
        }
    }

    #[test]
    fn parses_json3_events() {
        let raw = r#"{
            "events": [
                {"tStartMs": 4000, "dDurationMs": 2000, "segs": [{"utf8": "second"}]},
                {"tStartMs": 0, "dDurationMs": 4000, "segs": [{"utf8": "hello "}, {"utf8": "world"}]},
                {"tStartMs": 3000, "aAppend": 1, "segs": [{"utf8": "\n"}]},
                {"tStartMs": 5000, "dDurationMs": 100}
            ]
        }"#;
        let entries = parse_json3(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry("hello world", 0.0, 4.0));
        assert_eq!(entries[1], entry("second", 4.0, 2.0));
    }

    #[test]
    fn chunks_by_window() {
        let entries = vec![
            entry("intro", 0.0, 30.0),
            entry("middle", 30.0, 30.0),
            entry("end", 65.0, 30.0),
        ];
        let chunks = chunk_transcript(&entries, 60);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, 0.0);
        assert_eq!(chunks[0].text, "intro middle");
        assert_eq!(chunks[1].start, 65.0);
        assert_eq!(chunks[1].text, "end");
    }

    #[test]
    fn every_chunk_but_last_spans_the_window() {
        let entries: Vec<_> = (0..50)
            .map(|i| entry(&format!("w{i}"), f64::from(i) * 7.0, 7.0))
            .collect();
        let chunks = chunk_transcript(&entries, 60);
        for pair in chunks.windows(2) {
            assert!(pair[1].start - pair[0].start >= 60.0);
        }
        let words: usize = chunks.iter().map(|c| c.text.split(' ').count()).sum();
        assert_eq!(words, 50);
    }

    #[test]
    fn empty_transcript_has_no_chunks() {
        assert!(chunk_transcript(&[], 60).is_empty());
    }

    #[tokio::test]
    async fn reads_and_removes_caption_files() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|inv| {
            let template = arg_after(inv, "-o").unwrap().to_string();
            let en = template.replace("%(ext)s", "en.json3");
            let auto = template.replace("%(ext)s", "en-orig.json3");
            std::fs::write(
                en,
                r#"{"events":[{"tStartMs":0,"dDurationMs":1000,"segs":[{"utf8":"manual"}]}]}"#,
            )
            .unwrap();
            std::fs::write(
                auto,
                r#"{"events":[{"tStartMs":0,"dDurationMs":1000,"segs":[{"utf8":"auto"}]}]}"#,
            )
            .unwrap();
            ok("")
        });
        let loc = SourceLocator::parse("eVnQFWGDEdY").unwrap();

        let entries = fetch_transcript(&runner, &loc, dir.path(), "en", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "manual");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn no_captions_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok(""));
        let loc = SourceLocator::parse("eVnQFWGDEdY").unwrap();
        let entries = fetch_transcript(&runner, &loc, dir.path(), "en", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn tool_failure_surfaces_as_transcript_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| exit(1, "ERROR: unavailable"));
        let loc = SourceLocator::parse("eVnQFWGDEdY").unwrap();
        let err = fetch_transcript(&runner, &loc, dir.path(), "en", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Transcript));
    }
}
