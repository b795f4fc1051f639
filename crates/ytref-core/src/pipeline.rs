//! The extraction run, stage by stage.
//!
//! Every stage below returns a `Result`; this module alone decides which failures end the
//! run and which only drop a section from the document.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use crate::{
    acquire::download_video,
    capability::{Capabilities, PYTHON},
    config::{ExtractConfig, OcrEngineKind},
    document::{DocumentInputs, render_document, write_document},
    error::{Result, Stage},
    events::{EventSender, PipelineEvent, emit},
    frames::{Frame, sample_interval, sample_scenes},
    metadata::fetch_metadata,
    palette::{ColorPalette, analyze_palette},
    process::ProcessRunner,
    recognize::{EasyOcrEngine, RecognitionEngine, RecognizedText, TesseractEngine, recognize_frames},
    source::SourceLocator,
    transcript::{chunk_transcript, fetch_transcript},
    types::TranscriptChunk,
    workdir::{
        get_document_path, get_metadata_path, get_ocr_results_path, get_palette_path,
        get_work_dir,
    },
};

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub work_dir: PathBuf,
    pub document_path: PathBuf,
    pub metadata_path: PathBuf,
    pub title: String,
    pub transcript_chunks: usize,
    pub interval_frames: usize,
    pub scene_frames: usize,
    /// Frames with meaningful text, when recognition ran.
    pub ocr_frames_with_text: Option<usize>,
    /// Dominant colour count, when a palette was produced.
    pub palette_colors: Option<usize>,
}

/// Drives one video through every stage.
pub struct Extractor {
    runner: Arc<dyn ProcessRunner>,
    capabilities: Capabilities,
    config: ExtractConfig,
    events: Option<EventSender>,
}

impl Extractor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        capabilities: Capabilities,
        config: ExtractConfig,
    ) -> Self {
        Self {
            runner,
            capabilities,
            config,
            events: None,
        }
    }

    /// Report progress on `events` while running.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    fn emit(&self, event: PipelineEvent) {
        emit(self.events.as_ref(), event);
    }

    fn skip(&self, stage: Stage, reason: impl Into<String>) {
        self.emit(PipelineEvent::StageSkipped {
            stage,
            reason: reason.into(),
        });
    }

    fn finish(&self, stage: Stage, detail: impl Into<String>) {
        self.emit(PipelineEvent::StageFinished {
            stage,
            detail: detail.into(),
        });
    }

    pub async fn run(&self, locator: &SourceLocator) -> Result<RunSummary> {
        let config = &self.config;
        let runner = self.runner.as_ref();

        // Preflight: nothing is spawned or written until these pass.
        config.validate()?;
        self.capabilities.check_required(config)?;
        let engine = self.capabilities.resolve_engine(config)?;

        let work_dir = get_work_dir(&locator.video_id, config.output_dir.as_deref());
        fs::create_dir_all(&work_dir).await?;
        info!(video_id = %locator.video_id, work_dir = %work_dir.display(), "starting extraction");

        // Metadata
        self.emit(PipelineEvent::StageStarted {
            stage: Stage::Metadata,
        });
        let metadata =
            fetch_metadata(runner, locator, &work_dir, config.timeouts.metadata).await?;
        self.finish(Stage::Metadata, metadata.title.clone());

        // Transcript
        let chunks = self.transcript(locator, &work_dir).await;

        // Acquisition and sampling
        let (interval_frames, scene_frames) = if config.transcript_only {
            self.skip(Stage::Acquisition, "transcript only");
            (Vec::new(), Vec::new())
        } else {
            self.acquire_and_sample(locator, &work_dir).await?
        };
        let all_frames: Vec<Frame> = interval_frames
            .iter()
            .chain(&scene_frames)
            .cloned()
            .collect();

        // Text recognition
        let recognized = match engine {
            Some(kind) if !all_frames.is_empty() => {
                Some(self.recognize(kind, &all_frames, &work_dir).await)
            }
            Some(_) => {
                self.skip(Stage::Recognition, "no frames");
                None
            }
            None => {
                if config.ocr && !config.transcript_only {
                    self.skip(Stage::Recognition, "engine not available");
                }
                None
            }
        };

        // Palette
        let palette = if config.colors && !config.transcript_only {
            self.palette(&all_frames, &work_dir).await
        } else {
            None
        };

        // Assembly
        self.emit(PipelineEvent::StageStarted {
            stage: Stage::Assembly,
        });
        let document = render_document(
            &DocumentInputs {
                metadata: &metadata,
                transcript: &chunks,
                interval_frames: &interval_frames,
                scene_frames: &scene_frames,
                interval: config.interval,
                recognized: recognized.as_ref(),
                palette: palette.as_ref(),
                work_dir: &work_dir,
                generated_at: chrono::Local::now().naive_local(),
            },
            &config.document,
        );
        let document_path = get_document_path(&work_dir);
        write_document(&document_path, &document).await?;
        self.emit(PipelineEvent::DocumentWritten {
            path: document_path.clone(),
        });

        Ok(RunSummary {
            metadata_path: get_metadata_path(&work_dir),
            document_path,
            title: metadata.title,
            transcript_chunks: chunks.len(),
            interval_frames: interval_frames.len(),
            scene_frames: scene_frames.len(),
            ocr_frames_with_text: recognized
                .as_ref()
                .map(|r| r.frames_with_text(config.document.min_index_text)),
            palette_colors: palette.map(|p| p.dominant_colors.len()),
            work_dir,
        })
    }

    /// Captions are optional; any failure only drops the transcript section.
    async fn transcript(&self, locator: &SourceLocator, work_dir: &Path) -> Vec<TranscriptChunk> {
        let config = &self.config;
        self.emit(PipelineEvent::StageStarted {
            stage: Stage::Transcript,
        });
        match fetch_transcript(
            self.runner.as_ref(),
            locator,
            work_dir,
            &config.transcript_lang,
            config.timeouts.transcript,
        )
        .await
        {
            Ok(entries) if entries.is_empty() => {
                warn!("no transcript available for this video");
                self.skip(Stage::Transcript, "no captions");
                Vec::new()
            }
            Ok(entries) => {
                let chunks = chunk_transcript(&entries, config.chunk_seconds);
                self.finish(
                    Stage::Transcript,
                    format!("{} segments, {} chunks", entries.len(), chunks.len()),
                );
                chunks
            }
            Err(e) => {
                warn!(error = %e, "transcript unavailable; continuing without it");
                self.skip(Stage::Transcript, e.to_string());
                Vec::new()
            }
        }
    }

    /// Download, sample both ways, then delete the video whatever the samplers did.
    async fn acquire_and_sample(
        &self,
        locator: &SourceLocator,
        work_dir: &Path,
    ) -> Result<(Vec<Frame>, Vec<Frame>)> {
        let config = &self.config;
        let runner = self.runner.as_ref();

        self.emit(PipelineEvent::StageStarted {
            stage: Stage::Acquisition,
        });
        let video = download_video(
            runner,
            locator,
            work_dir,
            config.max_height,
            config.timeouts.download,
        )
        .await?;
        self.finish(Stage::Acquisition, video.display().to_string());

        self.emit(PipelineEvent::StageStarted {
            stage: Stage::IntervalFrames,
        });
        let interval_frames = sample_interval(
            runner,
            &video,
            work_dir,
            config.interval,
            config.timeouts.frames,
        )
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "interval frame extraction failed");
            Vec::new()
        });
        self.finish(
            Stage::IntervalFrames,
            format!("{} frames", interval_frames.len()),
        );

        let scene_frames = if config.scene_detect {
            self.emit(PipelineEvent::StageStarted {
                stage: Stage::SceneFrames,
            });
            let frames = sample_scenes(
                runner,
                &video,
                work_dir,
                config.scene_threshold,
                config.timeouts.frames,
            )
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "scene frame extraction failed");
                Vec::new()
            });
            self.finish(Stage::SceneFrames, format!("{} frames", frames.len()));
            frames
        } else {
            Vec::new()
        };

        if let Err(e) = fs::remove_file(&video).await {
            warn!(path = %video.display(), error = %e, "could not remove downloaded video");
        }

        Ok((interval_frames, scene_frames))
    }

    fn build_engine(&self, kind: OcrEngineKind) -> Arc<dyn RecognitionEngine> {
        let timeout = self.config.timeouts.ocr_per_frame;
        match kind {
            OcrEngineKind::Tesseract => Arc::new(TesseractEngine::new(
                Arc::clone(&self.runner),
                self.config.ocr_workers,
                timeout,
            )),
            OcrEngineKind::EasyOcr => Arc::new(EasyOcrEngine::new(PYTHON, timeout)),
        }
    }

    async fn recognize(
        &self,
        kind: OcrEngineKind,
        frames: &[Frame],
        work_dir: &Path,
    ) -> RecognizedText {
        self.emit(PipelineEvent::StageStarted {
            stage: Stage::Recognition,
        });
        let engine = self.build_engine(kind);
        let recognized = recognize_frames(engine, frames, self.events.as_ref()).await;

        let with_text = recognized.frames_with_text(self.config.document.min_index_text);
        dump_json(&get_ocr_results_path(work_dir), &recognized).await;
        self.finish(
            Stage::Recognition,
            format!("{}/{} frames with text", with_text, recognized.len()),
        );
        recognized
    }

    async fn palette(&self, frames: &[Frame], work_dir: &Path) -> Option<ColorPalette> {
        if !self.capabilities.palette {
            warn!("palette support not available; skipping color analysis");
            self.skip(Stage::Palette, "not available");
            return None;
        }
        if frames.is_empty() {
            self.skip(Stage::Palette, "no frames");
            return None;
        }

        self.emit(PipelineEvent::StageStarted {
            stage: Stage::Palette,
        });
        let palette = analyze_palette(frames, &self.config.palette).await;
        match &palette {
            Some(p) => {
                dump_json(&get_palette_path(work_dir), p).await;
                self.finish(
                    Stage::Palette,
                    format!("{} colors", p.dominant_colors.len()),
                );
            }
            None => self.skip(Stage::Palette, "no colors extracted"),
        }
        palette
    }
}

/// Side artifacts are best effort; the document is what must land.
async fn dump_json<T: Serialize>(path: &Path, value: &T) {
    let written = match serde_json::to_string_pretty(value) {
        Ok(json) => fs::write(path, json).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "could not write analysis dump");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        error::ExtractError,
        process::{
            Invocation, ProcessError, ProcessOutput,
            fake::{FakeRunner, arg_after, exit, ok, ok_with_stderr, timed_out},
        },
    };

    const METADATA: &str = r#"{
        "id": "eVnQFWGDEdY",
        "title": "Design Systems in 95 Seconds",
        "channel": "Studio",
        "duration": 95,
        "description": "Slides and notes.",
        "tags": ["design", "ui"],
        "webpage_url": "https://www.youtube.com/watch?v=eVnQFWGDEdY"
    }"#;

    const CAPTIONS: &str = r#"{"events": [
        {"tStartMs": 0, "dDurationMs": 5000, "segs": [{"utf8": "Welcome to the talk."}]},
        {"tStartMs": 62000, "dDurationMs": 5000, "segs": [{"utf8": "Now spacing."}]}
    ]}"#;

    fn all_tools() -> Capabilities {
        Capabilities {
            yt_dlp: true,
            ffmpeg: true,
            tesseract: true,
            easyocr: false,
            palette: false,
        }
    }

    fn write_numbered(pattern: &str, count: usize) {
        for i in 1..=count {
            std::fs::write(pattern.replace("%04d", &format!("{i:04}")), b"png").unwrap();
        }
    }

    /// Answers like a host where every tool works on a 95 second video.
    fn healthy(inv: &Invocation) -> std::result::Result<ProcessOutput, ProcessError> {
        match inv.program.as_str() {
            "yt-dlp" if inv.args.iter().any(|a| a == "--dump-json") => ok(METADATA),
            "yt-dlp" if inv.args.iter().any(|a| a == "--skip-download") => {
                let template = arg_after(inv, "-o").unwrap();
                std::fs::write(template.replace("%(ext)s", "en.json3"), CAPTIONS).unwrap();
                ok("")
            }
            "yt-dlp" => {
                let template = arg_after(inv, "-o").unwrap();
                std::fs::write(template.replace("%(ext)s", "mp4"), b"video").unwrap();
                ok("")
            }
            "ffmpeg" => {
                let pattern = inv.args.last().unwrap();
                if arg_after(inv, "-vf").unwrap().starts_with("fps=") {
                    write_numbered(pattern, 4);
                    ok_with_stderr("")
                } else {
                    write_numbered(pattern, 2);
                    ok_with_stderr(
                        "[Parsed_showinfo_1 @ 0x1] n:   0 pts: 1 pts_time:12.8\n\
                         [Parsed_showinfo_1 @ 0x1] n:   1 pts: 2 pts_time:61.5\n",
                    )
                }
            }
            "tesseract" => {
                if inv.args[0].ends_with("frame_0002.png") {
                    ok("TOKENS AND SPACING\nscale 4px")
                } else {
                    ok("")
                }
            }
            other => panic!("unexpected program {other}"),
        }
    }

    fn config_in(dir: &Path) -> ExtractConfig {
        ExtractConfig {
            output_dir: Some(dir.join("out")),
            ..ExtractConfig::default()
        }
    }

    fn locator() -> SourceLocator {
        SourceLocator::parse("https://youtu.be/eVnQFWGDEdY").unwrap()
    }

    fn listing(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn ninety_five_second_video_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(healthy));
        let mut config = config_in(dir.path());
        config.scene_detect = true;
        config.ocr = true;

        let (tx, mut rx) = crate::events::channel();
        let extractor = Extractor::new(runner.clone(), all_tools(), config).with_events(tx);
        let summary = extractor.run(&locator()).await.unwrap();
        drop(extractor);

        assert_eq!(summary.interval_frames, 4);
        assert_eq!(summary.scene_frames, 2);
        assert_eq!(summary.transcript_chunks, 2);
        assert_eq!(summary.ocr_frames_with_text, Some(1));
        assert_eq!(summary.palette_colors, None);

        let out = dir.path().join("out");
        let files = listing(&out);
        for expected in [
            "metadata.json",
            "ocr-results.json",
            "extracted-reference.md",
            "frames",
            "frames_scene",
        ] {
            assert!(files.contains(expected), "missing {expected}: {files:?}");
        }
        assert!(!files.contains("video.mp4"));

        let doc = std::fs::read_to_string(&summary.document_path).unwrap();
        assert!(doc.starts_with("# Design Systems in 95 Seconds"));
        for ts in ["0:00", "0:30", "1:00", "1:30"] {
            assert!(doc.contains(&format!("### Frame at `{ts}`")));
        }
        assert!(doc.contains("### Scene 2 at `1:01`"));
        assert!(doc.contains("| `0:30` | TOKENS AND SPACING |"));
        assert!(doc.contains("**[1:02]** Now spacing."));

        let ocr: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("ocr-results.json")).unwrap())
                .unwrap();
        assert_eq!(ocr.as_object().unwrap().len(), 6);

        let mut finished_stages = Vec::new();
        let mut last_progress = None;
        while let Some(ev) = rx.recv().await {
            match ev {
                PipelineEvent::StageFinished { stage, .. } => finished_stages.push(stage),
                PipelineEvent::RecognitionProgress { done, total } => {
                    last_progress = Some((done, total))
                }
                _ => {}
            }
        }
        assert_eq!(last_progress, Some((6, 6)));
        assert_eq!(
            finished_stages,
            vec![
                Stage::Metadata,
                Stage::Transcript,
                Stage::Acquisition,
                Stage::IntervalFrames,
                Stage::SceneFrames,
                Stage::Recognition,
            ]
        );
    }

    #[tokio::test]
    async fn ninety_five_seconds_interval_only() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(|inv| {
            if inv.args.iter().any(|a| a == "--skip-download") {
                let template = arg_after(inv, "-o").unwrap();
                std::fs::write(
                    template.replace("%(ext)s", "en.json3"),
                    r#"{"events": [
                        {"tStartMs": 0, "dDurationMs": 25000, "segs": [{"utf8": "Intro."}]},
                        {"tStartMs": 25000, "dDurationMs": 30000, "segs": [{"utf8": "Tokens."}]},
                        {"tStartMs": 70000, "dDurationMs": 25000, "segs": [{"utf8": "Wrap up."}]}
                    ]}"#,
                )
                .unwrap();
                ok("")
            } else {
                healthy(inv)
            }
        }));

        let summary = Extractor::new(runner.clone(), all_tools(), config_in(dir.path()))
            .run(&locator())
            .await
            .unwrap();

        assert_eq!(summary.interval_frames, 4);
        assert_eq!(summary.scene_frames, 0);
        assert_eq!(summary.transcript_chunks, 2);
        assert_eq!(runner.programs().iter().filter(|p| *p == "ffmpeg").count(), 1);

        let doc = std::fs::read_to_string(&summary.document_path).unwrap();
        assert!(doc.contains("## Description"));
        assert!(doc.contains("**[0:00]** Intro. Tokens."));
        assert!(doc.contains("**[1:10]** Wrap up."));
        assert_eq!(doc.matches("### Frame at").count(), 4);
        let index_rows = doc
            .lines()
            .filter(|l| l.starts_with("| `") && l.contains("frames/frame_"))
            .count();
        assert_eq!(index_rows, 4);
        for absent in ["## Color Palette", "## Visual Text Index", "## Scene Changes"] {
            assert!(!doc.contains(absent), "unexpected {absent}");
        }
    }

    #[tokio::test]
    async fn download_timeout_leaves_only_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(|inv| {
            if inv.args.iter().any(|a| a == "--dump-json") {
                ok(METADATA)
            } else if inv.args.iter().any(|a| a == "--skip-download") {
                exit(1, "ERROR: There are no subtitles")
            } else {
                timed_out(inv)
            }
        }));

        let err = Extractor::new(runner.clone(), all_tools(), config_in(dir.path()))
            .run(&locator())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExtractError::Timeout {
                stage: Stage::Acquisition,
                seconds: 600,
                ..
            }
        ));
        assert_eq!(
            listing(&dir.path().join("out")),
            BTreeSet::from(["metadata.json".to_string()])
        );
        assert!(!runner.programs().iter().any(|p| p == "ffmpeg"));
    }

    #[tokio::test]
    async fn explicit_engine_missing_fails_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(healthy));
        let mut config = config_in(dir.path());
        config.ocr = true;
        config.ocr_engine = OcrEngineKind::Tesseract;
        config.ocr_engine_explicit = true;
        let caps = Capabilities {
            tesseract: false,
            ..all_tools()
        };

        let err = Extractor::new(runner.clone(), caps, config)
            .run(&locator())
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::ToolMissing { ref tool, .. } if tool == "tesseract"));
        assert!(runner.programs().is_empty());
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn defaulted_engine_missing_drops_the_text_sections() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(healthy));
        let mut config = config_in(dir.path());
        config.ocr = true;
        let caps = Capabilities {
            tesseract: false,
            ..all_tools()
        };

        let summary = Extractor::new(runner.clone(), caps, config)
            .run(&locator())
            .await
            .unwrap();

        assert_eq!(summary.ocr_frames_with_text, None);
        assert_eq!(summary.interval_frames, 4);
        let doc = std::fs::read_to_string(&summary.document_path).unwrap();
        assert!(!doc.contains("## Visual Text Index"));
        assert!(doc.contains("## Frame Index"));
        assert!(!summary.work_dir.join("ocr-results.json").exists());
        assert!(!runner.programs().iter().any(|p| p == "tesseract"));
    }

    #[tokio::test]
    async fn transcript_only_never_touches_video() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(healthy).with_tools(&["yt-dlp"]));
        let mut config = config_in(dir.path());
        config.transcript_only = true;
        config.enable_full();
        let caps = Capabilities {
            ffmpeg: false,
            ..all_tools()
        };

        let summary = Extractor::new(runner.clone(), caps, config)
            .run(&locator())
            .await
            .unwrap();

        assert_eq!(summary.interval_frames + summary.scene_frames, 0);
        assert_eq!(summary.transcript_chunks, 2);
        assert_eq!(runner.programs(), vec!["yt-dlp", "yt-dlp"]);
        let doc = std::fs::read_to_string(&summary.document_path).unwrap();
        assert!(doc.contains("## Transcript"));
        assert!(!doc.contains("## Key Frames"));
    }

    #[tokio::test]
    async fn sampler_failure_still_removes_video_and_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(|inv| {
            if inv.program == "ffmpeg" {
                exit(1, "moov atom not found")
            } else {
                healthy(inv)
            }
        }));

        let summary = Extractor::new(runner, all_tools(), config_in(dir.path()))
            .run(&locator())
            .await
            .unwrap();

        assert_eq!(summary.interval_frames, 0);
        assert!(!summary.work_dir.join("video.mp4").exists());
        assert!(summary.document_path.exists());
    }

    #[tokio::test]
    async fn missing_transcript_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(|inv| {
            if inv.args.iter().any(|a| a == "--skip-download") {
                exit(1, "ERROR: Sign in to confirm your age")
            } else {
                healthy(inv)
            }
        }));

        let summary = Extractor::new(runner, all_tools(), config_in(dir.path()))
            .run(&locator())
            .await
            .unwrap();

        assert_eq!(summary.transcript_chunks, 0);
        let doc = std::fs::read_to_string(&summary.document_path).unwrap();
        assert!(!doc.contains("## Transcript"));
    }

    #[tokio::test]
    async fn metadata_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(|_| exit(1, "ERROR: Video unavailable")));

        let err = Extractor::new(runner.clone(), all_tools(), config_in(dir.path()))
            .run(&locator())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Metadata));
        assert_eq!(runner.programs().len(), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new(healthy));
        let mut config = config_in(dir.path());
        config.scene_threshold = 2.0;

        let err = Extractor::new(runner.clone(), all_tools(), config)
            .run(&locator())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig { .. }));
        assert!(runner.programs().is_empty());
    }
}
