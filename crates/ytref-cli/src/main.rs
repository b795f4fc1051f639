use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use ytref_core::{
    Capabilities, EventReceiver, ExtractConfig, Extractor, OcrEngineKind, PipelineEvent,
    RunSummary, SourceLocator, Stage, SystemRunner, events,
};

/// CLI wrapper for OcrEngineKind (needed for clap ValueEnum)
#[derive(Clone, Copy, ValueEnum)]
enum CliEngine {
    Tesseract,
    Easyocr,
}

impl From<CliEngine> for OcrEngineKind {
    fn from(cli: CliEngine) -> Self {
        match cli {
            CliEngine::Tesseract => OcrEngineKind::Tesseract,
            CliEngine::Easyocr => OcrEngineKind::EasyOcr,
        }
    }
}

#[derive(Parser)]
#[command(name = "ytref", version)]
#[command(
    about = "Turn a YouTube video into a markdown reference: transcript, key frames, on-screen text and color palette"
)]
struct Cli {
    /// Video URL or 11-character video id
    url: String,

    /// Output directory (default: ./yt-extract-<video id>)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Seconds between interval frames
    #[arg(long, default_value_t = 30)]
    interval: u32,

    /// Also capture a frame at every scene change
    #[arg(long)]
    scene_detect: bool,

    /// Scene-change sensitivity, 0.0-1.0 (lower captures more frames)
    #[arg(long, default_value_t = 0.3)]
    scene_threshold: f64,

    /// Only fetch metadata and transcript; no download, no frames
    #[arg(long)]
    transcript_only: bool,

    /// Seconds of transcript grouped under one timestamp
    #[arg(long, default_value_t = 60)]
    chunk_seconds: u32,

    /// Run OCR on every captured frame
    #[arg(long)]
    ocr: bool,

    /// OCR engine; naming one makes it required and implies --ocr
    #[arg(long)]
    ocr_engine: Option<CliEngine>,

    /// Parallel OCR workers (tesseract only)
    #[arg(long, default_value_t = 4)]
    ocr_workers: usize,

    /// Extract a color palette from sampled frames
    #[arg(long)]
    colors: bool,

    /// Enable everything: --scene-detect --ocr --colors
    #[arg(long)]
    full: bool,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> ExtractConfig {
        let mut config = ExtractConfig {
            output_dir: self.output_dir.clone(),
            interval: self.interval,
            scene_detect: self.scene_detect,
            scene_threshold: self.scene_threshold,
            transcript_only: self.transcript_only,
            chunk_seconds: self.chunk_seconds,
            ocr: self.ocr,
            ocr_workers: self.ocr_workers,
            colors: self.colors,
            ..ExtractConfig::default()
        };
        if let Some(engine) = self.ocr_engine {
            config.ocr = true;
            config.ocr_engine = engine.into();
            config.ocr_engine_explicit = true;
        }
        if self.full {
            config.enable_full();
        }
        config
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn create_progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} Reading text [{bar:30.cyan/blue}] {pos}/{len} frames")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn running_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Preflight => "Checking tools",
        Stage::Metadata => "Fetching metadata",
        Stage::Transcript => "Fetching transcript",
        Stage::Acquisition => "Downloading video",
        Stage::IntervalFrames => "Capturing interval frames",
        Stage::SceneFrames => "Detecting scene changes",
        Stage::Recognition => "Running OCR",
        Stage::Palette => "Extracting color palette",
        Stage::Assembly => "Writing reference document",
    }
}

fn done_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Preflight => "Tools",
        Stage::Metadata => "Metadata",
        Stage::Transcript => "Transcript",
        Stage::Acquisition => "Downloaded",
        Stage::IntervalFrames => "Interval frames",
        Stage::SceneFrames => "Scene frames",
        Stage::Recognition => "OCR",
        Stage::Palette => "Palette",
        Stage::Assembly => "Document",
    }
}

/// Render pipeline events until the extractor hangs up.
async fn report_progress(mut rx: EventReceiver) {
    let mut spinner: Option<ProgressBar> = None;
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StageStarted { stage } => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
                spinner = Some(create_spinner(&format!("{}...", running_label(stage))));
            }
            PipelineEvent::StageFinished { stage, detail } => {
                let line = format!(
                    "{} {}: {}",
                    style("✓").green().bold(),
                    done_label(stage),
                    style(detail).dim()
                );
                match spinner.take() {
                    Some(pb) => pb.finish_with_message(line),
                    None => println!("{}", line),
                }
            }
            PipelineEvent::StageSkipped { stage, reason } => {
                let line = format!(
                    "{} {} {}",
                    style("–").yellow().bold(),
                    done_label(stage),
                    style(format!("(skipped: {})", reason)).dim()
                );
                match spinner.take() {
                    Some(pb) => pb.finish_with_message(line),
                    None => println!("{}", line),
                }
            }
            PipelineEvent::RecognitionProgress { done, total } => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
                let pb = bar.get_or_insert_with(|| create_progress_bar(total));
                pb.set_position(done as u64);
                if done >= total {
                    pb.finish_and_clear();
                    bar = None;
                }
            }
            PipelineEvent::DocumentWritten { path } => {
                let line = format!(
                    "{} Document: {}",
                    style("✓").green().bold(),
                    style(path.display()).dim()
                );
                match spinner.take() {
                    Some(pb) => pb.finish_with_message(line),
                    None => println!("{}", line),
                }
            }
        }
    }

    for pb in spinner.into_iter().chain(bar) {
        pb.finish_and_clear();
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "\n{} {}\n",
        style("Saved:").dim(),
        style(summary.document_path.display()).cyan()
    );
    println!("{}", style("─".repeat(60)).dim());
    println!("  {:<11} {}", "Title", summary.title);
    println!(
        "  {:<11} {}",
        "Metadata",
        style(summary.metadata_path.display()).dim()
    );
    println!("  {:<11} {} chunks", "Transcript", summary.transcript_chunks);
    println!(
        "  {:<11} {} interval, {} scene",
        "Frames", summary.interval_frames, summary.scene_frames
    );
    if let Some(with_text) = summary.ocr_frames_with_text {
        println!(
            "  {:<11} {} frames with text → ocr-results.json",
            "OCR", with_text
        );
    }
    if let Some(colors) = summary.palette_colors {
        println!(
            "  {:<11} {} colors → color-palette.json",
            "Palette", colors
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Bad input fails before any tool is probed or spawned.
    let locator = SourceLocator::parse(&cli.url)?;
    let config = cli.config();
    config.validate()?;

    println!(
        "\n{}  {}\n",
        style("ytref").cyan().bold(),
        style("Video Reference Extractor").dim()
    );

    let runner = Arc::new(SystemRunner);
    let capabilities = Capabilities::probe(runner.as_ref()).await;

    let (tx, rx) = events::channel();
    let reporter = tokio::spawn(report_progress(rx));

    // The extractor owns the only sender; dropping it lets the reporter drain and exit.
    let result = Extractor::new(runner, capabilities, config)
        .with_events(tx)
        .run(&locator)
        .await;
    let _ = reporter.await;

    let summary = result?;
    print_summary(&summary);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
