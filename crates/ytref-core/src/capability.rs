use tracing::{debug, warn};

use crate::{
    config::{ExtractConfig, OcrEngineKind},
    error::{ExtractError, Result},
    process::{Invocation, ProcessRunner, install_hint},
    recognize::{EASYOCR, IMPORT_PROBE, TESSERACT},
};

pub const YT_DLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";
pub const PYTHON: &str = "python3";

/// What this host can do, probed once before the pipeline starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub yt_dlp: bool,
    pub ffmpeg: bool,
    pub tesseract: bool,
    pub easyocr: bool,
    /// Palette extraction compiled in.
    pub palette: bool,
}

impl Capabilities {
    pub async fn probe(runner: &dyn ProcessRunner) -> Self {
        let easyocr = runner.is_available(PYTHON).await && probe_easyocr(runner).await;
        let caps = Self {
            yt_dlp: runner.is_available(YT_DLP).await,
            ffmpeg: runner.is_available(FFMPEG).await,
            tesseract: runner.is_available(TESSERACT).await,
            easyocr,
            palette: cfg!(feature = "palette"),
        };
        debug!(?caps, "capabilities probed");
        caps
    }

    pub fn has_engine(&self, engine: OcrEngineKind) -> bool {
        match engine {
            OcrEngineKind::Tesseract => self.tesseract,
            OcrEngineKind::EasyOcr => self.easyocr,
        }
    }

    /// Fail when a tool the configured run cannot do without is absent.
    pub fn check_required(&self, config: &ExtractConfig) -> Result<()> {
        if !self.yt_dlp {
            return Err(missing(YT_DLP));
        }
        if !config.transcript_only && !self.ffmpeg {
            return Err(missing(FFMPEG));
        }
        Ok(())
    }

    /// Engine that will run, if any.
    ///
    /// An engine the caller asked for by name must be present. A defaulted engine that is
    /// absent only disables recognition for this run.
    pub fn resolve_engine(&self, config: &ExtractConfig) -> Result<Option<OcrEngineKind>> {
        if !config.ocr || config.transcript_only {
            return Ok(None);
        }
        let engine = config.ocr_engine;
        if self.has_engine(engine) {
            return Ok(Some(engine));
        }
        if config.ocr_engine_explicit {
            return Err(missing_engine(engine));
        }
        warn!(
            engine = engine.name(),
            "OCR engine not available; skipping text recognition"
        );
        Ok(None)
    }
}

async fn probe_easyocr(runner: &dyn ProcessRunner) -> bool {
    let inv = Invocation::new(PYTHON, std::time::Duration::from_secs(60)).args(["-c", IMPORT_PROBE]);
    matches!(runner.run(&inv).await, Ok(out) if out.success())
}

fn missing(tool: &str) -> ExtractError {
    ExtractError::ToolMissing {
        tool: tool.to_string(),
        hint: install_hint(tool).to_string(),
    }
}

fn missing_engine(engine: OcrEngineKind) -> ExtractError {
    match engine {
        OcrEngineKind::Tesseract => missing(TESSERACT),
        OcrEngineKind::EasyOcr => ExtractError::ToolMissing {
            tool: EASYOCR.to_string(),
            hint: install_hint(PYTHON).to_string(),
        },
    }
}
