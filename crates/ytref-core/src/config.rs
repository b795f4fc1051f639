use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

/// Text recognition engine choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    /// Tesseract CLI, one process per frame; runs in parallel.
    #[default]
    Tesseract,
    /// EasyOCR model loaded once; frames go through it one at a time.
    EasyOcr,
}

impl OcrEngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            OcrEngineKind::Tesseract => "tesseract",
            OcrEngineKind::EasyOcr => "easyocr",
        }
    }
}

/// Ceilings for each kind of external invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub metadata: Duration,
    pub transcript: Duration,
    pub download: Duration,
    pub frames: Duration,
    pub ocr_per_frame: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(120),
            transcript: Duration::from_secs(120),
            download: Duration::from_secs(600),
            frames: Duration::from_secs(600),
            ocr_per_frame: Duration::from_secs(60),
        }
    }
}

/// Knobs for the rendered markdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOptions {
    /// Characters of each transcript chunk shown in the preview list.
    pub preview_chars: usize,
    /// Characters of the first OCR line shown in the visual text index.
    pub index_preview_chars: usize,
    /// Recognized text must be longer than this to enter the text index.
    pub min_index_text: usize,
    /// Recognized text must be longer than this to be shown under a gallery frame.
    pub min_inline_text: usize,
    pub description_chars: usize,
    pub max_tags: usize,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            preview_chars: 200,
            index_preview_chars: 80,
            min_index_text: 10,
            min_inline_text: 5,
            description_chars: 3000,
            max_tags: 15,
        }
    }
}

/// Palette sampling and ranking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteOptions {
    pub sample_size: usize,
    pub colors_per_frame: usize,
    pub bucket: u8,
    pub dominant_colors: usize,
    pub raw_colors: usize,
    /// Pixel stride used while quantizing a frame.
    pub quality: usize,
}

impl Default for PaletteOptions {
    fn default() -> Self {
        Self {
            sample_size: 10,
            colors_per_frame: 6,
            bucket: 32,
            dominant_colors: 6,
            raw_colors: 24,
            quality: 5,
        }
    }
}

/// Everything a single extraction run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub output_dir: Option<PathBuf>,
    /// Seconds between interval frames.
    pub interval: u32,
    pub scene_detect: bool,
    /// Scene-change sensitivity, lower yields more frames.
    pub scene_threshold: f64,
    /// Skip download, sampling and analysis.
    pub transcript_only: bool,
    pub chunk_seconds: u32,
    pub ocr: bool,
    pub ocr_engine: OcrEngineKind,
    /// Whether the engine was picked by the caller rather than defaulted.
    pub ocr_engine_explicit: bool,
    pub ocr_workers: usize,
    pub colors: bool,
    /// Download quality ceiling in pixels of height.
    pub max_height: u32,
    pub transcript_lang: String,
    pub timeouts: Timeouts,
    pub palette: PaletteOptions,
    pub document: DocumentOptions,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            interval: 30,
            scene_detect: false,
            scene_threshold: 0.3,
            transcript_only: false,
            chunk_seconds: 60,
            ocr: false,
            ocr_engine: OcrEngineKind::default(),
            ocr_engine_explicit: false,
            ocr_workers: 4,
            colors: false,
            max_height: 720,
            transcript_lang: "en".to_string(),
            timeouts: Timeouts::default(),
            palette: PaletteOptions::default(),
            document: DocumentOptions::default(),
        }
    }
}

impl ExtractConfig {
    /// Turn on scene detection, OCR and palette extraction together.
    pub fn enable_full(&mut self) {
        self.scene_detect = true;
        self.ocr = true;
        self.colors = true;
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(invalid("interval must be at least 1 second"));
        }
        if !(0.0..=1.0).contains(&self.scene_threshold) {
            return Err(invalid(format!(
                "scene threshold must be within 0.0-1.0, got {}",
                self.scene_threshold
            )));
        }
        if self.chunk_seconds == 0 {
            return Err(invalid("chunk window must be at least 1 second"));
        }
        if self.ocr_workers == 0 {
            return Err(invalid("ocr workers must be at least 1"));
        }
        if self.palette.bucket == 0 {
            return Err(invalid("color bucket must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ExtractError {
    ExtractError::InvalidConfig {
        reason: reason.into(),
    }
}
