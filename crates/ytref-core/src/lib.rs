//! ytref Core Library
//!
//! Turns a YouTube video into a cross-referenced markdown document: metadata and captions
//! from yt-dlp, still frames from ffmpeg, optional OCR and color palette, all merged by a
//! deterministic assembler.

pub mod acquire;
pub mod capability;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod frames;
pub mod metadata;
pub mod palette;
pub mod pipeline;
pub mod process;
pub mod recognize;
pub mod source;
pub mod transcript;
pub mod types;
pub mod workdir;

// Re-export commonly used items at crate root
pub use capability::Capabilities;
pub use config::{DocumentOptions, ExtractConfig, OcrEngineKind, PaletteOptions, Timeouts};
pub use document::{DocumentInputs, fmt_timestamp, render_document, write_document};
pub use error::{ExtractError, Result, Stage};
pub use events::{EventReceiver, EventSender, PipelineEvent};
pub use frames::{Frame, FrameOrigin};
pub use palette::{ColorPalette, Rgb};
pub use pipeline::{Extractor, RunSummary};
pub use process::{Invocation, ProcessError, ProcessOutput, ProcessRunner, SystemRunner};
pub use recognize::{Concurrency, RecognitionEngine, RecognizedText};
pub use source::{SourceLocator, VideoId};
pub use types::{Chapter, TranscriptChunk, TranscriptEntry, VideoMetadata};
pub use workdir::get_work_dir;
