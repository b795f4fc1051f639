use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Longest slice of a tool's stderr carried inside an error.
pub const MAX_DIAGNOSTIC_CHARS: usize = 500;

/// Pipeline phase an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preflight,
    Metadata,
    Transcript,
    Acquisition,
    IntervalFrames,
    SceneFrames,
    Recognition,
    Palette,
    Assembly,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Metadata => "metadata",
            Stage::Transcript => "transcript",
            Stage::Acquisition => "acquisition",
            Stage::IntervalFrames => "interval frames",
            Stage::SceneFrames => "scene frames",
            Stage::Recognition => "text recognition",
            Stage::Palette => "palette",
            Stage::Assembly => "assembly",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid source locator '{input}': expected a YouTube URL or an 11-character video id")]
    InvalidInput { input: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Required tool '{tool}' not found in PATH. {hint}")]
    ToolMissing { tool: String, hint: String },

    #[error("[{stage}] {tool} timed out after {seconds}s")]
    Timeout {
        stage: Stage,
        tool: String,
        seconds: u64,
    },

    #[error("[{stage}] {tool} failed (exit code {}): {diagnostic}", .code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    ExternalToolFailure {
        stage: Stage,
        tool: String,
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("[{stage}] {tool} reported success but no file matching '{pattern}' exists in {}", .dir.display())]
    ArtifactNotFound {
        stage: Stage,
        tool: String,
        dir: PathBuf,
        pattern: String,
    },

    #[error("[{stage}] unexpected output from {tool}: {reason}")]
    InvalidToolOutput {
        stage: Stage,
        tool: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ExtractError {
    /// Stage the failure belongs to, when it is stage-scoped.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ExtractError::Timeout { stage, .. }
            | ExtractError::ExternalToolFailure { stage, .. }
            | ExtractError::ArtifactNotFound { stage, .. }
            | ExtractError::InvalidToolOutput { stage, .. } => Some(*stage),
            ExtractError::InvalidInput { .. }
            | ExtractError::InvalidConfig { .. }
            | ExtractError::ToolMissing { .. } => Some(Stage::Preflight),
            ExtractError::IoError(_) | ExtractError::JsonError(_) => None,
        }
    }
}

/// Cut a tool's raw diagnostic output down to [`MAX_DIAGNOSTIC_CHARS`].
pub fn truncate_diagnostic(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(MAX_DIAGNOSTIC_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
