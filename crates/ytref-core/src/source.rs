use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::error::{ExtractError, Result};

static URL_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?:v=|/v/|youtu\.be/)([a-zA-Z0-9_-]{11})").expect("valid regex"),
        Regex::new(r"(?:embed/)([a-zA-Z0-9_-]{11})").expect("valid regex"),
        Regex::new(r"(?:shorts/)([a-zA-Z0-9_-]{11})").expect("valid regex"),
    ]
});

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("valid regex"));

/// 11-character YouTube video id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the user pointed us at: the raw locator handed to yt-dlp plus its parsed id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    pub raw: String,
    pub video_id: VideoId,
}

impl SourceLocator {
    /// Accepts watch/short/embed/youtu.be URLs or a bare id.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        for pattern in URL_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(raw) {
                return Ok(Self {
                    raw: raw.to_string(),
                    video_id: VideoId(caps[1].to_string()),
                });
            }
        }
        if BARE_ID.is_match(raw) {
            return Ok(Self {
                raw: raw.to_string(),
                video_id: VideoId(raw.to_string()),
            });
        }
        Err(ExtractError::InvalidInput {
            input: input.to_string(),
        })
    }
}
