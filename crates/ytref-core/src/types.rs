use serde::{Deserialize, Serialize};

/// Facts about the source video, as reported by yt-dlp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub channel: String,
    pub duration_seconds: f64,
    pub description: String,
    /// Sorted by `start_time`.
    pub chapters: Vec<Chapter>,
    pub tags: Vec<String>,
    pub webpage_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub start_time: f64,
    pub title: String,
}

/// One timed caption unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

/// Consecutive caption units coalesced into one time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub start: f64,
    pub text: String,
}
