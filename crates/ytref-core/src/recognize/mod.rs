//! Text recognition over sampled frames.
//!
//! Engines declare how they may be scheduled through [`Concurrency`]; [`recognize_frames`]
//! reads that declaration and either fans frames out over a bounded worker pool or feeds
//! them one at a time. Either way the result holds exactly one entry per input frame, in
//! input order.

mod easyocr;
mod tesseract;

pub use easyocr::{EASYOCR, EasyOcrEngine, IMPORT_PROBE};
pub use tesseract::{TESSERACT, TesseractEngine};

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Serialize, Serializer, ser::SerializeMap};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::{
    error::Result,
    events::{EventSender, PipelineEvent, emit},
    frames::Frame,
};

/// How an engine may be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Independent calls; up to `max_workers` may run at once.
    Parallel { max_workers: usize },
    /// One shared, non-reentrant instance; calls must be strictly sequential.
    Exclusive,
}

#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn concurrency(&self) -> Concurrency;

    /// Text found in one frame; empty when there is none.
    async fn recognize(&self, frame: &Frame) -> Result<String>;
}

/// Frame path to recognized text, iterated in the order frames were submitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizedText {
    entries: Vec<(PathBuf, String)>,
    positions: HashMap<PathBuf, usize>,
}

impl RecognizedText {
    pub(crate) fn from_ordered(pairs: impl IntoIterator<Item = (PathBuf, String)>) -> Self {
        let mut out = Self::default();
        for (path, text) in pairs {
            if out.positions.contains_key(&path) {
                continue;
            }
            out.positions.insert(path.clone(), out.entries.len());
            out.entries.push((path, text));
        }
        out
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.positions
            .get(path)
            .map(|&i| self.entries[i].1.as_str())
    }

    /// Text for `frame`, or empty when the frame was never analyzed.
    pub fn text_for(&self, frame: &Frame) -> &str {
        self.get(&frame.path).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.entries.iter().map(|(p, t)| (p.as_path(), t.as_str()))
    }

    /// Number of frames whose trimmed text is longer than `min_chars`.
    pub fn frames_with_text(&self, min_chars: usize) -> usize {
        self.entries
            .iter()
            .filter(|(_, t)| t.trim().chars().count() > min_chars)
            .count()
    }
}

impl Serialize for RecognizedText {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, text) in &self.entries {
            map.serialize_entry(&path.to_string_lossy(), text)?;
        }
        map.end()
    }
}

/// Run `engine` over every frame. Per-frame failures become empty text.
pub async fn recognize_frames(
    engine: Arc<dyn RecognitionEngine>,
    frames: &[Frame],
    events: Option<&EventSender>,
) -> RecognizedText {
    if frames.is_empty() {
        return RecognizedText::default();
    }

    let total = frames.len();
    info!(engine = engine.name(), frames = total, "running text recognition");

    let texts = match engine.concurrency() {
        Concurrency::Parallel { max_workers } => {
            run_pool(engine, frames, max_workers.max(1), events).await
        }
        Concurrency::Exclusive => run_sequential(engine.as_ref(), frames, events).await,
    };

    let result = RecognizedText::from_ordered(
        frames
            .iter()
            .map(|f| f.path.clone())
            .zip(texts.into_iter().map(Option::unwrap_or_default)),
    );

    info!(
        with_text = result.frames_with_text(10),
        total, "text recognition finished"
    );
    result
}

async fn run_pool(
    engine: Arc<dyn RecognitionEngine>,
    frames: &[Frame],
    max_workers: usize,
    events: Option<&EventSender>,
) -> Vec<Option<String>> {
    let total = frames.len();
    let permits = Arc::new(Semaphore::new(max_workers));
    let mut set = JoinSet::new();

    for (i, frame) in frames.iter().cloned().enumerate() {
        let engine = Arc::clone(&engine);
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let text = engine.recognize(&frame).await;
            (i, degrade(text, &frame))
        });
    }

    let mut texts: Vec<Option<String>> = vec![None; total];
    let mut done = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, text)) => texts[i] = Some(text),
            // Index is lost with the task; the slot stays empty and is filled with "" later.
            Err(e) => warn!(error = %e, "recognition task aborted"),
        }
        done += 1;
        emit(events, PipelineEvent::RecognitionProgress { done, total });
    }
    texts
}

async fn run_sequential(
    engine: &dyn RecognitionEngine,
    frames: &[Frame],
    events: Option<&EventSender>,
) -> Vec<Option<String>> {
    let total = frames.len();
    let mut texts = Vec::with_capacity(total);
    for (i, frame) in frames.iter().enumerate() {
        let text = engine.recognize(frame).await;
        texts.push(Some(degrade(text, frame)));
        emit(
            events,
            PipelineEvent::RecognitionProgress { done: i + 1, total },
        );
    }
    texts
}

fn degrade(result: Result<String>, frame: &Frame) -> String {
    match result {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(frame = %frame.path.display(), error = %e, "OCR failed for frame");
            String::new()
        }
    }
}
