use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::Stage;

/// Progress notifications a front end can render. Sending never blocks the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted { stage: Stage },
    StageFinished { stage: Stage, detail: String },
    StageSkipped { stage: Stage, reason: String },
    /// One more frame went through text recognition.
    RecognitionProgress { done: usize, total: usize },
    DocumentWritten { path: PathBuf },
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Fire and forget; a dropped receiver just means nobody is watching.
pub fn emit(sender: Option<&EventSender>, event: PipelineEvent) {
    if let Some(tx) = sender {
        let _ = tx.send(event);
    }
}
