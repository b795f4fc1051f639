use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    error::{Result, Stage},
    frames::Frame,
    process::{Invocation, ProcessRunner, failure},
    recognize::{Concurrency, RecognitionEngine},
};

pub const TESSERACT: &str = "tesseract";

/// Tesseract CLI. Every frame is its own process, so frames can run side by side.
pub struct TesseractEngine {
    runner: Arc<dyn ProcessRunner>,
    workers: usize,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(runner: Arc<dyn ProcessRunner>, workers: usize, timeout: Duration) -> Self {
        Self {
            runner,
            workers,
            timeout,
        }
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        TESSERACT
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Parallel {
            max_workers: self.workers,
        }
    }

    async fn recognize(&self, frame: &Frame) -> Result<String> {
        // psm 6: assume a single uniform block of text, which suits slides and overlays.
        let inv = Invocation::new(TESSERACT, self.timeout)
            .arg(&frame.path)
            .args(["stdout", "--psm", "6"]);

        let output = self
            .runner
            .run(&inv)
            .await
            .map_err(|e| e.into_stage_error(Stage::Recognition))?;

        if !output.success() {
            return Err(failure(Stage::Recognition, TESSERACT, &output));
        }
        Ok(output.stdout.trim().to_string())
    }
}
