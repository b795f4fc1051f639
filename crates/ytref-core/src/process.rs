//! Process-execution seam used by every stage that shells out.
//!
//! Stages describe what to run as an [`Invocation`]; a [`ProcessRunner`] executes it. The
//! production runner is [`SystemRunner`] on top of `tokio::process`; tests swap in a scripted
//! runner so no external binary is needed.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExtractError, Stage, truncate_diagnostic};

/// One external command: program, argument list, working directory and hard ceiling.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        for a in args {
            self.args.push(a.as_ref().to_string_lossy().into_owned());
        }
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{program} not found")]
    NotFound { program: String },

    #[error("{program} timed out after {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("{program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Attribute a runner failure to a pipeline stage.
    pub fn into_stage_error(self, stage: Stage) -> ExtractError {
        match self {
            ProcessError::NotFound { program } => ExtractError::ToolMissing {
                hint: install_hint(&program).to_string(),
                tool: program,
            },
            ProcessError::TimedOut { program, after } => ExtractError::Timeout {
                stage,
                tool: program,
                seconds: after.as_secs(),
            },
            ProcessError::Io { program, source } => ExtractError::ExternalToolFailure {
                stage,
                tool: program,
                code: None,
                diagnostic: truncate_diagnostic(&source.to_string()),
            },
        }
    }
}

/// Build the stage error for a process that exited unsuccessfully.
pub fn failure(stage: Stage, program: &str, output: &ProcessOutput) -> ExtractError {
    let raw = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    ExtractError::ExternalToolFailure {
        stage,
        tool: program.to_string(),
        code: output.exit_code,
        diagnostic: truncate_diagnostic(raw),
    }
}

pub fn install_hint(program: &str) -> &'static str {
    match program {
        "yt-dlp" => "Install with: pip install yt-dlp",
        "ffmpeg" => "Install with: apt install ffmpeg (or: brew install ffmpeg)",
        "tesseract" => "Install with: apt install tesseract-ocr (or: brew install tesseract)",
        "python3" => "Install Python 3 and run: pip install easyocr",
        _ => "Install it and make sure it is on PATH.",
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;

    /// Whether `program` can be launched at all.
    async fn is_available(&self, program: &str) -> bool;
}

/// Runs commands on the host through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        debug!(program = %invocation.program, args = ?invocation.args, "spawning");

        let child = cmd.spawn().map_err(|e| spawn_error(&invocation.program, e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::TimedOut {
                program: invocation.program.clone(),
                after: invocation.timeout,
            })?
            .map_err(|source| ProcessError::Io {
                program: invocation.program.clone(),
                source,
            })?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn is_available(&self, program: &str) -> bool {
        let probe = Command::new("which")
            .arg(program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match probe {
            Ok(status) => status.success(),
            // No `which` on this host: fall back to launching the tool itself.
            Err(_) => Command::new(program)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .is_ok(),
        }
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> ProcessError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProcessError::NotFound {
            program: program.to_string(),
        }
    } else {
        ProcessError::Io {
            program: program.to_string(),
            source: e,
        }
    }
}
