use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::{
    error::{ExtractError, Result, Stage, truncate_diagnostic},
    frames::Frame,
    recognize::{Concurrency, RecognitionEngine},
};

pub const EASYOCR: &str = "easyocr";

/// Python helper: loads the reader once, then answers one JSON line per request.
const HELPER: &str = r#"
import json, sys
import easyocr
langs = sys.argv[1].split(",")
reader = easyocr.Reader(langs, gpu=False, verbose=False)
print(json.dumps({"ready": True}), flush=True)
for line in sys.stdin:
    try:
        req = json.loads(line)
        out = reader.readtext(req["path"], detail=0)
        print(json.dumps({"text": "\n".join(out)}), flush=True)
    except Exception as e:
        print(json.dumps({"error": str(e)}), flush=True)
"#;

/// Snippet used to probe whether the Python module is importable.
pub const IMPORT_PROBE: &str = "import easyocr";

#[derive(Debug, Serialize)]
struct Request<'a> {
    path: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct Reply {
    #[serde(default)]
    ready: bool,
    text: Option<String>,
    error: Option<String>,
}

/// A running helper process holding the loaded model.
struct Session {
    // Held so the helper is killed when the session is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Session {
    async fn start(python: &str, languages: &[String], load_timeout: Duration) -> Result<Self> {
        info!("initializing EasyOCR (this may take a moment)");
        let mut child = Command::new(python)
            .arg("-c")
            .arg(HELPER)
            .arg(languages.join(","))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::ToolMissing {
                        tool: python.to_string(),
                        hint: crate::process::install_hint("python3").to_string(),
                    }
                } else {
                    helper_failure(e.to_string())
                }
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(helper_failure("helper pipes unavailable".to_string()));
        };
        let mut session = Session {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let reply = session.read_reply(load_timeout).await?;
        if !reply.ready {
            return Err(helper_failure(
                reply.error.unwrap_or_else(|| "helper did not report ready".to_string()),
            ));
        }
        debug!("EasyOCR helper ready");
        Ok(session)
    }

    /// Outer error: the session is unusable. Inner error: the helper rejected this frame.
    async fn request(
        &mut self,
        frame: &Frame,
        timeout: Duration,
    ) -> Result<std::result::Result<String, String>> {
        let path = frame.path.to_string_lossy();
        let mut line = serde_json::to_string(&Request { path: &path })?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self.read_reply(timeout).await?;
        Ok(match (reply.text, reply.error) {
            (Some(text), _) => Ok(text),
            (None, Some(err)) => Err(err),
            (None, None) => Err("empty reply".to_string()),
        })
    }

    async fn read_reply(&mut self, timeout: Duration) -> Result<Reply> {
        let line = tokio::time::timeout(timeout, self.stdout.next_line())
            .await
            .map_err(|_| ExtractError::Timeout {
                stage: Stage::Recognition,
                tool: EASYOCR.to_string(),
                seconds: timeout.as_secs(),
            })??;
        let Some(line) = line else {
            return Err(helper_failure("helper exited".to_string()));
        };
        parse_reply(&line)
    }
}

fn parse_reply(line: &str) -> Result<Reply> {
    serde_json::from_str(line).map_err(|e| ExtractError::InvalidToolOutput {
        stage: Stage::Recognition,
        tool: EASYOCR.to_string(),
        reason: format!("{e}: {}", truncate_diagnostic(line)),
    })
}

fn helper_failure(diagnostic: String) -> ExtractError {
    ExtractError::ExternalToolFailure {
        stage: Stage::Recognition,
        tool: EASYOCR.to_string(),
        code: None,
        diagnostic: truncate_diagnostic(&diagnostic),
    }
}

/// Lifecycle of the helper behind the engine.
enum Slot {
    Idle,
    Ready(Session),
    /// The model never loaded; holds the reason so later frames fail without respawning.
    Failed(String),
}

/// EasyOCR through one long-lived Python helper. The model is loaded on first use and
/// reused for every frame; the helper cannot serve two requests at once.
pub struct EasyOcrEngine {
    python: String,
    languages: Vec<String>,
    timeout: Duration,
    load_timeout: Duration,
    slot: Mutex<Slot>,
}

impl EasyOcrEngine {
    pub fn new(python: &str, timeout: Duration) -> Self {
        Self {
            python: python.to_string(),
            languages: vec!["en".to_string()],
            timeout,
            load_timeout: Duration::from_secs(300),
            slot: Mutex::new(Slot::Idle),
        }
    }

    #[cfg(test)]
    fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }
}

#[async_trait]
impl RecognitionEngine for EasyOcrEngine {
    fn name(&self) -> &'static str {
        EASYOCR
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Exclusive
    }

    async fn recognize(&self, frame: &Frame) -> Result<String> {
        let mut slot = self.slot.lock().await;
        let mut session = match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Ready(session) => session,
            Slot::Failed(reason) => {
                *slot = Slot::Failed(reason.clone());
                return Err(helper_failure(format!("model unavailable: {reason}")));
            }
            Slot::Idle => {
                match Session::start(&self.python, &self.languages, self.load_timeout).await {
                    Ok(session) => session,
                    Err(e) => {
                        warn!(error = %e, "EasyOCR failed to load; remaining frames get no text");
                        *slot = Slot::Failed(e.to_string());
                        return Err(e);
                    }
                }
            }
        };

        // A ready session that timed out or broke may be mid-reply; it is dropped here and
        // the next frame starts a fresh one.
        let reply = session.request(frame, self.timeout).await?;
        *slot = Slot::Ready(session);
        reply.map_err(helper_failure)
    }
}
