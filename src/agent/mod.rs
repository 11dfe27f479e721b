//! Agent adapters.
//!
//! An agent is a black-box process: it receives a task prompt, works inside a
//! directory, and exits. Only the exit status is interpreted; stdout and
//! stderr are kept as diagnostics.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, WavesError};

/// Environment variable carrying newline-separated file hints.
pub const FILE_HINTS_ENV: &str = "RALPH_WAVES_FILES";

/// Maximum diagnostic length attached to reports.
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Captured result of one agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl AgentOutput {
    /// A successful run with no output.
    #[must_use]
    pub fn success() -> Self {
        Self::with_exit_code(0)
    }

    #[must_use]
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// The tail of stderr (or stdout when stderr is empty).
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail_chars(source.trim(), MAX_DIAGNOSTIC_CHARS)
    }
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        text.to_string()
    } else {
        text.chars().skip(count - max).collect()
    }
}

/// Runs an agent against a working directory.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Run the agent to completion.
    ///
    /// # Errors
    ///
    /// Returns [`WavesError::AgentExecution`] when the process cannot be run
    /// at all. A process that runs and exits non-zero is an `Ok` output.
    async fn run(&self, prompt: &str, working_dir: &Path, file_hints: &[String]) -> Result<AgentOutput>;
}

/// Agent backed by an external command.
///
/// The prompt is written to stdin; file hints are exported through
/// [`FILE_HINTS_ENV`]. The child is killed if the run future is dropped.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
}

impl CommandAgent {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl AgentAdapter for CommandAgent {
    async fn run(&self, prompt: &str, working_dir: &Path, file_hints: &[String]) -> Result<AgentOutput> {
        debug!(program = %self.program, dir = %working_dir.display(), "Running agent");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(working_dir)
            .env(FILE_HINTS_ENV, file_hints.join("\n"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WavesError::agent(None, format!("failed to spawn {}: {e}", self.program)))?;

        // Stdin is fed while stdout/stderr drain, or a full pipe deadlocks both sides
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok::<(), std::io::Error>(());
            };
            match stdin.write_all(prompt.as_bytes()).await {
                // An agent that ignores stdin may exit before reading it
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                result => result,
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output =
            output.map_err(|e| WavesError::agent(None, format!("failed to wait for {}: {e}", self.program)))?;
        fed.map_err(|e| WavesError::agent(None, format!("failed to write prompt: {e}")))?;

        Ok(AgentOutput {
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
