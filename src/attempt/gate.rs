//! Validation gates run after each agent iteration.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Result of one gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    /// Name of the gate that produced this outcome.
    pub gate: String,
    pub passed: bool,
    /// Combined output; fingerprinted on failure.
    pub output: String,
}

impl GateOutcome {
    #[must_use]
    pub fn pass(gate: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            passed: true,
            output: String::new(),
        }
    }

    #[must_use]
    pub fn fail(gate: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            passed: false,
            output: output.into(),
        }
    }
}

/// A pass/fail check over a working directory.
#[async_trait]
pub trait ValidationGate: Send + Sync {
    fn name(&self) -> &str;

    /// Run the check. Failures to run the check are failed outcomes.
    async fn check(&self, dir: &Path) -> GateOutcome;
}

/// Gate backed by a shell command; exit status 0 passes.
#[derive(Debug, Clone)]
pub struct CommandGate {
    name: String,
    command: String,
}

impl CommandGate {
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl ValidationGate for CommandGate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, dir: &Path) -> GateOutcome {
        debug!(gate = %self.name, command = %self.command, "Running gate");
        let output = Command::new("sh")
            .args(["-c", &self.command])
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                GateOutcome {
                    gate: self.name.clone(),
                    passed: output.status.success(),
                    output: text,
                }
            }
            Err(e) => GateOutcome::fail(&self.name, format!("failed to run gate: {e}")),
        }
    }
}
