//! Custom error types for ralph-waves.
//!
//! Errors fall into three groups: plan validation errors that abort a run
//! before any task starts, task-scoped errors that end up as quarantine
//! entries in a run report, and infrastructure errors (config, I/O, state).

use std::path::PathBuf;
use thiserror::Error;

use crate::git::GitOperationError;

/// Main error type for ralph-waves operations
#[derive(Error, Debug)]
pub enum WavesError {
    // =========================================================================
    // Plan Validation Errors
    // =========================================================================
    /// Malformed plan text
    #[error("Plan parse error at line {line}: {message}")]
    PlanParse { line: usize, message: String },

    /// A task depends on an id that is not in the plan
    #[error("Task {task_id} depends on unknown task {missing_id}")]
    UnresolvedDependency { task_id: u32, missing_id: u32 },

    /// The dependency graph contains a cycle
    #[error("Dependency cycle between tasks {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<u32> },

    // =========================================================================
    // Task Execution Errors
    // =========================================================================
    /// Git command failed
    #[error(transparent)]
    Git(#[from] GitOperationError),

    /// Agent process exited non-zero or could not be run
    #[error("Agent failed{}: {message}", format_exit(.exit_code))]
    AgentExecution {
        exit_code: Option<i32>,
        message: String,
    },

    /// Squash merge of a task branch conflicted
    #[error("Merge conflict integrating {branch} ({} file(s))", .files.len())]
    MergeConflict { branch: String, files: Vec<String> },

    // =========================================================================
    // Configuration / State Errors
    // =========================================================================
    /// Failed to load or validate configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Another attempt loop holds the state lock
    #[error("Attempt state is locked by another process: {path}")]
    StateLocked { path: PathBuf },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_cycle(cycle: &[u32]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

fn format_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => String::new(),
    }
}

impl WavesError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a plan parse error
    pub fn plan_parse(line: usize, message: impl Into<String>) -> Self {
        Self::PlanParse {
            line,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an agent execution error
    pub fn agent(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self::AgentExecution {
            exit_code,
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Plan errors that must stop a run before any task executes
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::PlanParse { .. } | Self::UnresolvedDependency { .. } | Self::CyclicDependency { .. }
        )
    }

    /// Errors contained to a single task (they quarantine it, never the run)
    pub fn is_task_scoped(&self) -> bool {
        matches!(
            self,
            Self::Git(_) | Self::AgentExecution { .. } | Self::MergeConflict { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        if self.is_validation() {
            return 3;
        }
        match self {
            Self::Git(_) => 4,
            Self::StateLocked { .. } => 5,
            Self::Config { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for ralph-waves results
pub type Result<T> = std::result::Result<T, WavesError>;
