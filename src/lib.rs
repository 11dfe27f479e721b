//! ralph-waves - parallel coding-agent runs on isolated git worktrees
//!
//! Turns a markdown task plan into dependency-ordered waves, runs one coding
//! agent per task in its own worktree, and squash-merges the results back
//! into the main line one task at a time. Git is the only coordination
//! primitive: concurrent agents never share a checkout, and the main line
//! has exactly one writer.
//!
//! # Architecture
//!
//! - [`git`] - version-control gateway (`GitGateway` trait, `git` CLI backend)
//! - [`plan`] - markdown plan parsing and rendering
//! - [`schedule`] - dependency validation and wave assignment
//! - [`orchestrator`] - worktree creation, concurrent agents, squash integration
//! - [`attempt`] - single-branch retry loop with stuck detection and quarantine
//! - [`agent`] - agent process adapters
//! - [`config`] - layered TOML configuration
//! - [`error`] - error types and exit codes
//! - [`testing`] - mocks and fixtures
//!
//! # Example
//!
//! ```rust,ignore
//! use ralph_waves::{parse_plan, CliGit, CommandAgent, OrchestratorConfig, WaveScheduler, WorktreeOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! let plan = WaveScheduler::plan(parse_plan(&std::fs::read_to_string("PLAN.md")?)?)?;
//! let orchestrator = WorktreeOrchestrator::new(
//!     CliGit::new("."),
//!     CommandAgent::new("claude", vec!["-p".into()]),
//!     OrchestratorConfig::new(".ralph/worktrees"),
//! );
//! let report = orchestrator.run(&plan, CancellationToken::new()).await?;
//! println!("{}", report.summary());
//! ```

pub mod agent;
pub mod attempt;
pub mod config;
pub mod error;
pub mod git;
pub mod orchestrator;
pub mod plan;
pub mod schedule;
pub mod testing;

// Re-export commonly used types
pub use error::{Result, WavesError};

pub use agent::{AgentAdapter, AgentOutput, CommandAgent};
pub use attempt::{
    error_fingerprint, AttemptConfig, AttemptLoop, AttemptOutcome, AttemptState, AttemptStateStore, CommandGate,
    QuarantineConfig, QuarantineReport, ValidationGate,
};
pub use config::{ConfigLoader, WavesConfig};
pub use git::{CliGit, GitGateway, GitOperationError};
pub use orchestrator::{OrchestratorConfig, QuarantineReason, RunReport, TaskStatus, WorktreeOrchestrator};
pub use plan::{parse_plan, render_plan, Task};
pub use schedule::{WavePlan, WaveScheduler};
