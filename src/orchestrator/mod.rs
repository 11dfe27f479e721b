//! Worktree-isolated wave execution.
//!
//! Each wave of a [`WavePlan`] runs in three phases:
//!
//! 1. **Setup** - one linked worktree per ready task, created sequentially
//!    at the main-line tip on branch `<branch_prefix><id>`.
//! 2. **Execute** - agents run concurrently (at most `max_parallel` at once)
//!    inside their worktrees. Successful agents' changes are committed on the
//!    task branch. The wave timeout and cancellation drop outstanding agents,
//!    which kills their processes.
//! 3. **Integrate** - finished tasks are squash-merged into the main line one
//!    at a time, ascending id. Conflicts are aborted and the task quarantined;
//!    the remaining tasks are still attempted.
//!
//! Only integrated tasks satisfy dependencies. Dependents of anything else
//! are reported blocked and never started.

pub mod report;

pub use report::{QuarantineReason, RunReport, TaskReport, TaskStatus};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentAdapter, AgentOutput};
use crate::error::{Result, WavesError};
use crate::git::{GitGateway, GitOperationError};
use crate::plan::Task;
use crate::schedule::WavePlan;

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Required integration branch; `None` accepts the current branch.
    pub main_branch: Option<String>,
    pub branch_prefix: String,
    /// Directory that holds `task-<id>` worktrees.
    pub worktree_root: PathBuf,
    pub max_parallel: usize,
    pub wave_timeout: Option<Duration>,
    /// Delete task branches once integrated.
    pub delete_merged_branches: bool,
}

impl OrchestratorConfig {
    #[must_use]
    pub fn new(worktree_root: impl Into<PathBuf>) -> Self {
        Self {
            main_branch: None,
            branch_prefix: "ralph-waves/task-".to_string(),
            worktree_root: worktree_root.into(),
            max_parallel: 4,
            wave_timeout: None,
            delete_merged_branches: true,
        }
    }

    #[must_use]
    pub fn branch_for(&self, id: u32) -> String {
        format!("{}{id}", self.branch_prefix)
    }

    #[must_use]
    pub fn worktree_for(&self, id: u32) -> PathBuf {
        self.worktree_root.join(format!("task-{id}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    TimedOut,
    Cancelled,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs a [`WavePlan`] against a repository.
pub struct WorktreeOrchestrator<G: GitGateway, A: AgentAdapter> {
    git: G,
    agent: A,
    config: OrchestratorConfig,
}

impl<G: GitGateway, A: AgentAdapter> WorktreeOrchestrator<G, A> {
    /// `git` must be bound to the integration checkout.
    pub fn new(git: G, agent: A, config: OrchestratorConfig) -> Self {
        Self { git, agent, config }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Check the integration checkout before touching anything.
    ///
    /// # Errors
    ///
    /// Detached `HEAD` or dirty tracked files are git errors; a branch other
    /// than the configured main branch is a configuration error.
    pub fn preflight(&self) -> Result<String> {
        let current = self.git.current_branch()?;
        if let Some(expected) = &self.config.main_branch {
            if *expected != current {
                return Err(WavesError::config(format!(
                    "integration checkout is on '{current}', expected '{expected}'"
                )));
            }
        }

        let dirty = self.git.status_porcelain(false)?;
        if !dirty.is_empty() {
            return Err(GitOperationError::new(
                "git status --porcelain --untracked-files=no",
                None,
                format!("integration checkout has uncommitted changes: {}", dirty.join(", ")),
            )
            .into());
        }
        Ok(current)
    }

    /// Execute every wave and report per-task outcomes.
    ///
    /// # Errors
    ///
    /// Preflight failures, git failures on the integration checkout itself,
    /// and agent-run errors that are not task-scoped. Everything scoped to
    /// one task ends up in the report instead.
    pub async fn run(&self, plan: &WavePlan, cancel: CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        let main_branch = self.preflight()?;
        info!(run_id = %run_id, branch = %main_branch, tasks = plan.len(), waves = plan.waves().len(), "Starting run");

        let mut reports: BTreeMap<u32, TaskReport> = BTreeMap::new();
        let mut cancelled = false;

        for (wave, ids) in plan.waves().iter().enumerate() {
            let tasks: Vec<&Task> = ids.iter().filter_map(|id| plan.task(*id)).collect();

            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                for task in tasks {
                    reports.insert(task.id, self.report(task, wave, TaskStatus::NotStarted, None));
                }
                continue;
            }

            let mut ready = Vec::new();
            for task in tasks {
                let blockers: Vec<u32> = task
                    .depends_on
                    .iter()
                    .filter(|dep| !reports.get(dep).is_some_and(|r| r.status.is_integrated()))
                    .copied()
                    .collect();
                if blockers.is_empty() {
                    ready.push(task);
                } else {
                    info!(task = task.id, blockers = ?blockers, "Task blocked");
                    reports.insert(task.id, self.report(task, wave, TaskStatus::Blocked { by: blockers }, None));
                }
            }

            info!(wave, ready = ready.len(), "Starting wave");
            let tip = self.git.rev_parse(&main_branch)?;
            let mut launched = Vec::new();
            for task in ready {
                let path = self.config.worktree_for(task.id);
                match self.git.worktree_add(&path, &self.config.branch_for(task.id), &tip) {
                    Ok(()) => launched.push(task),
                    Err(e) => {
                        warn!(task = task.id, "Failed to create worktree: {}", e);
                        let status = TaskStatus::Quarantined {
                            reason: QuarantineReason::Git { message: e.to_string() },
                        };
                        reports.insert(task.id, self.report(task, wave, status, None));
                    }
                }
            }

            let (mut finished, interrupt) = self.execute(&launched, &cancel).await;
            if interrupt == Some(Interrupt::Cancelled) {
                cancelled = true;
            }

            for task in launched {
                let worktree = Some(self.config.worktree_for(task.id));
                let status = match finished.remove(&task.id) {
                    Some(Ok(_)) => self.integrate(task)?,
                    Some(Err(e)) if !e.is_task_scoped() => return Err(e),
                    Some(Err(e)) => TaskStatus::Quarantined {
                        reason: Self::failure_reason(e),
                    },
                    None => TaskStatus::Quarantined {
                        reason: match interrupt {
                            Some(Interrupt::Cancelled) => QuarantineReason::Cancelled,
                            _ => QuarantineReason::TimedOut,
                        },
                    },
                };
                let worktree = if status.is_integrated() { None } else { worktree };
                if let TaskStatus::Quarantined { reason } = &status {
                    warn!(task = task.id, dependents = ?plan.dependents_of(task.id), "Task quarantined: {}", reason);
                }
                reports.insert(task.id, self.report(task, wave, status, worktree));
            }
        }

        let report = RunReport {
            run_id,
            main_branch,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            tasks: reports.into_values().collect(),
        };
        info!(
            integrated = report.integrated().len(),
            quarantined = report.quarantined().len(),
            blocked = report.blocked().len(),
            "Run finished"
        );
        Ok(report)
    }

    fn report(&self, task: &Task, wave: usize, status: TaskStatus, worktree: Option<PathBuf>) -> TaskReport {
        TaskReport {
            id: task.id,
            title: task.title.clone(),
            wave,
            branch: self.config.branch_for(task.id),
            worktree,
            status,
        }
    }

    fn failure_reason(error: WavesError) -> QuarantineReason {
        match error {
            WavesError::AgentExecution { exit_code, message } => QuarantineReason::AgentFailed {
                exit_code,
                diagnostic: message,
            },
            WavesError::MergeConflict { files, .. } => QuarantineReason::MergeConflict { files },
            other => QuarantineReason::Git {
                message: other.to_string(),
            },
        }
    }

    /// Run agents for one wave. Returns finished results by task id and the
    /// interrupt that stopped the wave early, if any.
    async fn execute(
        &self,
        tasks: &[&Task],
        cancel: &CancellationToken,
    ) -> (BTreeMap<u32, Result<AgentOutput>>, Option<Interrupt>) {
        let semaphore = Semaphore::new(self.config.max_parallel.max(1));
        let deadline = self.config.wave_timeout.map(|timeout| Instant::now() + timeout);

        let mut pending: FuturesUnordered<_> = tasks
            .iter()
            .map(|task| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    (task.id, self.run_agent(task).await)
                }
            })
            .collect();

        let mut finished = BTreeMap::new();
        let interrupt = loop {
            tokio::select! {
                biased;
                next = pending.next() => match next {
                    Some((id, result)) => {
                        finished.insert(id, result);
                    }
                    None => break None,
                },
                () = cancel.cancelled() => break Some(Interrupt::Cancelled),
                () = wait_until(deadline) => break Some(Interrupt::TimedOut),
            }
        };

        if let Some(interrupt) = interrupt {
            warn!(?interrupt, outstanding = pending.len(), "Stopping outstanding agents");
        }
        // Dropping the futures kills the agent processes
        drop(pending);
        (finished, interrupt)
    }

    async fn run_agent(&self, task: &Task) -> Result<AgentOutput> {
        let dir = self.config.worktree_for(task.id);
        info!(task = task.id, dir = %dir.display(), "Agent started");
        let output = self.agent.run(&task.prompt(), &dir, &task.file_paths).await?;
        if !output.is_success() {
            return Err(WavesError::agent(Some(output.exit_code), output.diagnostic()));
        }
        self.snapshot(task, &dir)?;
        info!(task = task.id, "Agent finished");
        Ok(output)
    }

    /// Commit whatever the agent left uncommitted on the task branch.
    fn snapshot(&self, task: &Task, dir: &Path) -> Result<()> {
        let worktree = self.git.at(dir);
        worktree.add_all()?;
        if worktree.has_staged_changes()? {
            worktree.commit(&format!("task {}: {} (agent changes)", task.id, task.title), false)?;
        }
        Ok(())
    }

    /// Squash one task branch into the integration checkout.
    fn integrate(&self, task: &Task) -> Result<TaskStatus> {
        let branch = self.config.branch_for(task.id);

        if let Err(e) = self.git.merge_squash(&branch) {
            let files = self.git.unmerged_paths()?;
            self.git.reset_hard_head()?;
            let error = if files.is_empty() {
                WavesError::Git(e)
            } else {
                WavesError::MergeConflict { branch, files }
            };
            debug!(task = task.id, "Squash aborted: {}", error);
            return Ok(TaskStatus::Quarantined {
                reason: Self::failure_reason(error),
            });
        }

        if !self.git.has_staged_changes()? {
            info!(task = task.id, "Task made no changes");
            self.cleanup(task.id, &branch);
            return Ok(TaskStatus::Integrated { commit: None });
        }

        self.git.commit(&format!("task {}: {}", task.id, task.title), false)?;
        let commit = self.git.rev_parse("HEAD")?;
        info!(task = task.id, commit = %commit, "Task integrated");
        self.cleanup(task.id, &branch);
        Ok(TaskStatus::Integrated { commit: Some(commit) })
    }

    fn cleanup(&self, id: u32, branch: &str) {
        let path = self.config.worktree_for(id);
        if let Err(e) = self.git.worktree_remove(&path) {
            warn!(task = id, "Failed to remove worktree: {}", e);
        }
        if self.config.delete_merged_branches {
            match self.git.delete_branch(branch) {
                Ok(()) => debug!(task = id, branch, "Deleted task branch"),
                Err(e) => warn!(task = id, "Failed to delete task branch: {}", e),
            }
        }
    }
}
