//! Run reports.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Why a task was quarantined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuarantineReason {
    /// The agent exited non-zero or could not be run.
    AgentFailed {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    /// Squash-merging the task branch conflicted with the main line.
    MergeConflict { files: Vec<String> },
    /// The wave timeout fired before the agent finished.
    TimedOut,
    /// The run was cancelled before the agent finished.
    Cancelled,
    /// A git operation scoped to the task failed.
    Git { message: String },
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentFailed { exit_code, diagnostic } => {
                match exit_code {
                    Some(code) => write!(f, "agent exited with code {code}")?,
                    None => write!(f, "agent failed")?,
                }
                match brief(diagnostic) {
                    Some(line) => write!(f, ": {line}"),
                    None => Ok(()),
                }
            }
            Self::MergeConflict { files } => write!(f, "merge conflict in {}", files.join(", ")),
            Self::TimedOut => write!(f, "wave timed out"),
            Self::Cancelled => write!(f, "run cancelled"),
            Self::Git { message } => write!(f, "git error: {message}"),
        }
    }
}

/// Longest diagnostic excerpt shown in one-line summaries.
const BRIEF_CHARS: usize = 120;

/// Last non-empty line of a diagnostic, shortened for one-line display.
fn brief(diagnostic: &str) -> Option<String> {
    let line = diagnostic.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    if line.chars().count() <= BRIEF_CHARS {
        return Some(line.to_string());
    }
    let cut: String = line.chars().take(BRIEF_CHARS).collect();
    Some(format!("{cut}..."))
}

/// Terminal state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Squash-merged into the main line. `commit` is `None` when the task
    /// changed nothing.
    Integrated { commit: Option<String> },
    Quarantined { reason: QuarantineReason },
    /// Never started because these dependencies did not integrate.
    Blocked { by: Vec<u32> },
    /// Never started because the run was cancelled first.
    NotStarted,
}

impl TaskStatus {
    #[must_use]
    pub fn is_integrated(&self) -> bool {
        matches!(self, Self::Integrated { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Integrated { .. } => "integrated",
            Self::Quarantined { .. } => "quarantined",
            Self::Blocked { .. } => "blocked",
            Self::NotStarted => "not started",
        }
    }
}

/// Outcome of one task in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub id: u32,
    pub title: String,
    pub wave: usize,
    pub branch: String,
    /// Kept worktree, if any (quarantined tasks keep theirs).
    pub worktree: Option<PathBuf>,
    #[serde(flatten)]
    pub status: TaskStatus,
}

/// Structured result of an orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub main_branch: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// One entry per task, ascending id.
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    #[must_use]
    pub fn task(&self, id: u32) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn status(&self, id: u32) -> Option<&TaskStatus> {
        self.task(id).map(|t| &t.status)
    }

    fn ids_where(&self, pred: impl Fn(&TaskStatus) -> bool) -> Vec<u32> {
        self.tasks.iter().filter(|t| pred(&t.status)).map(|t| t.id).collect()
    }

    #[must_use]
    pub fn integrated(&self) -> Vec<u32> {
        self.ids_where(TaskStatus::is_integrated)
    }

    #[must_use]
    pub fn quarantined(&self) -> Vec<u32> {
        self.ids_where(|s| matches!(s, TaskStatus::Quarantined { .. }))
    }

    #[must_use]
    pub fn blocked(&self) -> Vec<u32> {
        self.ids_where(|s| matches!(s, TaskStatus::Blocked { .. }))
    }

    /// Blocked tasks that list `id` among their blockers.
    #[must_use]
    pub fn blocked_by(&self, id: u32) -> Vec<u32> {
        self.ids_where(|s| matches!(s, TaskStatus::Blocked { by } if by.contains(&id)))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_integrated())
    }

    /// 0 when every task integrated, 1 for any partial failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// One line per task followed by totals.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .tasks
            .iter()
            .map(|t| {
                let detail = match &t.status {
                    TaskStatus::Integrated { commit: Some(commit) } => {
                        format!(" ({})", &commit[..commit.len().min(10)])
                    }
                    TaskStatus::Integrated { commit: None } => " (no changes)".to_string(),
                    TaskStatus::Quarantined { reason } => format!(" ({reason})"),
                    TaskStatus::Blocked { by } => format!(
                        " (by {})",
                        by.iter().map(|id| format!("task {id}")).collect::<Vec<_>>().join(", ")
                    ),
                    TaskStatus::NotStarted => String::new(),
                };
                format!("task {} [wave {}] {}: {}{}", t.id, t.wave, t.title, t.status.label(), detail)
            })
            .collect();
        lines.push(format!(
            "{} integrated, {} quarantined, {} blocked, {} not started",
            self.integrated().len(),
            self.quarantined().len(),
            self.blocked().len(),
            self.tasks.len() - self.integrated().len() - self.quarantined().len() - self.blocked().len()
        ));
        lines.join("\n")
    }

    /// Write the report to `<dir>/run-<run_id>.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("run-{}.json", self.run_id));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u32, status: TaskStatus) -> TaskReport {
        TaskReport {
            id,
            title: format!("Task {id}"),
            wave: 0,
            branch: format!("ralph-waves/task-{id}"),
            worktree: None,
            status,
        }
    }

    fn report(tasks: Vec<TaskReport>) -> RunReport {
        RunReport {
            run_id: "run".into(),
            main_branch: "main".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cancelled: false,
            tasks,
        }
    }

    #[test]
    fn test_all_integrated_exits_zero() {
        let report = report(vec![
            task(1, TaskStatus::Integrated { commit: Some("abc".into()) }),
            task(2, TaskStatus::Integrated { commit: None }),
        ]);
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_quarantine_without_dependents_still_fails() {
        let report = report(vec![
            task(1, TaskStatus::Integrated { commit: None }),
            task(2, TaskStatus::Quarantined { reason: QuarantineReason::TimedOut }),
        ]);
        assert!(report.blocked_by(2).is_empty());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_blocked_by() {
        let report = report(vec![
            task(1, TaskStatus::Quarantined { reason: QuarantineReason::Cancelled }),
            task(2, TaskStatus::Blocked { by: vec![1] }),
            task(3, TaskStatus::Blocked { by: vec![2] }),
        ]);
        assert_eq!(report.blocked_by(1), vec![2]);
        assert_eq!(report.blocked(), vec![2, 3]);
        assert_eq!(report.quarantined(), vec![1]);
    }

    #[test]
    fn test_summary_lines() {
        let report = report(vec![
            task(1, TaskStatus::Integrated { commit: Some("0123456789abcdef".into()) }),
            task(
                2,
                TaskStatus::Quarantined {
                    reason: QuarantineReason::MergeConflict {
                        files: vec!["README.md".into()],
                    },
                },
            ),
            task(3, TaskStatus::NotStarted),
        ]);
        let summary = report.summary();
        assert!(summary.contains("task 1 [wave 0] Task 1: integrated (0123456789)"));
        assert!(summary.contains("merge conflict in README.md"));
        assert!(summary.ends_with("1 integrated, 1 quarantined, 0 blocked, 1 not started"));
    }

    #[test]
    fn test_agent_failure_display_carries_diagnostic() {
        let reason = QuarantineReason::AgentFailed {
            exit_code: Some(2),
            diagnostic: "compiling\nerror: linker `cc` not found\n".into(),
        };
        assert_eq!(reason.to_string(), "agent exited with code 2: error: linker `cc` not found");

        let reason = QuarantineReason::AgentFailed {
            exit_code: None,
            diagnostic: "x".repeat(500),
        };
        let shown = reason.to_string();
        assert!(shown.starts_with("agent failed: xxx"));
        assert!(shown.ends_with("..."));
        assert!(shown.len() < 200);

        let reason = QuarantineReason::AgentFailed {
            exit_code: Some(1),
            diagnostic: "  \n".into(),
        };
        assert_eq!(reason.to_string(), "agent exited with code 1");
    }

    #[test]
    fn test_json_shape() {
        let report = report(vec![task(2, TaskStatus::Blocked { by: vec![1] })]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tasks"][0]["status"], "blocked");
        assert_eq!(json["tasks"][0]["by"][0], 1);
    }

    #[test]
    fn test_save_writes_json() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = report(Vec::new()).save(temp.path()).unwrap();
        assert!(path.ends_with("run-run.json"));
        assert!(std::fs::read_to_string(path).unwrap().contains("\"main_branch\""));
    }
}
