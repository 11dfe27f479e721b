//! Version-control gateway.
//!
//! Everything that touches a repository goes through [`GitGateway`]. A
//! gateway is bound to one checkout directory; [`GitGateway::at`] rebinds it
//! to another directory of the same repository (a linked worktree).
//!
//! - [`cli`] - [`CliGit`], the implementation that shells out to `git`

pub mod cli;

pub use cli::CliGit;

use std::path::Path;

/// A git command exited non-zero (or could not be spawned).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{command}` failed{}: {stderr}", format_status(.exit_status))]
pub struct GitOperationError {
    /// The command line, e.g. `git merge --squash ralph-waves/task-2`.
    pub command: String,
    /// Process exit status; `None` when the process never ran or a
    /// precondition failed before running it.
    pub exit_status: Option<i32>,
    /// Diagnostic output (stderr, falling back to stdout).
    pub stderr: String,
}

impl GitOperationError {
    pub fn new(command: impl Into<String>, exit_status: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_status,
            stderr: stderr.into(),
        }
    }
}

fn format_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" with exit status {code}"),
        None => String::new(),
    }
}

/// Result alias for gateway operations.
pub type GitResult<T> = std::result::Result<T, GitOperationError>;

/// Abstraction over the git operations the orchestrator and attempt loop need.
///
/// Implementations must confine side effects to [`GitGateway::dir`].
pub trait GitGateway: Send + Sync {
    /// The checkout directory this gateway operates on.
    fn dir(&self) -> &Path;

    /// A gateway for another checkout of the same repository.
    fn at(&self, dir: &Path) -> Self
    where
        Self: Sized;

    /// Name of the checked-out branch. Detached HEAD is an error.
    fn current_branch(&self) -> GitResult<String>;

    /// Create a linked worktree at `path` on `branch`.
    ///
    /// The branch is created at `start_point` when absent, and reused only
    /// if it already points at `start_point`.
    ///
    /// # Errors
    ///
    /// Fails if `path` exists or `branch` exists pointing elsewhere.
    fn worktree_add(&self, path: &Path, branch: &str, start_point: &str) -> GitResult<()>;

    /// Remove a linked worktree, discarding its working files.
    fn worktree_remove(&self, path: &Path) -> GitResult<()>;

    /// Most recent common ancestor of two revisions.
    fn merge_base(&self, a: &str, b: &str) -> GitResult<String>;

    /// Content diff between two revisions.
    fn diff(&self, a: &str, b: &str) -> GitResult<String>;

    /// Paths that differ between two revisions, in git's order.
    fn diff_name_only(&self, a: &str, b: &str) -> GitResult<Vec<String>>;

    /// Squash `branch` into the index of the current branch without committing.
    fn merge_squash(&self, branch: &str) -> GitResult<()>;

    /// True iff the index differs from `HEAD`.
    fn has_staged_changes(&self) -> GitResult<bool>;

    /// Resolve a revision to a full commit id.
    fn rev_parse(&self, rev: &str) -> GitResult<String>;

    /// Paths reported by `git status --porcelain`.
    fn status_porcelain(&self, include_untracked: bool) -> GitResult<Vec<String>>;

    /// Paths left unmerged by a conflicted merge.
    fn unmerged_paths(&self) -> GitResult<Vec<String>>;

    /// Stage every change, including untracked files.
    fn add_all(&self) -> GitResult<()>;

    /// Commit the index.
    fn commit(&self, message: &str, allow_empty: bool) -> GitResult<()>;

    /// Switch to an existing branch or revision.
    fn checkout(&self, rev: &str) -> GitResult<()>;

    /// Create `branch` at `HEAD` and switch to it, keeping working tree changes.
    fn checkout_new_branch(&self, branch: &str) -> GitResult<()>;

    fn branch_exists(&self, branch: &str) -> GitResult<bool>;

    /// Force-delete a local branch.
    fn delete_branch(&self, branch: &str) -> GitResult<()>;

    /// Discard index and working tree changes to tracked files.
    fn reset_hard_head(&self) -> GitResult<()>;

    /// Publish a branch to a remote. Never prompts for credentials.
    fn push(&self, remote: &str, branch: &str) -> GitResult<()>;
}
