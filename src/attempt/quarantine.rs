//! Failure quarantine.
//!
//! When an attempt loop gives up, whatever the agent left in the working
//! tree is committed to a timestamped side branch so it can be inspected
//! later. The source branch is never moved and never reset.

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use super::state::AttemptState;
use crate::error::Result;
use crate::git::GitGateway;

/// Where and how failed attempts are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineConfig {
    /// Branches that are never pushed from and never reset.
    pub protected_branches: Vec<String>,
    pub remote: String,
    /// Quarantine branches are named `<prefix>/<source>-<timestamp>`.
    pub prefix: String,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            protected_branches: vec!["main".to_string(), "master".to_string()],
            remote: "origin".to_string(),
            prefix: "ralph/quarantine".to_string(),
        }
    }
}

impl QuarantineConfig {
    #[must_use]
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|b| b == branch)
    }
}

/// What a quarantine did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineReport {
    pub branch: String,
    pub source_branch: String,
    pub protected: bool,
    pub pushed: bool,
    /// Uncommitted paths found before quarantining.
    pub uncommitted_files: usize,
    /// Commit id of the quarantine commit.
    pub commit: String,
}

/// Moves a failed attempt's working tree onto a quarantine branch.
pub struct FailureQuarantine<'a, G: GitGateway> {
    git: &'a G,
    config: &'a QuarantineConfig,
}

impl<'a, G: GitGateway> FailureQuarantine<'a, G> {
    pub fn new(git: &'a G, config: &'a QuarantineConfig) -> Self {
        Self { git, config }
    }

    /// Branch name for a quarantine of `source` taken now.
    #[must_use]
    pub fn branch_name(&self, source: &str) -> String {
        format!(
            "{}/{}-{}",
            self.config.prefix.trim_end_matches('/'),
            source,
            Local::now().format("%Y%m%d-%H%M%S")
        )
    }

    /// Commit the working tree to a quarantine branch and switch back.
    ///
    /// # Errors
    ///
    /// Any git failure while creating or committing the quarantine branch.
    /// Once the branch exists the checkout is returned to the source branch
    /// before the error is propagated. A failed push is only logged.
    pub fn quarantine(&self, state: &AttemptState) -> Result<QuarantineReport> {
        let source = self.git.current_branch()?;
        let uncommitted_files = self.git.status_porcelain(true)?.len();
        let protected = self.config.is_protected(&source);

        let branch = self.create_branch(&source)?;
        let preserved = self.preserve(state, &branch, protected, uncommitted_files);

        // Back to the source branch whether or not the commit landed
        let returned = self.git.checkout(&source);
        let (commit, pushed) = match (preserved, returned) {
            (Ok(done), Ok(())) => done,
            (Err(e), returned) => {
                if let Err(checkout) = returned {
                    warn!(branch = %source, "Failed to return to source branch: {}", checkout);
                }
                return Err(e);
            }
            (Ok(_), Err(e)) => return Err(e.into()),
        };
        info!(branch = %branch, commit = %commit, "Quarantined failed attempt");

        Ok(QuarantineReport {
            branch,
            source_branch: source,
            protected,
            pushed,
            uncommitted_files,
            commit,
        })
    }

    /// Commit everything on the quarantine branch and push it when allowed.
    fn preserve(
        &self,
        state: &AttemptState,
        branch: &str,
        protected: bool,
        uncommitted_files: usize,
    ) -> Result<(String, bool)> {
        self.git.add_all()?;
        self.git.commit(&commit_message(state, uncommitted_files), true)?;
        let commit = self.git.rev_parse("HEAD")?;

        let pushed = if protected {
            info!(branch = %branch, "Source branch is protected, not pushing quarantine");
            false
        } else {
            match self.git.push(&self.config.remote, branch) {
                Ok(()) => true,
                Err(e) => {
                    warn!(branch = %branch, "Failed to push quarantine branch: {}", e);
                    false
                }
            }
        };
        Ok((commit, pushed))
    }

    fn create_branch(&self, source: &str) -> Result<String> {
        let branch = self.branch_name(source);
        match self.git.checkout_new_branch(&branch) {
            Ok(()) => Ok(branch),
            Err(first) => {
                if !self.git.branch_exists(&branch)? {
                    return Err(first.into());
                }
                let retry = format!("{branch}-2");
                self.git.checkout_new_branch(&retry)?;
                Ok(retry)
            }
        }
    }
}

fn commit_message(state: &AttemptState, uncommitted_files: usize) -> String {
    format!(
        "ralph: quarantine failed attempt\n\niteration: {}/{}\nstrategy shifts: {}\nlast gate: {}\nerror hash: {}\nuncommitted files: {}\n",
        state.iteration,
        state.max_iterations,
        state.strategy_shifts,
        state.last_gate.as_deref().unwrap_or("none"),
        state.error_hash.as_deref().unwrap_or("none"),
        uncommitted_files
    )
}
