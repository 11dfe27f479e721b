//! [`GitGateway`] implementation backed by the `git` executable.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use super::{GitGateway, GitOperationError, GitResult};

/// Runs real git commands in a checkout directory.
#[derive(Debug, Clone)]
pub struct CliGit {
    dir: PathBuf,
}

impl CliGit {
    /// Create a gateway for the checkout at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn command_line(args: &[&str]) -> String {
        format!("git {}", args.join(" "))
    }

    fn output(&self, args: &[&str]) -> GitResult<Output> {
        debug!(dir = %self.dir.display(), "git {}", args.join(" "));
        Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| GitOperationError::new(Self::command_line(args), None, e.to_string()))
    }

    /// Run a command, returning raw stdout on success.
    fn run(&self, args: &[&str]) -> GitResult<String> {
        let output = self.output(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(Self::failure(args, &output))
        }
    }

    fn failure(args: &[&str], output: &Output) -> GitOperationError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostic = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        GitOperationError::new(Self::command_line(args), output.status.code(), diagnostic)
    }

    fn lines(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }

    /// Paths from `status --porcelain -z`: NUL-terminated `XY path` entries,
    /// where renames and copies are followed by an extra entry holding the
    /// source path. Paths are unquoted in this format.
    fn porcelain_paths(stdout: &str) -> Vec<String> {
        let mut paths = Vec::new();
        let mut entries = stdout.split('\0').filter(|entry| !entry.is_empty());
        while let Some(entry) = entries.next() {
            let Some((status, path)) = entry.split_at_checked(3) else {
                continue;
            };
            if status.contains(['R', 'C']) {
                entries.next();
            }
            paths.push(path.to_string());
        }
        paths
    }

    fn path_arg(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }
}

impl GitGateway for CliGit {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn at(&self, dir: &Path) -> Self {
        Self::new(dir)
    }

    fn current_branch(&self) -> GitResult<String> {
        Ok(self.run(&["symbolic-ref", "--short", "HEAD"])?.trim().to_string())
    }

    fn worktree_add(&self, path: &Path, branch: &str, start_point: &str) -> GitResult<()> {
        let path_str = Self::path_arg(path);
        if path.exists() {
            return Err(GitOperationError::new(
                format!("git worktree add {path_str}"),
                None,
                format!("path already exists: {path_str}"),
            ));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GitOperationError::new(format!("git worktree add {path_str}"), None, e.to_string())
            })?;
        }

        if self.branch_exists(branch)? {
            let branch_tip = self.rev_parse(branch)?;
            let start_tip = self.rev_parse(start_point)?;
            if branch_tip != start_tip {
                return Err(GitOperationError::new(
                    format!("git worktree add {path_str} {branch}"),
                    None,
                    format!("branch {branch} already exists at {branch_tip}, expected {start_tip}"),
                ));
            }
            self.run(&["worktree", "add", &path_str, branch])?;
        } else {
            self.run(&["worktree", "add", "-b", branch, &path_str, start_point])?;
        }
        Ok(())
    }

    fn worktree_remove(&self, path: &Path) -> GitResult<()> {
        let path_str = Self::path_arg(path);
        self.run(&["worktree", "remove", "--force", &path_str])?;
        Ok(())
    }

    fn merge_base(&self, a: &str, b: &str) -> GitResult<String> {
        let base = self.run(&["merge-base", a, b])?.trim().to_string();
        if base.is_empty() {
            return Err(GitOperationError::new(
                Self::command_line(&["merge-base", a, b]),
                Some(0),
                "empty merge base",
            ));
        }
        Ok(base)
    }

    fn diff(&self, a: &str, b: &str) -> GitResult<String> {
        self.run(&["diff", a, b])
    }

    fn diff_name_only(&self, a: &str, b: &str) -> GitResult<Vec<String>> {
        Ok(Self::lines(&self.run(&["diff", "--name-only", a, b])?))
    }

    fn merge_squash(&self, branch: &str) -> GitResult<()> {
        self.run(&["merge", "--squash", branch])?;
        Ok(())
    }

    fn has_staged_changes(&self) -> GitResult<bool> {
        let args = ["diff", "--cached", "--quiet"];
        let output = self.output(&args)?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(Self::failure(&args, &output)),
        }
    }

    fn rev_parse(&self, rev: &str) -> GitResult<String> {
        let spec = format!("{rev}^{{commit}}");
        Ok(self.run(&["rev-parse", "--verify", &spec])?.trim().to_string())
    }

    fn status_porcelain(&self, include_untracked: bool) -> GitResult<Vec<String>> {
        let mut args = vec!["status", "--porcelain", "-z"];
        if !include_untracked {
            args.push("--untracked-files=no");
        }
        Ok(Self::porcelain_paths(&self.run(&args)?))
    }

    fn unmerged_paths(&self) -> GitResult<Vec<String>> {
        Ok(Self::lines(&self.run(&["diff", "--name-only", "--diff-filter=U"])?))
    }

    fn add_all(&self) -> GitResult<()> {
        self.run(&["add", "-A"])?;
        Ok(())
    }

    fn commit(&self, message: &str, allow_empty: bool) -> GitResult<()> {
        let mut args = vec!["-c", "commit.gpgsign=false", "commit", "--no-verify", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(&args)?;
        Ok(())
    }

    fn checkout(&self, rev: &str) -> GitResult<()> {
        self.run(&["checkout", rev])?;
        Ok(())
    }

    fn checkout_new_branch(&self, branch: &str) -> GitResult<()> {
        self.run(&["checkout", "-b", branch])?;
        Ok(())
    }

    fn branch_exists(&self, branch: &str) -> GitResult<bool> {
        let reference = format!("refs/heads/{branch}");
        let args = ["show-ref", "--verify", "--quiet", reference.as_str()];
        let output = self.output(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Self::failure(&args, &output)),
        }
    }

    fn delete_branch(&self, branch: &str) -> GitResult<()> {
        self.run(&["branch", "-D", branch])?;
        Ok(())
    }

    fn reset_hard_head(&self) -> GitResult<()> {
        self.run(&["reset", "--hard", "HEAD"])?;
        Ok(())
    }

    fn push(&self, remote: &str, branch: &str) -> GitResult<()> {
        let args = ["push", remote, branch];
        debug!(dir = %self.dir.display(), "git push {} {}", remote, branch);
        let output = Command::new("git")
            .args(args)
            .env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes -o ConnectTimeout=10")
            .env("GIT_TERMINAL_PROMPT", "0")
            .current_dir(&self.dir)
            .output()
            .map_err(|e| GitOperationError::new(Self::command_line(&args), None, e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failure(&args, &output))
        }
    }
}
