//! Test fixtures for creating reproducible git repositories.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// A throwaway repository with `main` checked out and one commit
/// (`README.md`).
///
/// The repository lives in `<temp>/repo`; [`GitRepoFixture::worktree_root`]
/// is a sibling directory so linked worktrees never nest inside the main
/// checkout. Automatically cleaned up when dropped.
///
/// # Example
///
/// ```rust,ignore
/// let repo = GitRepoFixture::new();
/// repo.commit_file("a.txt", "hello\n", "add a");
/// assert_eq!(repo.git(&["symbolic-ref", "--short", "HEAD"]), "main");
/// ```
pub struct GitRepoFixture {
    temp_dir: TempDir,
    repo: PathBuf,
}

impl GitRepoFixture {
    /// # Panics
    ///
    /// Panics if the temp directory or any git command fails.
    #[must_use]
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let repo = temp_dir.path().join("repo");
        std::fs::create_dir_all(&repo).expect("Failed to create repo directory");

        let fixture = Self { temp_dir, repo };
        fixture.git(&["init", "--quiet"]);
        fixture.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        fixture.git(&["config", "user.email", "test@example.com"]);
        fixture.git(&["config", "user.name", "Test User"]);
        fixture.git(&["config", "commit.gpgsign", "false"]);
        fixture.commit_file("README.md", "# fixture\n", "initial commit");
        fixture
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.repo
    }

    /// Directory for linked worktrees, outside the main checkout.
    #[must_use]
    pub fn worktree_root(&self) -> PathBuf {
        self.temp_dir.path().join("worktrees")
    }

    /// Run git in the repository and return trimmed stdout.
    ///
    /// # Panics
    ///
    /// Panics if git exits non-zero.
    pub fn git(&self, args: &[&str]) -> String {
        Self::git_in(&self.repo, args)
    }

    /// Run git in an arbitrary checkout (e.g. a worktree).
    ///
    /// # Panics
    ///
    /// Panics if git exits non-zero.
    pub fn git_in(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("Failed to run git");
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Write a file and commit it on the current branch.
    pub fn commit_file(&self, name: &str, content: &str, message: &str) {
        Self::commit_file_in(&self.repo, name, content, message);
    }

    /// Write a file and commit it in `dir`.
    pub fn commit_file_in(dir: &Path, name: &str, content: &str, message: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        Self::git_in(dir, &["add", name]);
        Self::git_in(dir, &["commit", "--quiet", "-m", message]);
    }

    /// Full commit id of `rev`.
    pub fn rev(&self, rev: &str) -> String {
        self.git(&["rev-parse", rev])
    }

    /// Contents of `name` in the main checkout.
    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.repo.join(name)).expect("Failed to read file")
    }
}

impl Default for GitRepoFixture {
    fn default() -> Self {
        Self::new()
    }
}
