//! Testing infrastructure for ralph-waves.
//!
//! - **Mocks**: recording doubles for [`GitGateway`](crate::git::GitGateway),
//!   [`AgentAdapter`](crate::agent::AgentAdapter) and
//!   [`ValidationGate`](crate::attempt::ValidationGate)
//! - **Fixtures**: throwaway git repositories (test-only)
//!
//! # Example
//!
//! ```rust,ignore
//! use ralph_waves::testing::{MockAgent, MockGate};
//!
//! let agent = MockAgent::failing(1, "error[E0308]");
//! let gate = MockGate::new("tests").then_fail("boom").then_pass();
//! ```

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentAdapter;
    use crate::attempt::ValidationGate;
    use crate::git::GitGateway;
    use std::path::Path;
    use std::time::Duration;

    // =========================================================================
    // MockGit Tests
    // =========================================================================

    #[test]
    fn test_mock_git_records_calls() {
        let git = MockGit::new("/repo");
        assert_eq!(git.current_branch().unwrap(), "main");
        git.push("origin", "main").unwrap();
        assert_eq!(git.log(), vec!["current_branch", "push origin main"]);
        assert!(git.ran("push origin"));
    }

    #[test]
    fn test_mock_git_branching_and_commits() {
        let git = MockGit::new("/repo").with_uncommitted(vec!["a.txt".into()]);
        git.checkout_new_branch("wip").unwrap();
        assert!(git.checkout_new_branch("wip").is_err());
        git.add_all().unwrap();
        git.commit("snapshot", false).unwrap();

        assert_eq!(git.tip("wip").as_deref(), Some("c1"));
        assert_eq!(git.tip("main").as_deref(), Some("c0"));
        git.checkout("main").unwrap();
        assert_eq!(git.current_branch().unwrap(), "main");
    }

    #[test]
    fn test_mock_git_failing_operation() {
        let git = MockGit::new("/repo").failing("push");
        let err = git.push("origin", "x").unwrap_err();
        assert_eq!(err.stderr, "mock failure");
    }

    #[test]
    fn test_mock_git_at_shares_state() {
        let git = MockGit::new("/repo");
        let other = git.at(Path::new("/wt"));
        other.checkout_new_branch("feature").unwrap();
        assert_eq!(other.dir(), Path::new("/wt"));
        assert_eq!(git.current_branch().unwrap(), "feature");
    }

    #[test]
    fn test_mock_git_detached() {
        assert!(MockGit::new("/repo").detached().current_branch().is_err());
    }

    // =========================================================================
    // MockAgent / MockGate Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_agent_records_calls() {
        let agent = MockAgent::failing(2, "bad");
        let output = agent.run("prompt", Path::new("/wt"), &["a.rs".into()]).await.unwrap();
        assert_eq!(output.exit_code, 2);
        assert_eq!(agent.call_count(), 1);
        assert_eq!(agent.calls()[0].file_hints, vec!["a.rs".to_string()]);
        assert_eq!(agent.prompts(), vec!["prompt".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_agent_tracks_peak_concurrency() {
        let agent = MockAgent::succeeding().with_delay(Duration::from_millis(50));
        let dir = Path::new("/wt");
        let (a, b) = tokio::join!(agent.run("a", dir, &[]), agent.run("b", dir, &[]));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(agent.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_mock_gate_replays_script() {
        let gate = MockGate::new("tests").then_fail("boom").then_pass();
        let dir = Path::new("/wt");
        assert!(!gate.check(dir).await.passed);
        assert!(gate.check(dir).await.passed);
        assert!(gate.check(dir).await.passed);
        assert_eq!(gate.check_count(), 3);
        assert!(MockGate::new("empty").check(dir).await.passed);
    }

    #[test]
    fn test_git_repo_fixture() {
        let repo = GitRepoFixture::new();
        assert!(repo.path().join("README.md").exists());
        assert_eq!(repo.git(&["symbolic-ref", "--short", "HEAD"]), "main");
        assert!(!repo.worktree_root().starts_with(repo.path()));
    }
}
