//! Single-branch attempt loop with stuck detection.
//!
//! The loop alternates agent runs and validation gates until a gate passes
//! or the iteration budget runs out. Repeated identical failures (by
//! [`error_fingerprint`]) trigger a stuck directive in the next prompt; an
//! exhausted loop quarantines the working tree onto a side branch.
//!
//! - [`gate`] - validation gates
//! - [`fingerprint`] - failure fingerprints
//! - [`state`] - persisted loop state
//! - [`quarantine`] - failure quarantine branches

pub mod fingerprint;
pub mod gate;
pub mod quarantine;
pub mod state;

pub use fingerprint::error_fingerprint;
pub use gate::{CommandGate, GateOutcome, ValidationGate};
pub use quarantine::{FailureQuarantine, QuarantineConfig, QuarantineReport};
pub use state::{AttemptSnapshot, AttemptState, AttemptStateStore};

use tracing::{info, warn};

use crate::agent::AgentAdapter;
use crate::error::Result;
use crate::git::GitGateway;

/// Gate name recorded when the agent itself fails.
pub const AGENT_GATE: &str = "agent";

/// Exit code for an attempt loop that ran out of iterations. Distinct from
/// plan validation (3), git (4), state lock (5) and config (7) failures.
pub const EXHAUSTED_EXIT_CODE: i32 = 6;

/// Attempt loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptConfig {
    pub max_iterations: u32,
    /// Identical failures in a row before a stuck directive is injected.
    pub stuck_threshold: u32,
    pub quarantine: QuarantineConfig,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            stuck_threshold: 3,
            quarantine: QuarantineConfig::default(),
        }
    }
}

/// How an attempt loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded {
        state: AttemptState,
    },
    Exhausted {
        state: AttemptState,
        /// `None` when quarantining failed.
        quarantine: Option<QuarantineReport>,
    },
}

impl AttemptOutcome {
    #[must_use]
    pub fn state(&self) -> &AttemptState {
        match self {
            Self::Succeeded { state } | Self::Exhausted { state, .. } => state,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Process exit code: 0 on success, [`EXHAUSTED_EXIT_CODE`] when
    /// attempts ran out.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            EXHAUSTED_EXIT_CODE
        }
    }
}

/// Prompt addition for an agent that keeps hitting the same failure.
///
/// Wording escalates the longer the streak runs past `threshold`.
#[must_use]
pub fn stuck_directive(stuck_count: u32, threshold: u32) -> String {
    let header = format!(
        "## Stuck\nThe last {stuck_count} attempts failed with the same error. Do not repeat the previous change."
    );
    let advice = match stuck_count.saturating_sub(threshold) {
        0 => "Step back and try a different approach to the failing check.",
        1 => "Re-read the failure output from scratch and question the assumptions behind your last approach.",
        _ => "Abandon the current approach entirely. Make the smallest change that could possibly pass and verify it in isolation.",
    };
    format!("{header}\n{advice}")
}

/// Drives an agent against one checkout until a gate passes.
pub struct AttemptLoop<G, A, V>
where
    G: GitGateway,
    A: AgentAdapter,
    V: ValidationGate,
{
    git: G,
    agent: A,
    gate: V,
    store: AttemptStateStore,
    config: AttemptConfig,
}

impl<G, A, V> AttemptLoop<G, A, V>
where
    G: GitGateway,
    A: AgentAdapter,
    V: ValidationGate,
{
    pub fn new(git: G, agent: A, gate: V, store: AttemptStateStore, config: AttemptConfig) -> Self {
        Self {
            git,
            agent,
            gate,
            store,
            config,
        }
    }

    fn initial_state(&self) -> AttemptState {
        match self.store.load() {
            Some(mut state) => {
                state.max_iterations = self.config.max_iterations;
                if state.is_exhausted() {
                    info!("Previous attempt already exhausted its iterations, starting fresh");
                    AttemptState::new(self.config.max_iterations)
                } else {
                    info!(iteration = state.iteration, "Resuming attempt");
                    state
                }
            }
            None => AttemptState::new(self.config.max_iterations),
        }
    }

    /// Run until the gate passes or iterations run out.
    ///
    /// # Errors
    ///
    /// [`crate::WavesError::StateLocked`] if another loop is running, or I/O
    /// errors persisting state. Agent and gate failures are iterations, not
    /// errors; quarantine failures are logged.
    pub async fn run(&self, task_prompt: &str, file_hints: &[String]) -> Result<AttemptOutcome> {
        let _lock = self.store.lock()?;
        let dir = self.git.dir();
        let mut state = self.initial_state();
        self.store.save(&state)?;

        while !state.is_exhausted() {
            state.iteration += 1;

            // Shift was counted when the streak reached the threshold
            let prompt = if state.is_stuck(self.config.stuck_threshold) {
                format!(
                    "{task_prompt}\n\n{}",
                    stuck_directive(state.stuck_count, self.config.stuck_threshold)
                )
            } else {
                task_prompt.to_string()
            };

            info!(iteration = state.iteration, max = state.max_iterations, "Attempt iteration");
            let failure = match self.agent.run(&prompt, dir, file_hints).await {
                Ok(output) if output.is_success() => {
                    let outcome = self.gate.check(dir).await;
                    if outcome.passed {
                        None
                    } else {
                        Some((outcome.gate, outcome.output))
                    }
                }
                Ok(output) => Some((AGENT_GATE.to_string(), output.diagnostic())),
                Err(e) => Some((AGENT_GATE.to_string(), e.to_string())),
            };

            match failure {
                None => {
                    info!(iteration = state.iteration, "Gate passed");
                    self.store.clear()?;
                    return Ok(AttemptOutcome::Succeeded { state });
                }
                Some((gate, output)) => {
                    let fingerprint = error_fingerprint(&output);
                    warn!(gate = %gate, hash = %fingerprint, "Iteration failed");
                    state.record_failure(&gate, fingerprint);
                    if state.is_stuck(self.config.stuck_threshold) {
                        state.strategy_shifts += 1;
                        warn!(
                            stuck_count = state.stuck_count,
                            shifts = state.strategy_shifts,
                            "Same failure repeated, next prompt carries a stuck directive"
                        );
                    }
                    self.store.save(&state)?;
                }
            }
        }

        warn!(iterations = state.iteration, "Attempts exhausted, quarantining");
        let quarantine = match FailureQuarantine::new(&self.git, &self.config.quarantine).quarantine(&state) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Failed to quarantine attempt: {}", e);
                None
            }
        };
        if let Err(e) = self.store.archive() {
            warn!("Failed to archive attempt state: {}", e);
        }

        Ok(AttemptOutcome::Exhausted { state, quarantine })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockAgent, MockGate, MockGit};
    use crate::WavesError;
    use tempfile::TempDir;

    fn config(max_iterations: u32) -> AttemptConfig {
        AttemptConfig {
            max_iterations,
            ..AttemptConfig::default()
        }
    }

    fn attempt<V: ValidationGate>(
        temp: &TempDir,
        agent: MockAgent,
        gate: V,
        max_iterations: u32,
    ) -> (AttemptLoop<MockGit, MockAgent, V>, MockGit) {
        let git = MockGit::new(temp.path());
        let store = AttemptStateStore::new(temp.path());
        (
            AttemptLoop::new(git.clone(), agent, gate, store, config(max_iterations)),
            git,
        )
    }

    #[tokio::test]
    async fn test_pass_on_first_iteration() {
        let temp = TempDir::new().unwrap();
        let (attempt, _) = attempt(&temp, MockAgent::succeeding(), MockGate::new("tests"), 5);

        let outcome = attempt.run("do it", &[]).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.state().iteration, 1);
        assert_eq!(outcome.exit_code(), 0);
        assert!(!AttemptStateStore::new(temp.path()).state_path().exists());
    }

    #[tokio::test]
    async fn test_three_identical_failures_inject_one_directive() {
        let temp = TempDir::new().unwrap();
        let agent = MockAgent::succeeding();
        let gate = MockGate::new("tests")
            .then_fail("test foo failed at src/lib.rs:10")
            .then_fail("test foo failed at src/lib.rs:11")
            .then_fail("test foo failed at src/lib.rs:12")
            .then_pass();
        let (attempt, _) = attempt(&temp, agent.clone(), gate, 10);

        let outcome = attempt.run("fix foo", &[]).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.state().iteration, 4);
        assert_eq!(outcome.state().strategy_shifts, 1);
        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[..3].iter().all(|p| p == "fix foo"));
        assert!(prompts[3].starts_with("fix foo\n\n## Stuck"));
    }

    #[tokio::test]
    async fn test_shift_counted_when_budget_ends_on_third_failure() {
        let temp = TempDir::new().unwrap();
        let agent = MockAgent::succeeding();
        let (attempt, git) = attempt(&temp, agent.clone(), MockGate::new("tests").then_fail("same"), 3);

        let outcome = attempt.run("task", &[]).await.unwrap();

        let AttemptOutcome::Exhausted { state, quarantine } = &outcome else {
            panic!("expected exhaustion, got {outcome:?}");
        };
        assert_eq!(state.iteration, 3);
        assert_eq!(state.stuck_count, 3);
        assert_eq!(state.strategy_shifts, 1);
        assert!(agent.prompts().iter().all(|p| p == "task"));
        assert!(quarantine.is_some());
        assert!(git.log().iter().any(|entry| entry.starts_with("commit") && entry.contains("strategy shifts: 1")));
    }

    #[tokio::test]
    async fn test_different_failures_never_inject() {
        let temp = TempDir::new().unwrap();
        let agent = MockAgent::succeeding();
        let gate = MockGate::new("tests")
            .then_fail("alpha")
            .then_fail("beta")
            .then_fail("gamma")
            .then_fail("delta");
        let (attempt, _) = attempt(&temp, agent.clone(), gate, 4);

        let outcome = attempt.run("task", &[]).await.unwrap();
        assert_eq!(outcome.state().strategy_shifts, 0);
        assert_eq!(outcome.state().stuck_count, 1);
        assert!(agent.prompts().iter().all(|p| p == "task"));
    }

    #[tokio::test]
    async fn test_streak_keeps_escalating() {
        let temp = TempDir::new().unwrap();
        let agent = MockAgent::succeeding();
        let (attempt, _) = attempt(&temp, agent.clone(), MockGate::new("tests").then_fail("same"), 6);

        let outcome = attempt.run("task", &[]).await.unwrap();
        // Streaks of 3, 4, 5 and 6; directives land on iterations 4, 5 and 6
        assert_eq!(outcome.state().strategy_shifts, 4);
        let prompts = agent.prompts();
        assert_ne!(prompts[3], prompts[4]);
        assert_ne!(prompts[4], prompts[5]);
    }

    #[tokio::test]
    async fn test_exhaustion_quarantines_protected_branch_without_reset() {
        let temp = TempDir::new().unwrap();
        let (attempt, git) = attempt(&temp, MockAgent::succeeding(), MockGate::new("tests").then_fail("nope"), 3);

        let outcome = attempt.run("task", &[]).await.unwrap();

        let AttemptOutcome::Exhausted { state, quarantine } = &outcome else {
            panic!("expected exhaustion, got {outcome:?}");
        };
        assert_eq!(state.iteration, 3);
        assert_eq!(state.last_gate.as_deref(), Some("tests"));
        assert_eq!(outcome.exit_code(), EXHAUSTED_EXIT_CODE);

        let report = quarantine.as_ref().unwrap();
        assert!(report.protected);
        assert_eq!(git.tip("main").as_deref(), Some("c0"));
        assert_eq!(git.current_branch().unwrap(), "main");
        assert!(!git.ran("reset_hard_head"));

        let archived = std::fs::read_dir(temp.path().join(".ralph").join("attempts")).unwrap().count();
        assert_eq!(archived, 1);
    }

    #[tokio::test]
    async fn test_quarantine_failure_still_reports_exhausted() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new(temp.path()).failing("checkout_new_branch");
        let attempt = AttemptLoop::new(
            git,
            MockAgent::succeeding(),
            MockGate::new("tests").then_fail("nope"),
            AttemptStateStore::new(temp.path()),
            config(1),
        );

        let outcome = attempt.run("task", &[]).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Exhausted { quarantine: None, .. }));
    }

    #[tokio::test]
    async fn test_quarantine_commit_failure_leaves_source_branch_checked_out() {
        let temp = TempDir::new().unwrap();
        let git = MockGit::new(temp.path()).on_branch("feature").failing("commit");
        let attempt = AttemptLoop::new(
            git.clone(),
            MockAgent::succeeding(),
            MockGate::new("tests").then_fail("nope"),
            AttemptStateStore::new(temp.path()),
            config(2),
        );

        let outcome = attempt.run("task", &[]).await.unwrap();

        assert!(matches!(outcome, AttemptOutcome::Exhausted { quarantine: None, .. }));
        assert_eq!(git.current_branch().unwrap(), "feature");
    }

    #[tokio::test]
    async fn test_agent_failure_counts_as_iteration() {
        let temp = TempDir::new().unwrap();
        let gate = MockGate::new("tests");
        let (attempt, _) = attempt(&temp, MockAgent::unavailable(), gate.clone(), 2);

        let outcome = attempt.run("task", &[]).await.unwrap();
        assert_eq!(outcome.state().last_gate.as_deref(), Some(AGENT_GATE));
        assert_eq!(outcome.state().stuck_count, 2);
        assert_eq!(gate.check_count(), 0);
    }

    #[tokio::test]
    async fn test_resumes_from_saved_state() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        let mut saved = AttemptState::new(3);
        saved.iteration = 2;
        store.save(&saved).unwrap();

        let agent = MockAgent::succeeding();
        let (attempt, _) = attempt(&temp, agent.clone(), MockGate::new("tests").then_fail("x"), 3);
        let outcome = attempt.run("task", &[]).await.unwrap();

        assert_eq!(agent.call_count(), 1);
        assert_eq!(outcome.state().iteration, 3);
    }

    #[tokio::test]
    async fn test_malformed_state_starts_fresh() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".ralph")).unwrap();
        std::fs::write(temp.path().join(".ralph").join("attempt_state.json"), "garbage").unwrap();

        let (attempt, _) = attempt(&temp, MockAgent::succeeding(), MockGate::new("tests"), 3);
        let outcome = attempt.run("task", &[]).await.unwrap();
        assert_eq!(outcome.state().iteration, 1);
    }

    #[tokio::test]
    async fn test_concurrent_loop_is_locked_out() {
        let temp = TempDir::new().unwrap();
        let _held = AttemptStateStore::new(temp.path()).lock().unwrap();
        let (attempt, _) = attempt(&temp, MockAgent::succeeding(), MockGate::new("tests"), 3);

        let err = attempt.run("task", &[]).await.unwrap_err();
        assert!(matches!(err, WavesError::StateLocked { .. }));
    }

    #[test]
    fn test_stuck_directive_escalates() {
        let first = stuck_directive(3, 3);
        let second = stuck_directive(4, 3);
        let third = stuck_directive(7, 3);
        assert!(first.contains("last 3 attempts"));
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert!(third.contains("Abandon"));
    }
}
