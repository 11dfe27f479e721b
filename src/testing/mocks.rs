//! Mock implementations of the gateway, agent and gate seams.
//!
//! These mocks provide controllable test doubles for git, agent processes and
//! validation gates, enabling deterministic unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{AgentAdapter, AgentOutput};
use crate::attempt::{GateOutcome, ValidationGate};
use crate::error::{Result, WavesError};
use crate::git::{GitGateway, GitOperationError, GitResult};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// =============================================================================
// MockGit
// =============================================================================

#[derive(Debug, Default)]
struct MockGitState {
    head: Option<String>,
    branches: BTreeMap<String, String>,
    status: Vec<String>,
    unmerged: Vec<String>,
    staged: bool,
    failing: HashSet<String>,
    log: Vec<String>,
    commits: u32,
}

/// Recording in-memory git gateway.
///
/// Tracks branches, their tips and the checked-out branch; every call is
/// appended to a shared log. Clones and [`GitGateway::at`] share state.
///
/// # Example
///
/// ```rust,ignore
/// let git = MockGit::new("/repo").with_uncommitted(vec!["src/lib.rs".into()]);
/// git.checkout_new_branch("wip").unwrap();
/// assert!(git.ran("checkout_new_branch wip"));
/// ```
#[derive(Debug, Clone)]
pub struct MockGit {
    dir: PathBuf,
    state: Arc<Mutex<MockGitState>>,
}

impl MockGit {
    /// A repository with `main` checked out at commit `c0`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut state = MockGitState::default();
        state.branches.insert("main".to_string(), "c0".to_string());
        state.head = Some("main".to_string());
        Self {
            dir: dir.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Add a branch at the current `HEAD` commit and check it out.
    #[must_use]
    pub fn on_branch(self, branch: &str) -> Self {
        {
            let mut state = guard(&self.state);
            let tip = Self::head_tip(&state);
            state.branches.insert(branch.to_string(), tip);
            state.head = Some(branch.to_string());
        }
        self
    }

    /// Detach `HEAD`.
    #[must_use]
    pub fn detached(self) -> Self {
        guard(&self.state).head = None;
        self
    }

    /// Paths reported by `status_porcelain`.
    #[must_use]
    pub fn with_uncommitted(self, files: Vec<String>) -> Self {
        guard(&self.state).status = files;
        self
    }

    /// Make an operation (by method name) fail.
    #[must_use]
    pub fn failing(self, operation: &str) -> Self {
        guard(&self.state).failing.insert(operation.to_string());
        self
    }

    /// Every call made so far, as `"<method> <args>"`.
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        guard(&self.state).log.clone()
    }

    /// True iff a logged call starts with `prefix`.
    #[must_use]
    pub fn ran(&self, prefix: &str) -> bool {
        guard(&self.state).log.iter().any(|entry| entry.starts_with(prefix))
    }

    #[must_use]
    pub fn tip(&self, branch: &str) -> Option<String> {
        guard(&self.state).branches.get(branch).cloned()
    }

    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        guard(&self.state).branches.keys().cloned().collect()
    }

    fn head_tip(state: &MockGitState) -> String {
        state
            .head
            .as_ref()
            .and_then(|b| state.branches.get(b).cloned())
            .unwrap_or_else(|| "c0".to_string())
    }

    fn call(&self, operation: &str, args: &[&str]) -> GitResult<MutexGuard<'_, MockGitState>> {
        let mut state = guard(&self.state);
        let entry = if args.is_empty() {
            operation.to_string()
        } else {
            format!("{operation} {}", args.join(" "))
        };
        state.log.push(entry.clone());
        if state.failing.contains(operation) {
            return Err(GitOperationError::new(format!("git {entry}"), Some(1), "mock failure"));
        }
        Ok(state)
    }
}

impl GitGateway for MockGit {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn at(&self, dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            state: Arc::clone(&self.state),
        }
    }

    fn current_branch(&self) -> GitResult<String> {
        let state = self.call("current_branch", &[])?;
        state
            .head
            .clone()
            .ok_or_else(|| GitOperationError::new("git symbolic-ref --short HEAD", Some(128), "HEAD is detached"))
    }

    fn worktree_add(&self, path: &Path, branch: &str, start_point: &str) -> GitResult<()> {
        let path = path.to_string_lossy().into_owned();
        let mut state = self.call("worktree_add", &[path.as_str(), branch, start_point])?;
        let tip = state.branches.get(start_point).cloned().unwrap_or_else(|| start_point.to_string());
        state.branches.entry(branch.to_string()).or_insert(tip);
        Ok(())
    }

    fn worktree_remove(&self, path: &Path) -> GitResult<()> {
        let path = path.to_string_lossy().into_owned();
        self.call("worktree_remove", &[path.as_str()])?;
        Ok(())
    }

    fn merge_base(&self, a: &str, b: &str) -> GitResult<String> {
        let state = self.call("merge_base", &[a, b])?;
        Ok(state.branches.get(a).cloned().unwrap_or_else(|| a.to_string()))
    }

    fn diff(&self, a: &str, b: &str) -> GitResult<String> {
        self.call("diff", &[a, b])?;
        Ok(String::new())
    }

    fn diff_name_only(&self, a: &str, b: &str) -> GitResult<Vec<String>> {
        self.call("diff_name_only", &[a, b])?;
        Ok(Vec::new())
    }

    fn merge_squash(&self, branch: &str) -> GitResult<()> {
        let mut state = self.call("merge_squash", &[branch])?;
        state.staged = true;
        Ok(())
    }

    fn has_staged_changes(&self) -> GitResult<bool> {
        Ok(self.call("has_staged_changes", &[])?.staged)
    }

    fn rev_parse(&self, rev: &str) -> GitResult<String> {
        let state = self.call("rev_parse", &[rev])?;
        if rev == "HEAD" {
            return Ok(Self::head_tip(&state));
        }
        state
            .branches
            .get(rev)
            .cloned()
            .ok_or_else(|| GitOperationError::new(format!("git rev-parse {rev}"), Some(128), "unknown revision"))
    }

    fn status_porcelain(&self, _include_untracked: bool) -> GitResult<Vec<String>> {
        Ok(self.call("status_porcelain", &[])?.status.clone())
    }

    fn unmerged_paths(&self) -> GitResult<Vec<String>> {
        Ok(self.call("unmerged_paths", &[])?.unmerged.clone())
    }

    fn add_all(&self) -> GitResult<()> {
        let mut state = self.call("add_all", &[])?;
        if !state.status.is_empty() {
            state.staged = true;
        }
        Ok(())
    }

    fn commit(&self, message: &str, allow_empty: bool) -> GitResult<()> {
        let mut state = self.call("commit", &[message])?;
        if !state.staged && !allow_empty {
            return Err(GitOperationError::new("git commit", Some(1), "nothing to commit"));
        }
        state.commits += 1;
        let id = format!("c{}", state.commits);
        if let Some(head) = state.head.clone() {
            state.branches.insert(head, id);
        }
        state.staged = false;
        state.status.clear();
        Ok(())
    }

    fn checkout(&self, rev: &str) -> GitResult<()> {
        let mut state = self.call("checkout", &[rev])?;
        if !state.branches.contains_key(rev) {
            return Err(GitOperationError::new(format!("git checkout {rev}"), Some(1), "unknown branch"));
        }
        state.head = Some(rev.to_string());
        Ok(())
    }

    fn checkout_new_branch(&self, branch: &str) -> GitResult<()> {
        let mut state = self.call("checkout_new_branch", &[branch])?;
        if state.branches.contains_key(branch) {
            return Err(GitOperationError::new(
                format!("git checkout -b {branch}"),
                Some(128),
                format!("a branch named '{branch}' already exists"),
            ));
        }
        let tip = Self::head_tip(&state);
        state.branches.insert(branch.to_string(), tip);
        state.head = Some(branch.to_string());
        Ok(())
    }

    fn branch_exists(&self, branch: &str) -> GitResult<bool> {
        Ok(self.call("branch_exists", &[branch])?.branches.contains_key(branch))
    }

    fn delete_branch(&self, branch: &str) -> GitResult<()> {
        self.call("delete_branch", &[branch])?.branches.remove(branch);
        Ok(())
    }

    fn reset_hard_head(&self) -> GitResult<()> {
        let mut state = self.call("reset_hard_head", &[])?;
        state.staged = false;
        state.unmerged.clear();
        Ok(())
    }

    fn push(&self, remote: &str, branch: &str) -> GitResult<()> {
        self.call("push", &[remote, branch])?;
        Ok(())
    }
}

// =============================================================================
// MockAgent
// =============================================================================

type AgentAction = dyn Fn(&Path, &str) -> Result<AgentOutput> + Send + Sync;

/// One recorded agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCall {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub file_hints: Vec<String>,
}

/// Scriptable agent.
///
/// The action receives the working directory and prompt, so tests can write
/// files into a worktree the way a real agent would.
///
/// Thread-safe for use in async contexts.
#[derive(Clone)]
pub struct MockAgent {
    action: Arc<AgentAction>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<AgentCall>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAgent")
            .field("delay", &self.delay)
            .field("calls", &guard(&self.calls).len())
            .finish_non_exhaustive()
    }
}

impl MockAgent {
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&Path, &str) -> Result<AgentOutput> + Send + Sync + 'static,
    {
        Self {
            action: Arc::new(action),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An agent that exits 0 without touching anything.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new(|_, _| Ok(AgentOutput::success()))
    }

    /// An agent that exits with `code` and the given stderr.
    #[must_use]
    pub fn failing(code: i32, stderr: &str) -> Self {
        let stderr = stderr.to_string();
        Self::new(move |_, _| {
            Ok(AgentOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: stderr.clone(),
            })
        })
    }

    /// An agent that cannot be spawned.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::new(|_, _| Err(WavesError::agent(None, "mock agent unavailable")))
    }

    /// Sleep before acting.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<AgentCall> {
        guard(&self.calls).clone()
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        guard(&self.calls).iter().map(|c| c.prompt.clone()).collect()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        guard(&self.calls).len()
    }

    /// Highest number of runs observed in flight at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentAdapter for MockAgent {
    async fn run(&self, prompt: &str, working_dir: &Path, file_hints: &[String]) -> Result<AgentOutput> {
        guard(&self.calls).push(AgentCall {
            prompt: prompt.to_string(),
            working_dir: working_dir.to_path_buf(),
            file_hints: file_hints.to_vec(),
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(Arc::clone(&self.active));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.action)(working_dir, prompt)
    }
}

// =============================================================================
// MockGate
// =============================================================================

/// Gate that replays a scripted sequence of results.
///
/// Once the script runs out the last result repeats; an empty script passes.
#[derive(Debug, Clone)]
pub struct MockGate {
    name: String,
    script: Arc<Mutex<VecDeque<(bool, String)>>>,
    last: Arc<Mutex<Option<(bool, String)>>>,
    checks: Arc<AtomicUsize>,
}

impl MockGate {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            last: Arc::new(Mutex::new(None)),
            checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn then_pass(self) -> Self {
        guard(&self.script).push_back((true, String::new()));
        self
    }

    #[must_use]
    pub fn then_fail(self, output: &str) -> Self {
        guard(&self.script).push_back((false, output.to_string()));
        self
    }

    #[must_use]
    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationGate for MockGate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _dir: &Path) -> GateOutcome {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let next = guard(&self.script).pop_front();
        let (passed, output) = match next {
            Some(step) => {
                *guard(&self.last) = Some(step.clone());
                step
            }
            None => guard(&self.last).clone().unwrap_or((true, String::new())),
        };
        GateOutcome {
            gate: self.name.clone(),
            passed,
            output,
        }
    }
}
