//! Configuration for ralph-waves.
//!
//! Settings are read from TOML at two levels, later levels overriding
//! earlier ones key by key:
//!
//! 1. **User** - `<config_dir>/ralph-waves/config.toml`
//! 2. **Project** - `.ralph/waves.toml`
//!
//! Missing files are skipped. Every field has a default, so an empty (or
//! absent) file yields [`WavesConfig::default`].
//!
//! ```toml
//! [agent]
//! command = "claude"
//! args = ["-p", "--dangerously-skip-permissions"]
//!
//! [orchestrator]
//! max_parallel = 4
//! wave_timeout_secs = 1800
//!
//! [attempt]
//! max_iterations = 10
//! gate_command = "cargo test"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::attempt::{AttemptConfig, QuarantineConfig};
use crate::error::{Result, WavesError};
use crate::orchestrator::OrchestratorConfig;

/// Project-level state directory.
pub const RALPH_DIR: &str = ".ralph";

/// Project-level config file inside [`RALPH_DIR`].
pub const PROJECT_CONFIG_FILENAME: &str = "waves.toml";

/// `<project>/.ralph`
#[must_use]
pub fn ralph_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(RALPH_DIR)
}

/// Create `<project>/.ralph` with a `.gitignore` that ignores everything in it.
///
/// # Errors
///
/// Returns an error if the directory or ignore file cannot be written.
pub fn ensure_ralph_dir(project_dir: &Path) -> Result<PathBuf> {
    let dir = ralph_dir(project_dir);
    std::fs::create_dir_all(&dir)?;
    let ignore = dir.join(".gitignore");
    if !ignore.exists() {
        std::fs::write(ignore, "*\n")?;
    }
    Ok(dir)
}

// ============================================================================
// Sections
// ============================================================================

/// `[agent]`: the command that runs a coding agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string(), "--dangerously-skip-permissions".to_string()],
        }
    }
}

/// `[orchestrator]`: wave execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Required integration branch. Unset accepts whatever is checked out.
    pub main_branch: Option<String>,
    pub branch_prefix: String,
    /// Relative paths resolve against the project directory.
    pub worktree_root: PathBuf,
    pub max_parallel: usize,
    pub wave_timeout_secs: Option<u64>,
    pub delete_merged_branches: bool,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            main_branch: None,
            branch_prefix: "ralph-waves/task-".to_string(),
            worktree_root: PathBuf::from(RALPH_DIR).join("worktrees"),
            max_parallel: 4,
            wave_timeout_secs: None,
            delete_merged_branches: true,
        }
    }
}

/// `[attempt]`: the single-branch attempt loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttemptSection {
    pub max_iterations: u32,
    pub stuck_threshold: u32,
    pub protected_branches: Vec<String>,
    pub remote: String,
    pub quarantine_prefix: String,
    /// Shell command run as the validation gate.
    pub gate_command: Option<String>,
}

impl Default for AttemptSection {
    fn default() -> Self {
        let quarantine = QuarantineConfig::default();
        Self {
            max_iterations: 10,
            stuck_threshold: 3,
            protected_branches: quarantine.protected_branches,
            remote: quarantine.remote,
            quarantine_prefix: quarantine.prefix,
            gate_command: None,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WavesConfig {
    pub agent: AgentSection,
    pub orchestrator: OrchestratorSection,
    pub attempt: AttemptSection,
}

impl WavesConfig {
    /// Reject values the orchestrator or attempt loop cannot run with.
    ///
    /// # Errors
    ///
    /// [`WavesError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(WavesError::config("agent.command must not be empty"));
        }
        if self.orchestrator.max_parallel == 0 {
            return Err(WavesError::config("orchestrator.max_parallel must be at least 1"));
        }
        if self.orchestrator.branch_prefix.trim().is_empty() {
            return Err(WavesError::config("orchestrator.branch_prefix must not be empty"));
        }
        if self.orchestrator.wave_timeout_secs == Some(0) {
            return Err(WavesError::config("orchestrator.wave_timeout_secs must be at least 1"));
        }
        if self.attempt.max_iterations == 0 {
            return Err(WavesError::config("attempt.max_iterations must be at least 1"));
        }
        if self.attempt.stuck_threshold == 0 {
            return Err(WavesError::config("attempt.stuck_threshold must be at least 1"));
        }
        if self.attempt.quarantine_prefix.trim_matches('/').is_empty() {
            return Err(WavesError::config("attempt.quarantine_prefix must not be empty"));
        }
        Ok(())
    }

    /// Orchestrator settings with `worktree_root` resolved against `project_dir`.
    #[must_use]
    pub fn orchestrator_config(&self, project_dir: &Path) -> OrchestratorConfig {
        let section = &self.orchestrator;
        let worktree_root = if section.worktree_root.is_absolute() {
            section.worktree_root.clone()
        } else {
            project_dir.join(&section.worktree_root)
        };
        OrchestratorConfig {
            main_branch: section.main_branch.clone(),
            branch_prefix: section.branch_prefix.clone(),
            worktree_root,
            max_parallel: section.max_parallel,
            wave_timeout: section.wave_timeout_secs.map(Duration::from_secs),
            delete_merged_branches: section.delete_merged_branches,
        }
    }

    #[must_use]
    pub fn attempt_config(&self) -> AttemptConfig {
        AttemptConfig {
            max_iterations: self.attempt.max_iterations,
            stuck_threshold: self.attempt.stuck_threshold,
            quarantine: QuarantineConfig {
                protected_branches: self.attempt.protected_branches.clone(),
                remote: self.attempt.remote.clone(),
                prefix: self.attempt.quarantine_prefix.clone(),
            },
        }
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WavesError::config(format!("failed to render config: {e}")))
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Configuration level, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLevel {
    User,
    Project,
}

impl std::fmt::Display for ConfigLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// A file that was (or could have been) loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub level: ConfigLevel,
    pub path: PathBuf,
    pub loaded: bool,
}

/// Loads and merges configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader that reads the default user config path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_config_path: Self::default_user_path(),
        }
    }

    /// `<config_dir>/ralph-waves/config.toml`, if the platform has a config dir.
    #[must_use]
    pub fn default_user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ralph-waves").join("config.toml"))
    }

    #[must_use]
    pub fn project_path(project_dir: &Path) -> PathBuf {
        ralph_dir(project_dir).join(PROJECT_CONFIG_FILENAME)
    }

    #[must_use]
    pub fn with_user_config_path(mut self, path: PathBuf) -> Self {
        self.user_config_path = Some(path);
        self
    }

    /// Skip the user level entirely.
    #[must_use]
    pub fn without_user_config(mut self) -> Self {
        self.user_config_path = None;
        self
    }

    /// Load, merge and validate configuration for `project_dir`.
    ///
    /// # Errors
    ///
    /// [`WavesError::Config`] if a file is unreadable, is not valid TOML, has
    /// mistyped values, or fails [`WavesConfig::validate`].
    pub fn load(&self, project_dir: &Path) -> Result<(WavesConfig, Vec<ConfigSource>)> {
        let mut sources = Vec::new();
        let mut merged = Value::Object(serde_json::Map::new());

        if let Some(user_path) = &self.user_config_path {
            let loaded = Self::load_and_merge(&mut merged, user_path)?;
            sources.push(ConfigSource {
                level: ConfigLevel::User,
                path: user_path.clone(),
                loaded,
            });
        }

        let project_path = Self::project_path(project_dir);
        let loaded = Self::load_and_merge(&mut merged, &project_path)?;
        sources.push(ConfigSource {
            level: ConfigLevel::Project,
            path: project_path,
            loaded,
        });

        let config: WavesConfig = serde_json::from_value(merged)
            .map_err(|e| WavesError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok((config, sources))
    }

    fn load_and_merge(accumulated: &mut Value, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        debug!(path = %path.display(), "Loading config");

        let content = std::fs::read_to_string(path)
            .map_err(|e| WavesError::config_with_path(format!("failed to read config: {e}"), path.to_path_buf()))?;
        let value: Value = toml::from_str(&content).map_err(|e| {
            WavesError::config_with_path(format!("failed to parse {}: {e}", path.display()), path.to_path_buf())
        })?;

        deep_merge(accumulated, value);
        Ok(true)
    }
}

/// Merge `child` into `parent`; tables merge recursively, anything else is
/// replaced.
fn deep_merge(parent: &mut Value, child: Value) {
    match (parent, child) {
        (Value::Object(parent_map), Value::Object(child_map)) => {
            for (key, child_value) in child_map {
                match parent_map.get_mut(&key) {
                    Some(parent_value) => deep_merge(parent_value, child_value),
                    None => {
                        parent_map.insert(key, child_value);
                    }
                }
            }
        }
        (parent, child) => {
            *parent = child;
        }
    }
}
