//! Attempt state persistence.
//!
//! The attempt loop rewrites `.ralph/attempt_state.json` once per iteration so
//! an interrupted loop can be inspected (`state show`) and resumed. The file
//! is written atomically (temp file + rename) and guarded by an exclusive lock
//! file while a loop is running.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ensure_ralph_dir, ralph_dir};
use crate::error::{Result, WavesError};

/// Current schema version for attempt state.
pub const STATE_VERSION: u32 = 1;

/// Default filename for attempt state.
pub const STATE_FILENAME: &str = "attempt_state.json";

const LOCK_FILENAME: &str = "attempt_state.lock";
const ARCHIVE_DIR: &str = "attempts";

/// Progress of one attempt loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptState {
    pub version: u32,
    pub iteration: u32,
    pub max_iterations: u32,
    /// Gate that failed most recently (`"agent"` when the agent itself failed).
    pub last_gate: Option<String>,
    /// Fingerprint of the most recent failure.
    pub error_hash: Option<String>,
    /// Length of the current run of identical fingerprints.
    pub stuck_count: u32,
    /// Number of stuck directives injected so far.
    pub strategy_shifts: u32,
    pub updated_at: DateTime<Utc>,
}

impl AttemptState {
    #[must_use]
    pub fn new(max_iterations: u32) -> Self {
        Self {
            version: STATE_VERSION,
            iteration: 0,
            max_iterations,
            last_gate: None,
            error_hash: None,
            stuck_count: 0,
            strategy_shifts: 0,
            updated_at: Utc::now(),
        }
    }

    /// Record a failed iteration.
    ///
    /// A fingerprint equal to the previous one extends the streak; any other
    /// fingerprint starts a new streak of length one.
    pub fn record_failure(&mut self, gate: &str, fingerprint: String) {
        if self.error_hash.as_deref() == Some(fingerprint.as_str()) {
            self.stuck_count += 1;
        } else {
            self.stuck_count = 1;
        }
        self.last_gate = Some(gate.to_string());
        self.error_hash = Some(fingerprint);
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn is_stuck(&self, threshold: u32) -> bool {
        self.stuck_count >= threshold
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    #[must_use]
    pub fn is_compatible_version(&self) -> bool {
        self.version == STATE_VERSION
    }
}

/// Exclusive hold on the attempt state. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Persistence layer for [`AttemptState`].
#[derive(Debug, Clone)]
pub struct AttemptStateStore {
    project_dir: PathBuf,
    /// Path to the `.ralph` directory.
    ralph_dir: PathBuf,
}

impl AttemptStateStore {
    #[must_use]
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            ralph_dir: ralph_dir(project_dir.as_ref()),
        }
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.ralph_dir.join(STATE_FILENAME)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.ralph_dir.join(LOCK_FILENAME)
    }

    /// Take the exclusive state lock without blocking.
    ///
    /// # Errors
    ///
    /// [`WavesError::StateLocked`] when another process holds it.
    pub fn lock(&self) -> Result<StateLock> {
        ensure_ralph_dir(&self.project_dir)?;
        let path = self.lock_path();
        let file = File::create(&path)?;
        FileExt::try_lock_exclusive(&file).map_err(|_| WavesError::StateLocked { path })?;
        Ok(StateLock { file })
    }

    /// Write the state atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, state: &AttemptState) -> Result<()> {
        ensure_ralph_dir(&self.project_dir)?;

        let temp_path = self.ralph_dir.join(format!("{STATE_FILENAME}.tmp"));
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, self.state_path())?;

        debug!(iteration = state.iteration, "Saved attempt state");
        Ok(())
    }

    /// Load the state. Missing, unreadable, corrupt or incompatible files all
    /// yield `None` so the loop starts fresh.
    #[must_use]
    pub fn load(&self) -> Option<AttemptState> {
        let path = self.state_path();
        if !path.exists() {
            return None;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read attempt state file: {}", e);
                return None;
            }
        };

        let state: AttemptState = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                warn!("Attempt state file is malformed, starting fresh: {}", e);
                return None;
            }
        };

        if !state.is_compatible_version() {
            warn!("Attempt state version {} is incompatible, starting fresh", state.version);
            return None;
        }

        Some(state)
    }

    /// Read the state file field by field for display.
    #[must_use]
    pub fn snapshot(&self) -> AttemptSnapshot {
        let path = self.state_path();
        let Ok(content) = std::fs::read_to_string(&path) else {
            return AttemptSnapshot::Absent;
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => {
                let num = |key: &str| map.get(key).and_then(Value::as_u64);
                let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
                AttemptSnapshot::Present {
                    iteration: num("iteration"),
                    max_iterations: num("max_iterations"),
                    last_gate: text("last_gate"),
                    error_hash: text("error_hash"),
                    stuck_count: num("stuck_count"),
                    strategy_shifts: num("strategy_shifts"),
                    updated_at: text("updated_at"),
                }
            }
            _ => AttemptSnapshot::Malformed,
        }
    }

    /// Delete the state file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be deleted.
    pub fn clear(&self) -> Result<()> {
        let path = self.state_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Move the state file to `.ralph/attempts/attempt-<timestamp>.json`.
    ///
    /// Returns the archive path, or `None` when there was nothing to archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be moved.
    pub fn archive(&self) -> Result<Option<PathBuf>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let dir = self.ralph_dir.join(ARCHIVE_DIR);
        std::fs::create_dir_all(&dir)?;
        let target = dir.join(format!("attempt-{}.json", Utc::now().format("%Y%m%d-%H%M%S%.3f")));
        std::fs::rename(&path, &target)?;
        Ok(Some(target))
    }
}

/// Field-level view of the state file for `state show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptSnapshot {
    Absent,
    Malformed,
    Present {
        iteration: Option<u64>,
        max_iterations: Option<u64>,
        last_gate: Option<String>,
        error_hash: Option<String>,
        stuck_count: Option<u64>,
        strategy_shifts: Option<u64>,
        updated_at: Option<String>,
    },
}

fn or_unknown<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

impl AttemptSnapshot {
    /// Human-readable rendering; missing fields show as `unknown`.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Absent => "No attempt in progress".to_string(),
            Self::Malformed => [
                "Attempt state is malformed",
                "  iteration:       unknown",
                "  last gate:       unknown",
                "  error hash:      unknown",
                "  stuck count:     unknown",
                "  strategy shifts: unknown",
            ]
            .join("\n"),
            Self::Present {
                iteration,
                max_iterations,
                last_gate,
                error_hash,
                stuck_count,
                strategy_shifts,
                updated_at,
            } => format!(
                "Attempt in progress\n  iteration:       {}/{}\n  last gate:       {}\n  error hash:      {}\n  stuck count:     {}\n  strategy shifts: {}\n  updated at:      {}",
                or_unknown(*iteration),
                or_unknown(*max_iterations),
                or_unknown(last_gate.as_deref()),
                or_unknown(error_hash.as_deref()),
                or_unknown(*stuck_count),
                or_unknown(*strategy_shifts),
                or_unknown(updated_at.as_deref()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_failure_streaks() {
        let mut state = AttemptState::new(10);
        state.record_failure("tests", "aaa".into());
        assert_eq!(state.stuck_count, 1);
        state.record_failure("tests", "aaa".into());
        state.record_failure("tests", "aaa".into());
        assert_eq!(state.stuck_count, 3);
        assert!(state.is_stuck(3));

        state.record_failure("build", "bbb".into());
        assert_eq!(state.stuck_count, 1);
        assert_eq!(state.last_gate.as_deref(), Some("build"));
        assert!(!state.is_stuck(3));
    }

    #[test]
    fn test_exhaustion() {
        let mut state = AttemptState::new(2);
        assert!(!state.is_exhausted());
        state.iteration = 2;
        assert!(state.is_exhausted());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        let mut state = AttemptState::new(5);
        state.iteration = 2;
        state.record_failure("tests", "abc".into());

        store.save(&state).unwrap();
        assert_eq!(store.load(), Some(state));
        assert!(!temp.path().join(".ralph").join("attempt_state.json.tmp").exists());
    }

    #[test]
    fn test_load_absent_is_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(AttemptStateStore::new(temp.path()).load(), None);
        assert_eq!(AttemptStateStore::new(temp.path()).snapshot(), AttemptSnapshot::Absent);
    }

    #[test]
    fn test_malformed_state_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        std::fs::create_dir_all(temp.path().join(".ralph")).unwrap();
        std::fs::write(store.state_path(), "{ not json").unwrap();

        assert_eq!(store.load(), None);
        assert_eq!(store.snapshot(), AttemptSnapshot::Malformed);
        assert!(store.snapshot().render().contains("unknown"));
    }

    #[test]
    fn test_snapshot_is_lenient_per_field() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        std::fs::create_dir_all(temp.path().join(".ralph")).unwrap();
        std::fs::write(store.state_path(), r#"{"iteration": 4, "stuck_count": "x"}"#).unwrap();

        assert_eq!(store.load(), None);
        let rendered = store.snapshot().render();
        assert!(rendered.contains("iteration:       4/unknown"));
        assert!(rendered.contains("stuck count:     unknown"));
    }

    #[test]
    fn test_incompatible_version_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        let mut state = AttemptState::new(3);
        state.version = 99;
        store.save(&state).unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_clear_and_archive() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        assert_eq!(store.archive().unwrap(), None);
        store.clear().unwrap();

        store.save(&AttemptState::new(3)).unwrap();
        let archived = store.archive().unwrap().unwrap();
        assert!(archived.exists());
        assert!(!store.state_path().exists());

        store.save(&AttemptState::new(3)).unwrap();
        store.clear().unwrap();
        assert!(!store.state_path().exists());
    }

    #[test]
    fn test_state_dir_ignores_itself() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        store.save(&AttemptState::new(1)).unwrap();
        let ignore = std::fs::read_to_string(temp.path().join(".ralph").join(".gitignore")).unwrap();
        assert_eq!(ignore, "*\n");
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let store = AttemptStateStore::new(temp.path());
        let held = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(WavesError::StateLocked { .. })));
        drop(held);
        assert!(store.lock().is_ok());
    }
}
