//! Task plans.
//!
//! A plan is a markdown document made of task sections:
//!
//! ```text
//! ## Task 2: Auth
//! **Files:**
//! - Create: src/auth.rs
//! - Modify: src/lib.rs:10-20
//! **Dependencies:** Task 1
//!
//! Add token validation middleware.
//! ```
//!
//! - [`parsing`] - line-oriented parser and canonical renderer

pub mod parsing;

pub use parsing::{parse_plan, render_plan};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A unit of work extracted from a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Positive id taken from the task header.
    pub id: u32,
    /// Short human label.
    pub title: String,
    /// Files the task is expected to touch (informational).
    pub file_paths: Vec<String>,
    /// Tasks that must be integrated before this one starts.
    pub depends_on: BTreeSet<u32>,
    /// Free-text body of the task section.
    pub description: String,
}

impl Task {
    /// Create a task with no files, dependencies, or description.
    ///
    /// # Example
    ///
    /// ```
    /// use ralph_waves::plan::Task;
    ///
    /// let task = Task::new(3, "API").with_dependencies([1, 2]);
    /// assert!(task.depends_on.contains(&1));
    /// ```
    #[must_use]
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            file_paths: Vec::new(),
            depends_on: BTreeSet::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_paths = files.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = u32>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Prompt handed to an agent working on this task.
    #[must_use]
    pub fn prompt(&self) -> String {
        let mut prompt = format!("# Task {}: {}\n", self.id, self.title);
        if !self.description.is_empty() {
            prompt.push('\n');
            prompt.push_str(&self.description);
            prompt.push('\n');
        }
        if !self.file_paths.is_empty() {
            prompt.push_str("\n## Files\n");
            for path in &self.file_paths {
                prompt.push_str("- ");
                prompt.push_str(path);
                prompt.push('\n');
            }
        }
        prompt
    }
}
