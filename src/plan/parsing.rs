//! Plan parsing and canonical rendering.
//!
//! Parsing is a single pass over the lines of the document. A `## Task N:` or
//! `### Task N:` header opens a task block; everything up to the next task
//! header belongs to that block. Text before the first header is ignored.

use std::collections::{BTreeSet, HashSet};

use regex::Regex;

use super::Task;
use crate::error::{Result, WavesError};

/// Compiled patterns used by the parser.
struct PlanPatterns {
    header: Regex,
    files: Regex,
    dependencies: Regex,
    bullet: Regex,
    verb_item: Regex,
    dependency_ref: Regex,
    line_range: Regex,
}

impl PlanPatterns {
    fn compile() -> Result<Self> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(|e| WavesError::Other(e.into()));
        Ok(Self {
            header: compile(r"^#{2,3}\s+Task\s+([^:\s]+)\s*:\s*(.*)$")?,
            files: compile(r"^\*\*Files:?\*\*:?\s*(.*)$")?,
            dependencies: compile(r"^\*\*Dependencies:?\*\*:?\s*(.*)$")?,
            bullet: compile(r"^[-*+]\s+(.*)$")?,
            verb_item: compile(r"^([A-Za-z][A-Za-z -]*):\s+(.+)$")?,
            dependency_ref: compile(r"^(?i:task)\s+#?(\d+)$")?,
            line_range: compile(r":\d+(?:-\d+)?$")?,
        })
    }

    /// Extract the path from a file list item, or `None` if the line is not one.
    fn file_item(&self, line: &str) -> Option<String> {
        let (bulleted, rest) = match self.bullet.captures(line) {
            Some(caps) => (true, caps.get(1).map_or("", |m| m.as_str())),
            None => (false, line),
        };

        let raw = match self.verb_item.captures(rest) {
            Some(caps) => caps.get(2).map_or("", |m| m.as_str()),
            None if bulleted => rest,
            None => return None,
        };

        let path = self.clean_path(raw);
        (!path.is_empty()).then_some(path)
    }

    fn clean_path(&self, raw: &str) -> String {
        let unquoted = raw.trim().trim_matches('`');
        let stripped = self.line_range.replace(unquoted, "");
        stripped.trim().trim_matches('`').to_string()
    }

    fn dependencies(&self, value: &str, line: usize, task_id: u32) -> Result<BTreeSet<u32>> {
        let value = value.trim().trim_end_matches('.').trim();
        if value.eq_ignore_ascii_case("none") {
            return Ok(BTreeSet::new());
        }
        if value.is_empty() {
            return Err(WavesError::plan_parse(
                line,
                "expected `None` or a list of `Task <N>` references",
            ));
        }

        let mut deps = BTreeSet::new();
        for item in value.split(',').map(str::trim) {
            let id = self
                .dependency_ref
                .captures(item)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .ok_or_else(|| {
                    WavesError::plan_parse(line, format!("invalid dependency reference `{item}`"))
                })?;
            if id == task_id {
                return Err(WavesError::plan_parse(
                    line,
                    format!("task {task_id} cannot depend on itself"),
                ));
            }
            deps.insert(id);
        }
        Ok(deps)
    }
}

/// A task block being accumulated.
struct TaskBlock {
    task: Task,
    body: Vec<String>,
    in_files: bool,
}

impl TaskBlock {
    fn finish(mut self) -> Task {
        self.task.description = self.body.join("\n").trim().to_string();
        self.task
    }
}

/// Parse a plan document into tasks, in header order.
///
/// Empty input yields an empty vector.
///
/// # Errors
///
/// Returns [`WavesError::PlanParse`] for a task header whose numeral is not a
/// positive integer, a duplicate task id, a malformed dependency list, or a
/// task that depends on itself.
///
/// # Example
///
/// ```
/// use ralph_waves::plan::parse_plan;
///
/// let plan = "## Task 1: Setup\n**Files:**\n- Modify: src/b.go:10-20\n**Dependencies:** None\n";
/// let tasks = parse_plan(plan).unwrap();
/// assert_eq!(tasks[0].file_paths, vec!["src/b.go".to_string()]);
/// ```
pub fn parse_plan(content: &str) -> Result<Vec<Task>> {
    let patterns = PlanPatterns::compile()?;

    let mut tasks = Vec::new();
    let mut seen = HashSet::new();
    let mut current: Option<TaskBlock> = None;

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = raw.trim();

        if let Some(caps) = patterns.header.captures(trimmed) {
            let numeral = caps.get(1).map_or("", |m| m.as_str());
            let id = numeral
                .parse::<u32>()
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| {
                    WavesError::plan_parse(line_no, format!("invalid task number `{numeral}`"))
                })?;
            if !seen.insert(id) {
                return Err(WavesError::plan_parse(line_no, format!("duplicate task {id}")));
            }

            if let Some(block) = current.take() {
                tasks.push(block.finish());
            }
            let title = caps.get(2).map_or("", |m| m.as_str()).trim();
            current = Some(TaskBlock {
                task: Task::new(id, title),
                body: Vec::new(),
                in_files: false,
            });
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = patterns.files.captures(trimmed) {
            block.in_files = true;
            let inline = caps.get(1).map_or("", |m| m.as_str()).trim();
            if !inline.is_empty() {
                let path = patterns.clean_path(
                    patterns
                        .verb_item
                        .captures(inline)
                        .and_then(|c| c.get(2))
                        .map_or(inline, |m| m.as_str()),
                );
                if !path.is_empty() {
                    block.task.file_paths.push(path);
                }
            }
            continue;
        }

        if let Some(caps) = patterns.dependencies.captures(trimmed) {
            block.in_files = false;
            let value = caps.get(1).map_or("", |m| m.as_str());
            let deps = patterns.dependencies(value, line_no, block.task.id)?;
            block.task.depends_on.extend(deps);
            continue;
        }

        if block.in_files {
            if let Some(path) = patterns.file_item(trimmed) {
                block.task.file_paths.push(path);
                continue;
            }
            block.in_files = false;
        }

        block.body.push(raw.to_string());
    }

    if let Some(block) = current {
        tasks.push(block.finish());
    }
    Ok(tasks)
}

/// Render tasks as a canonical plan document.
///
/// Parsing the output yields the same tasks.
#[must_use]
pub fn render_plan(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&format!("## Task {}: {}\n", task.id, task.title));
        if !task.file_paths.is_empty() {
            out.push_str("**Files:**\n");
            for path in &task.file_paths {
                out.push_str(&format!("- Modify: {path}\n"));
            }
        }
        if task.depends_on.is_empty() {
            out.push_str("**Dependencies:** None\n");
        } else {
            let refs: Vec<String> = task.depends_on.iter().map(|id| format!("Task {id}")).collect();
            out.push_str(&format!("**Dependencies:** {}\n", refs.join(", ")));
        }
        if !task.description.is_empty() {
            out.push('\n');
            out.push_str(&task.description);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_TASKS: &str = "## Task 1: Setup\n**Dependencies:** None\n\n## Task 2: Auth\n**Dependencies:** Task 1\n\n## Task 3: API\n**Dependencies:** Task 1, Task 2\n";

    #[test]
    fn test_empty_input() {
        assert!(parse_plan("").unwrap().is_empty());
        assert!(parse_plan("# Just a title\n\nSome prose.\n").unwrap().is_empty());
    }

    #[test]
    fn test_three_task_example() {
        let tasks = parse_plan(THREE_TASKS).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, 1);
        assert_eq!(tasks[0].title, "Setup");
        assert!(tasks[0].depends_on.is_empty());
        assert_eq!(tasks[1].depends_on, BTreeSet::from([1]));
        assert_eq!(tasks[2].depends_on, BTreeSet::from([1, 2]));
        assert!(tasks.iter().all(|t| t.description.is_empty()));
    }

    #[test]
    fn test_header_levels_two_and_three() {
        let tasks = parse_plan("### Task 5: Deep\n\n## Task 2: Shallow\n").unwrap();
        assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![5, 2]);
    }

    #[test]
    fn test_level_four_header_is_body_text() {
        let tasks = parse_plan("## Task 1: Outer\n#### Task 2: Not a task\n").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "#### Task 2: Not a task");
    }

    #[test]
    fn test_file_range_suffix_stripped() {
        let plan = "## Task 1: Files\n**Files:**\n- Create: src/a.go\n- Modify: src/b.go:10-20\n- Test: `tests/b_test.go:7`\n";
        let tasks = parse_plan(plan).unwrap();
        assert_eq!(
            tasks[0].file_paths,
            vec!["src/a.go", "src/b.go", "tests/b_test.go"]
        );
    }

    #[test]
    fn test_file_items_without_bullets_or_verbs() {
        let plan = "## Task 1: Files\n**Files:**\nModify: src/x.rs\n- src/y.rs\nThen write docs.\n";
        let tasks = parse_plan(plan).unwrap();
        assert_eq!(tasks[0].file_paths, vec!["src/x.rs", "src/y.rs"]);
        assert_eq!(tasks[0].description, "Then write docs.");
    }

    #[test]
    fn test_file_list_ends_at_blank_line() {
        let plan = "## Task 1: Files\n**Files:**\n- Create: a.txt\n\n- Step one\n- Step two\n";
        let tasks = parse_plan(plan).unwrap();
        assert_eq!(tasks[0].file_paths, vec!["a.txt"]);
        assert_eq!(tasks[0].description, "- Step one\n- Step two");
    }

    #[test]
    fn test_description_excludes_markers() {
        let plan = "## Task 4: Docs\nIntro line.\n**Files:**\n- Modify: README.md\n**Dependencies:** None\n\nWrite the usage section.\n\n## Task 5: Next\n";
        let tasks = parse_plan(plan).unwrap();
        assert_eq!(tasks[0].description, "Intro line.\n\nWrite the usage section.");
        assert_eq!(tasks[0].file_paths, vec!["README.md"]);
    }

    #[test]
    fn test_preamble_ignored() {
        let plan = "# Plan\n\nOverview text.\n\n## Task 1: Only\nBody\n";
        let tasks = parse_plan(plan).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "Body");
    }

    #[test]
    fn test_dependencies_case_insensitive_none() {
        let tasks = parse_plan("## Task 1: A\n**Dependencies:** none.\n").unwrap();
        assert!(tasks[0].depends_on.is_empty());
    }

    #[test]
    fn test_malformed_header_numeral() {
        let err = parse_plan("## Task 1: Fine\n\n## Task X: Broken\n").unwrap_err();
        match err {
            WavesError::PlanParse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("`X`"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_task_id_rejected() {
        assert!(matches!(
            parse_plan("## Task 0: Zero\n"),
            Err(WavesError::PlanParse { line: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        assert!(matches!(
            parse_plan("## Task 1: A\n## Task 1: B\n"),
            Err(WavesError::PlanParse { line: 2, .. })
        ));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = parse_plan("## Task 2: Loop\n**Dependencies:** Task 2\n").unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn test_bad_dependency_reference() {
        let err = parse_plan("## Task 2: B\n**Dependencies:** Task 1, the auth work\n").unwrap_err();
        assert!(err.to_string().contains("the auth work"));
    }

    #[test]
    fn test_empty_dependency_value_rejected() {
        assert!(parse_plan("## Task 2: B\n**Dependencies:**\n").is_err());
    }

    #[test]
    fn test_render_round_trip() {
        let plan = "# Plan\n\n## Task 1: Setup\n**Files:**\n- Create: Cargo.toml\n**Dependencies:** None\n\nScaffold the crate.\n\n### Task 2: Auth\n**Files:**\n- Modify: src/auth.rs:1-40\n- Test: tests/auth.rs\n**Dependencies:** Task 1\n\nAdd tokens.\n\nAnd refresh.\n\n## Task 3: API\n**Dependencies:** Task 1, Task 2\n";
        let tasks = parse_plan(plan).unwrap();
        let rendered = render_plan(&tasks);
        assert_eq!(parse_plan(&rendered).unwrap(), tasks);
        assert_eq!(render_plan(&parse_plan(&rendered).unwrap()), rendered);
    }
}
