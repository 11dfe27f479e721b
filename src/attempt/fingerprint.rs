//! Failure fingerprints.
//!
//! Two failures get the same fingerprint when their output differs only in
//! volatile details: source locations, durations, hex ids, ANSI colour codes
//! and whitespace. Other numbers are kept, so "5 tests failed" followed by
//! "2 tests failed" counts as progress rather than a repeat.

use std::sync::LazyLock;

use regex::Regex;

static ANSI: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok());
static HEX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b(?:0x)?[0-9a-fA-F]{7,}\b").ok());
static LOCATION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r":\d+(?::\d+)?\b").ok());
static LINE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\bline \d+\b").ok());
static DURATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\s?(?:ns|us|µs|ms|s|secs?|seconds?)\b").ok());

fn replace(pattern: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Normalize failure output before hashing.
#[must_use]
pub fn normalize(output: &str) -> String {
    let text = replace(&ANSI, output, "");
    let text = replace(&HEX, &text, "<hex>");
    let text = replace(&LOCATION, &text, ":<loc>");
    let text = replace(&LINE, &text, "line <n>");
    let text = replace(&DURATION, &text, "<duration>");
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fingerprint of a failure's output.
///
/// # Example
///
/// ```
/// use ralph_waves::attempt::error_fingerprint;
///
/// let a = error_fingerprint("src/lib.rs:10: expected `u32`, found `i64`");
/// let b = error_fingerprint("src/lib.rs:42: expected `u32`, found `i64`");
/// assert_eq!(a, b);
/// ```
#[must_use]
pub fn error_fingerprint(output: &str) -> String {
    format!("{:x}", md5::compute(normalize(output).as_bytes()))
}
