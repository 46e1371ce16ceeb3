//! Replaceable pattern table for terminal content classification

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::WaitingFor;

/// Leading "N. " of a numbered option, optionally behind a selection cursor
static NUMBERED_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[❯>›▶]\s*)?\d+\.\s+(\S+)").expect("numbered item pattern")
});

/// Two substrings that must both appear for a permission prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternPair {
    pub first: String,
    pub second: String,
}

impl PatternPair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

/// Substring patterns used to classify stable terminal content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternTable {
    /// Substrings that mean the process is still working
    pub working: Vec<String>,
    /// Line suffixes of progress lines ("Thinking…")
    pub ellipsis: Vec<String>,
    /// Unambiguous prompts classified as permission without waiting for stability
    pub immediate_permission: Vec<String>,
    /// Paired substrings that together mark a permission prompt
    pub permission_pairs: Vec<PatternPair>,
    /// Idle input prompt hints
    pub input: Vec<String>,
    /// Past-tense verbs opening finished-work summary items
    pub completion_verbs: Vec<String>,
}

impl Default for PatternTable {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            working: strings(&["esc to interrupt", "ctrl+c to interrupt"]),
            ellipsis: strings(&["…", "..."]),
            immediate_permission: strings(&[
                "Do you want to proceed?",
                "Do you want to make this edit",
                "(y/n)",
                "[y/N]",
                "[Y/n]",
            ]),
            permission_pairs: vec![
                PatternPair::new("Yes", "No"),
                PatternPair::new("Allow", "Deny"),
                PatternPair::new("Approve", "Reject"),
            ],
            input: strings(&["? for shortcuts", "Try \""]),
            completion_verbs: strings(&[
                "Added",
                "Created",
                "Updated",
                "Fixed",
                "Removed",
                "Implemented",
                "Changed",
                "Refactored",
                "Wrote",
                "Moved",
                "Renamed",
                "Deleted",
                "Ran",
                "Verified",
            ]),
        }
    }
}

impl PatternTable {
    /// Whether a single line reports ongoing work
    pub fn is_working_line(&self, line: &str) -> bool {
        let trimmed = line.trim_end();
        self.working.iter().any(|p| trimmed.contains(p.as_str()))
            || self
                .ellipsis
                .iter()
                .any(|suffix| is_progress_line(trimmed, suffix))
    }

    /// Whether the lines contain an unambiguous permission prompt
    pub fn has_immediate_permission(&self, lines: &[&str]) -> bool {
        lines.iter().any(|line| {
            self.immediate_permission
                .iter()
                .any(|p| line.contains(p.as_str()))
        })
    }

    /// Whether both halves of any permission pair appear in the lines
    pub fn has_permission_prompt(&self, lines: &[&str]) -> bool {
        let contains = |needle: &str| lines.iter().any(|line| line.contains(needle));
        self.permission_pairs
            .iter()
            .any(|pair| contains(&pair.first) && contains(&pair.second))
    }

    pub fn has_input_prompt(&self, lines: &[&str]) -> bool {
        lines
            .iter()
            .any(|line| self.input.iter().any(|p| line.contains(p.as_str())))
    }

    /// Whether the lines hold an interactive numbered option list
    ///
    /// Needs at least two "N. " items; items that open with a completion
    /// verb belong to a finished-work summary and are not counted.
    pub fn has_numbered_list(&self, lines: &[&str]) -> bool {
        let items = lines
            .iter()
            .filter_map(|line| NUMBERED_ITEM.captures(line))
            .filter_map(|caps| caps.get(1).map(|word| word.as_str()))
            .filter(|word| !self.is_completion_verb(word))
            .count();
        items >= 2
    }

    fn is_completion_verb(&self, word: &str) -> bool {
        let word = word.trim_end_matches(|c: char| !c.is_alphanumeric());
        self.completion_verbs
            .iter()
            .any(|verb| verb.eq_ignore_ascii_case(word))
    }

    /// Decide what stable, non-working content is waiting for
    pub fn waiting_reason(&self, lines: &[&str]) -> WaitingFor {
        if self.has_permission_prompt(lines) {
            WaitingFor::Permission
        } else if self.has_input_prompt(lines) {
            WaitingFor::Input
        } else {
            WaitingFor::Unknown
        }
    }
}

/// A progress line: non-empty text ending with the ellipsis, optionally
/// followed by a parenthesised hint like "(12s · esc to interrupt)"
fn is_progress_line(line: &str, suffix: &str) -> bool {
    let body = match line.rfind(" (") {
        Some(idx) if line.ends_with(')') => &line[..idx],
        _ => line,
    };
    body.len() > suffix.len() && body.ends_with(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PatternTable {
        PatternTable::default()
    }

    #[test]
    fn test_working_lines() {
        let t = table();
        assert!(t.is_working_line("✻ Thinking… (12s · esc to interrupt)"));
        assert!(t.is_working_line("· Compiling…"));
        assert!(t.is_working_line("Running tests..."));
        assert!(!t.is_working_line("…"));
        assert!(!t.is_working_line("All done."));
    }

    #[test]
    fn test_permission_pairs_need_both_halves() {
        let t = table();
        assert!(t.has_permission_prompt(&["❯ 1. Yes", "  2. No, tell me what to do"]));
        assert!(t.has_permission_prompt(&["Allow this command?", "Deny"]));
        assert!(!t.has_permission_prompt(&["Yes, the tests pass now."]));
        assert!(!t.has_permission_prompt(&["Allow me to explain"]));
    }

    #[test]
    fn test_immediate_permission() {
        let t = table();
        assert!(t.has_immediate_permission(&["Do you want to proceed?"]));
        assert!(t.has_immediate_permission(&["Overwrite file? [y/N]"]));
        assert!(!t.has_immediate_permission(&["proceeding with the plan"]));
    }

    #[test]
    fn test_numbered_list_detection() {
        let t = table();
        assert!(t.has_numbered_list(&[
            "Which approach should I take?",
            "❯ 1. Rewrite the parser",
            "  2. Patch the lexer",
        ]));
        assert!(!t.has_numbered_list(&["1. Only one option"]));
    }

    #[test]
    fn test_completion_summary_is_not_a_numbered_list() {
        let t = table();
        assert!(!t.has_numbered_list(&[
            "Summary of changes:",
            "1. Added retry logic to the client",
            "2. Updated the README",
            "3. Fixed the flaky test",
        ]));
    }

    #[test]
    fn test_waiting_reason_order() {
        let t = table();
        assert_eq!(
            t.waiting_reason(&["> ", "? for shortcuts", "Yes", "No"]),
            WaitingFor::Permission
        );
        assert_eq!(t.waiting_reason(&["> ", "? for shortcuts"]), WaitingFor::Input);
        assert_eq!(t.waiting_reason(&["something else"]), WaitingFor::Unknown);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: PatternTable = toml::from_str(r#"input = ["$ "]"#).unwrap();
        assert_eq!(parsed.input, vec!["$ ".to_string()]);
        assert_eq!(parsed.working, PatternTable::default().working);
    }
}
