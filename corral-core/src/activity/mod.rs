//! Activity classification for agent processes
//!
//! Two signal sources feed the classifier, in priority order:
//! 1. The status sidecar file written by the agent's hooks, trusted only
//!    while fresh
//! 2. Captured terminal content, which must stay unchanged for a number of
//!    polls before it can mean anything other than "working"

mod hook;
mod patterns;
mod tracker;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::agent::{AgentId, WaitingFor};

pub use hook::{hook_settings, install_hook_settings, HookState, HookStatus, STATUS_FILE_ENV};
pub use patterns::{PatternPair, PatternTable};
pub use tracker::{bottom_lines, ContentTracker};

/// What an agent's process is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Producing output
    Active,
    /// Blocked on the user
    Waiting {
        reason: WaitingFor,
        /// An interactive numbered option list is on screen
        has_numbered_list: bool,
    },
    /// Finished its turn but still alive
    Idle,
    /// The process is gone
    Exited { exit_code: Option<i32> },
}

/// Thresholds for the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierSettings {
    /// Consecutive unchanged polls required before content is trusted
    pub stable_polls: u32,
    /// Maximum age of a sidecar status report
    pub hook_freshness: Duration,
    /// Non-blank lines scanned from the bottom of the capture
    pub scan_lines: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            stable_polls: 2,
            hook_freshness: Duration::from_secs(30),
            scan_lines: 20,
        }
    }
}

/// Classifies agent activity from hook reports and terminal captures
#[derive(Debug, Default)]
pub struct Classifier {
    patterns: PatternTable,
    settings: ClassifierSettings,
    trackers: HashMap<AgentId, ContentTracker>,
}

impl Classifier {
    pub fn new(patterns: PatternTable, settings: ClassifierSettings) -> Self {
        Self {
            patterns,
            settings,
            trackers: HashMap::new(),
        }
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    /// Interpret a sidecar report; stale reports yield `None`
    pub fn from_hook(&self, status: &HookStatus, now: DateTime<Utc>) -> Option<Activity> {
        if !status.is_fresh(now, self.settings.hook_freshness) {
            return None;
        }
        Some(match status.status {
            HookState::Running => Activity::Active,
            HookState::WaitingPermission => Activity::Waiting {
                reason: WaitingFor::Permission,
                has_numbered_list: false,
            },
            HookState::WaitingInput => Activity::Waiting {
                reason: WaitingFor::Input,
                has_numbered_list: false,
            },
            HookState::Idle | HookState::Stopped => Activity::Idle,
        })
    }

    /// Feed one terminal capture for an agent
    pub fn observe_capture(&mut self, agent_id: AgentId, content: &str) -> Activity {
        let stable = self
            .trackers
            .entry(agent_id)
            .or_default()
            .observe(content);
        let lines = bottom_lines(content, self.settings.scan_lines);

        let working = lines.iter().any(|line| self.patterns.is_working_line(line));
        if !working && self.patterns.has_immediate_permission(&lines) {
            return Activity::Waiting {
                reason: WaitingFor::Permission,
                has_numbered_list: self.patterns.has_numbered_list(&lines),
            };
        }

        if stable < self.settings.stable_polls {
            return Activity::Active;
        }

        self.classify_lines(&lines)
    }

    /// Classify content already known to be stable
    pub fn classify_stable(&self, content: &str) -> Activity {
        self.classify_lines(&bottom_lines(content, self.settings.scan_lines))
    }

    fn classify_lines(&self, lines: &[&str]) -> Activity {
        if lines.iter().any(|line| self.patterns.is_working_line(line)) {
            return Activity::Active;
        }
        Activity::Waiting {
            reason: self.patterns.waiting_reason(lines),
            has_numbered_list: self.patterns.has_numbered_list(lines),
        }
    }

    /// Drop tracking state for an agent that is gone
    pub fn forget(&mut self, agent_id: AgentId) {
        self.trackers.remove(&agent_id);
    }
}
