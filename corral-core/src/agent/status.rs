//! Agent lifecycle statuses
//!
//! An agent starts in `Running` and moves through waiting, review and merge
//! states. The monitor loop drives most transitions; review, merge and
//! preview moves are triggered by the user.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Controlling process is producing output
    #[default]
    Running,
    /// Controlling process is waiting on the user
    Waiting,
    /// Process finished (or idled) with changes to review
    ReviewReady,
    /// A review pane is open
    Reviewing,
    /// Review closed after new commits were made
    Reviewed,
    /// Checked out in the main directory through a preview branch
    Previewing,
    /// Merging the base branch into the agent branch conflicted
    Conflicts,
    /// Process finished without changes
    Done,
    /// Pane or window vanished, or the agent was torn down
    Dismissed,
}

impl AgentStatus {
    /// Get all statuses
    pub fn all() -> &'static [AgentStatus] {
        &[
            AgentStatus::Running,
            AgentStatus::Waiting,
            AgentStatus::ReviewReady,
            AgentStatus::Reviewing,
            AgentStatus::Reviewed,
            AgentStatus::Previewing,
            AgentStatus::Conflicts,
            AgentStatus::Done,
            AgentStatus::Dismissed,
        ]
    }

    /// Get the short name for this status
    pub fn name(&self) -> &'static str {
        match self {
            AgentStatus::Running => "running",
            AgentStatus::Waiting => "waiting",
            AgentStatus::ReviewReady => "review_ready",
            AgentStatus::Reviewing => "reviewing",
            AgentStatus::Reviewed => "reviewed",
            AgentStatus::Previewing => "previewing",
            AgentStatus::Conflicts => "conflicts",
            AgentStatus::Done => "done",
            AgentStatus::Dismissed => "dismissed",
        }
    }

    /// Whether the monitor loop still watches agents in this status
    pub fn is_monitored(&self) -> bool {
        !matches!(self, AgentStatus::Dismissed)
    }

    /// Whether the controlling process is considered live and classifiable
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::Waiting)
    }

    /// Whether the agent's branch may be merged into its base
    pub fn is_mergeable(&self) -> bool {
        matches!(self, AgentStatus::ReviewReady | AgentStatus::Reviewed)
    }

    /// Whether a review pane may be opened
    pub fn is_reviewable(&self) -> bool {
        matches!(
            self,
            AgentStatus::ReviewReady | AgentStatus::Reviewed | AgentStatus::Conflicts
        )
    }

    /// Whether the agent's work may be previewed in the main directory
    pub fn is_previewable(&self) -> bool {
        matches!(
            self,
            AgentStatus::Running
                | AgentStatus::Waiting
                | AgentStatus::ReviewReady
                | AgentStatus::Reviewed
        )
    }

    /// Statuses reachable from this one
    pub fn valid_transitions(&self) -> &'static [AgentStatus] {
        use AgentStatus::*;
        match self {
            Running => &[Waiting, ReviewReady, Done, Previewing, Dismissed],
            Waiting => &[Running, ReviewReady, Done, Previewing, Dismissed],
            ReviewReady => &[Running, Reviewing, Conflicts, Previewing, Dismissed],
            Reviewing => &[Reviewed, ReviewReady, Dismissed],
            Reviewed => &[Reviewing, Conflicts, Previewing, Dismissed],
            Previewing => &[Running, Waiting, ReviewReady, Reviewed, Dismissed],
            Conflicts => &[ReviewReady, Dismissed],
            Done => &[Running, ReviewReady, Dismissed],
            Dismissed => &[],
        }
    }

    /// Check whether moving to `to` is allowed (staying put always is)
    pub fn can_transition_to(&self, to: &AgentStatus) -> bool {
        self == to || self.valid_transitions().contains(to)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentStatus::all()
            .iter()
            .find(|status| status.name() == s)
            .copied()
            .ok_or_else(|| format!("Unknown agent status: {}", s))
    }
}

/// What a waiting agent is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitingFor {
    /// A permission / confirmation prompt
    Permission,
    /// The idle input prompt
    Input,
    /// Output is stable but matched no known pattern
    Unknown,
}

impl WaitingFor {
    /// Get the short name
    pub fn name(&self) -> &'static str {
        match self {
            WaitingFor::Permission => "permission",
            WaitingFor::Input => "input",
            WaitingFor::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
