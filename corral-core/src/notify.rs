//! Typed notifications for the presentation layer

use std::fmt;

use tokio::sync::mpsc;

use crate::agent::{AgentId, WaitingFor};

/// Why an agent was removed by dead-agent cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    WindowGone,
    PaneGone,
    WorktreeMissing,
    BranchMerged,
}

impl fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CleanupReason::WindowGone => "window no longer exists",
            CleanupReason::PaneGone => "pane no longer exists",
            CleanupReason::WorktreeMissing => "worktree no longer exists",
            CleanupReason::BranchMerged => "branch already merged into base",
        };
        f.write_str(text)
    }
}

/// One agent removed by cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    pub agent_id: AgentId,
    pub branch: String,
    pub reason: CleanupReason,
}

/// Something the user should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AgentFinished {
        agent_id: AgentId,
        branch: String,
        exit_code: Option<i32>,
        has_changes: bool,
    },
    AgentWaiting {
        agent_id: AgentId,
        branch: String,
        reason: WaitingFor,
    },
    WindowVanished {
        agent_id: AgentId,
        branch: String,
    },
    ReviewClosed {
        agent_id: AgentId,
        branch: String,
        new_commits: bool,
    },
    MergeSucceeded {
        agent_id: AgentId,
        branch: String,
        base_branch: String,
    },
    MergeConflicts {
        agent_id: AgentId,
        branch: String,
        files: Vec<String>,
    },
    MergeFailed {
        agent_id: AgentId,
        branch: String,
        error: String,
    },
    PreviewStarted {
        agent_id: AgentId,
        branch: String,
    },
    PreviewStopped {
        agent_id: AgentId,
    },
    PreviewFailed {
        agent_id: AgentId,
        error: String,
    },
    CleanupReport(Vec<CleanupEntry>),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::AgentFinished {
                agent_id,
                branch,
                exit_code,
                has_changes,
            } => {
                write!(f, "agent {} ({}) finished", agent_id, branch)?;
                if let Some(code) = exit_code {
                    write!(f, " with exit code {}", code)?;
                }
                if *has_changes {
                    write!(f, "; changes ready for review")?;
                }
                Ok(())
            }
            Notification::AgentWaiting {
                agent_id,
                branch,
                reason,
            } => write!(f, "agent {} ({}) is waiting for {}", agent_id, branch, reason),
            Notification::WindowVanished { agent_id, branch } => {
                write!(f, "agent {} ({}) window vanished", agent_id, branch)
            }
            Notification::ReviewClosed {
                agent_id,
                branch,
                new_commits,
            } => {
                if *new_commits {
                    write!(f, "review of agent {} ({}) closed with new commits", agent_id, branch)
                } else {
                    write!(f, "review of agent {} ({}) closed without commits", agent_id, branch)
                }
            }
            Notification::MergeSucceeded {
                agent_id,
                branch,
                base_branch,
            } => write!(f, "merged agent {} ({}) into {}", agent_id, branch, base_branch),
            Notification::MergeConflicts {
                agent_id,
                branch,
                files,
            } => write!(
                f,
                "merge of agent {} ({}) has conflicts: {}",
                agent_id,
                branch,
                files.join(", ")
            ),
            Notification::MergeFailed {
                agent_id,
                branch,
                error,
            } => write!(f, "merge of agent {} ({}) failed: {}", agent_id, branch, error),
            Notification::PreviewStarted { agent_id, branch } => {
                write!(f, "previewing agent {} on {}", agent_id, branch)
            }
            Notification::PreviewStopped { agent_id } => {
                write!(f, "preview of agent {} stopped", agent_id)
            }
            Notification::PreviewFailed { agent_id, error } => {
                write!(f, "preview of agent {} failed: {}", agent_id, error)
            }
            Notification::CleanupReport(entries) => {
                if entries.is_empty() {
                    return write!(f, "cleanup: nothing to remove");
                }
                write!(f, "cleanup removed {} agent(s)", entries.len())?;
                for entry in entries {
                    write!(f, "\n  {} ({}): {}", entry.agent_id, entry.branch, entry.reason)?;
                }
                Ok(())
            }
        }
    }
}

/// Sending half of the notification channel
///
/// A closed or absent receiver is not an error; notifications are dropped.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    /// Create a notifier and the receiver the presentation layer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, notification: Notification) {
        tracing::debug!(%notification, "Notification");
        if let Some(tx) = &self.tx {
            let _ = tx.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.send(Notification::PreviewStopped { agent_id: 1 });
        notifier.send(Notification::WindowVanished {
            agent_id: 2,
            branch: "feat/x".to_string(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::PreviewStopped { agent_id: 1 }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            Notification::WindowVanished { agent_id: 2, .. }
        ));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.send(Notification::PreviewStopped { agent_id: 1 });
        Notifier::disabled().send(Notification::PreviewStopped { agent_id: 1 });
    }

    #[test]
    fn test_cleanup_report_display() {
        let report = Notification::CleanupReport(vec![CleanupEntry {
            agent_id: 4,
            branch: "feat/old".to_string(),
            reason: CleanupReason::BranchMerged,
        }]);
        assert_eq!(
            report.to_string(),
            "cleanup removed 1 agent(s)\n  4 (feat/old): branch already merged into base"
        );
    }
}
