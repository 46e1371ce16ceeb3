//! Merging an agent's branch into its base

use super::lifecycle::Teardown;
use super::Orchestrator;
use crate::agent::{Agent, AgentId, AgentStatus, MergePreferences};
use crate::git::MergeOutcome;
use crate::notify::Notification;
use crate::{Error, Result};

/// What a merge request did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeReport {
    /// Base now points at this commit and the agent is gone
    Merged { head: String },
    /// The agent is parked in `conflicts` with these files unresolved
    Conflicts(Vec<String>),
}

impl Orchestrator {
    /// Merge an agent's work into its base branch
    ///
    /// Base is merged into the agent branch first, inside the agent's
    /// worktree, so a clean result can always fast-forward base. Conflicts
    /// park the agent in `conflicts` and remember the cleanup choices for
    /// when the monitor sees the resolution.
    pub fn merge_agent(
        &self,
        id: AgentId,
        delete_branch: bool,
        remove_worktree: bool,
    ) -> Result<MergeReport> {
        let agent = self.store.require(id)?;
        let status = agent.status();
        if !status.is_mergeable() {
            return Err(Error::InvalidStatus {
                id,
                status,
                operation: "merge",
            });
        }
        if self.vcs.has_uncommitted_changes(agent.worktree())? {
            return Err(Error::UncommittedChanges(agent.worktree().display().to_string()));
        }

        let preferences = MergePreferences {
            delete_branch,
            remove_worktree,
        };

        let outcome = match self.vcs.merge(agent.worktree(), agent.base_branch()) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.notify_merge_failed(&agent, &e);
                return Err(e);
            }
        };

        match outcome {
            MergeOutcome::Conflicts(files) => {
                agent.set_merge_preferences(preferences);
                agent.transition(AgentStatus::Conflicts)?;
                self.store.mark_dirty();
                tracing::info!(agent_id = id, files = files.len(), "Merge stopped with conflicts");
                self.notifier.send(Notification::MergeConflicts {
                    agent_id: id,
                    branch: agent.branch().to_string(),
                    files: files.clone(),
                });
                Ok(MergeReport::Conflicts(files))
            }
            MergeOutcome::Clean | MergeOutcome::AlreadyUpToDate => {
                let head = self.complete_merge(&agent, preferences)?;
                Ok(MergeReport::Merged { head })
            }
        }
    }

    /// Fast-forward base to the agent's HEAD, then clean the agent up
    pub(super) fn complete_merge(
        &self,
        agent: &Agent,
        preferences: MergePreferences,
    ) -> Result<String> {
        match self.fast_forward_base(agent) {
            Ok(head) => {
                self.teardown(
                    agent,
                    Teardown {
                        graceful: false,
                        remove_worktree: preferences.remove_worktree,
                        delete_branch: preferences.delete_branch,
                    },
                );
                self.store.remove(agent.id());
                tracing::info!(
                    agent_id = agent.id(),
                    branch = agent.branch(),
                    base = agent.base_branch(),
                    %head,
                    "Merged agent"
                );
                self.notifier.send(Notification::MergeSucceeded {
                    agent_id: agent.id(),
                    branch: agent.branch().to_string(),
                    base_branch: agent.base_branch().to_string(),
                });
                Ok(head)
            }
            Err(e) => {
                self.notify_merge_failed(agent, &e);
                Err(e)
            }
        }
    }

    fn fast_forward_base(&self, agent: &Agent) -> Result<String> {
        let head = self.vcs.head(agent.worktree())?;
        let base = agent.base_branch();
        if !self.vcs.is_ancestor(base, &head)? {
            return Err(Error::Git(format!(
                "Cannot fast-forward {} to {}: base has diverged",
                base, head
            )));
        }

        match self.vcs.worktree_for_branch(base)? {
            Some(dir) => self.vcs.merge_ff_only(&dir, &head)?,
            None => self.vcs.update_branch(base, &head)?,
        }
        Ok(head)
    }

    fn notify_merge_failed(&self, agent: &Agent, error: &Error) {
        tracing::warn!(agent_id = agent.id(), error = %error, "Merge failed");
        self.notifier.send(Notification::MergeFailed {
            agent_id: agent.id(),
            branch: agent.branch().to_string(),
            error: error.to_string(),
        });
    }
}
