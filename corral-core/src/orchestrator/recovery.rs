//! Reconciling the store with reality: dead-agent cleanup and startup recovery

use chrono::Utc;

use super::{Orchestrator, PreviewSlot};
use crate::agent::{Agent, AgentId, AgentStatus};
use crate::notify::{CleanupEntry, CleanupReason, Notification};
use crate::persist::{load_agents, load_preview};
use crate::tmux::PaneInfo;
use crate::Result;

impl Orchestrator {
    /// Dismiss agents whose window, pane or worktree is gone, or whose
    /// branch is already merged into its base; branches are kept
    ///
    /// Agents the monitor already marked `dismissed` after their window
    /// vanished are torn down here too.
    pub fn cleanup_dead_agents(&self) -> Result<Vec<CleanupEntry>> {
        let panes = self.mux.list_panes()?;
        let mut removed = Vec::new();

        for agent in self.store.list() {
            let Some(reason) = self.dead_reason(&agent, &panes) else {
                continue;
            };
            tracing::info!(agent_id = agent.id(), branch = agent.branch(), %reason, "Cleaning up agent");
            if let Err(e) = self.dismiss(agent.id(), false) {
                tracing::warn!(agent_id = agent.id(), error = %e, "Cleanup dismiss failed");
                continue;
            }
            removed.push(CleanupEntry {
                agent_id: agent.id(),
                branch: agent.branch().to_string(),
                reason,
            });
        }

        self.notifier.send(Notification::CleanupReport(removed.clone()));
        Ok(removed)
    }

    fn dead_reason(&self, agent: &Agent, panes: &[PaneInfo]) -> Option<CleanupReason> {
        if !panes.iter().any(|p| p.window_id == agent.window_id()) {
            return Some(CleanupReason::WindowGone);
        }
        if !panes
            .iter()
            .any(|p| p.window_id == agent.window_id() && p.pane_id == agent.pane_id())
        {
            return Some(CleanupReason::PaneGone);
        }
        if !agent.worktree().exists() {
            return Some(CleanupReason::WorktreeMissing);
        }

        let merged = self.vcs.head(agent.worktree()).and_then(|head| {
            Ok(head != agent.fork_point() && self.vcs.is_ancestor(&head, agent.base_branch())?)
        });
        match merged {
            Ok(true) => Some(CleanupReason::BranchMerged),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(agent_id = agent.id(), error = %e, "Cannot check if branch is merged");
                None
            }
        }
    }

    /// Re-admit persisted agents whose pane and worktree still exist, and
    /// restore the persisted preview
    ///
    /// Returns the IDs that were re-admitted. Call [`Orchestrator::cleanup_preview`]
    /// afterwards to undo a preview left behind by a crash.
    pub fn recover_agents(&self) -> Result<Vec<AgentId>> {
        let snapshots = load_agents(&self.paths.state_file());
        let panes = if snapshots.is_empty() {
            Vec::new()
        } else {
            self.mux.list_panes()?
        };
        let now = Utc::now();
        let mut recovered = Vec::new();

        for snapshot in snapshots {
            let id = snapshot.id;
            if snapshot.status == AgentStatus::Dismissed || self.store.get(id).is_some() {
                continue;
            }
            let pane_alive = panes
                .iter()
                .any(|p| p.window_id == snapshot.window_id && p.pane_id == snapshot.pane_id);
            if !pane_alive || !snapshot.worktree.exists() {
                tracing::info!(
                    agent_id = id,
                    branch = %snapshot.branch,
                    pane_alive,
                    "Not recovering agent"
                );
                self.store.mark_dirty();
                continue;
            }
            self.store.insert(Agent::from_snapshot(snapshot, now));
            recovered.push(id);
        }

        if let Some(session) = load_preview(&self.paths.preview_file()) {
            let mut slot = self.preview.lock();
            if *slot == PreviewSlot::Idle {
                tracing::info!(agent_id = session.agent_id, "Found preview from previous run");
                *slot = PreviewSlot::Active(session);
            }
        }

        tracing::info!(recovered = recovered.len(), "Recovered agents");
        Ok(recovered)
    }
}
