//! Previewing one agent's work in the main working directory
//!
//! A preview checks out `preview/<id>`, built from the agent's base with the
//! agent branch merged in and its uncommitted changes copied over, so a
//! service running from the main directory picks the work up. Only one
//! preview exists at a time; the slot moves idle → claiming → active and
//! back, and whoever takes an active session out of the slot is the only
//! caller that restores the main directory.

use super::{Orchestrator, PreviewSlot};
use crate::agent::{AgentId, AgentStatus};
use crate::git::MergeOutcome;
use crate::notify::Notification;
use crate::persist::{clear_preview, preview_branch, save_preview, PreviewSession};
use crate::{Error, Result};

impl Orchestrator {
    /// Start previewing an agent
    pub fn preview(&self, id: AgentId) -> Result<()> {
        {
            let mut slot = self.preview.lock();
            if *slot != PreviewSlot::Idle {
                return Err(Error::PreviewActive);
            }
            *slot = PreviewSlot::Claiming;
        }

        match self.start_preview(id) {
            Ok(session) => {
                if let Err(e) = save_preview(&self.paths.preview_file(), &session) {
                    tracing::warn!(error = %e, "Failed to persist preview");
                }
                *self.preview.lock() = PreviewSlot::Active(session.clone());
                tracing::info!(agent_id = id, branch = %session.branch(), "Preview started");
                self.notifier.send(Notification::PreviewStarted {
                    agent_id: id,
                    branch: session.branch(),
                });
                Ok(())
            }
            Err(e) => {
                *self.preview.lock() = PreviewSlot::Idle;
                tracing::warn!(agent_id = id, error = %e, "Preview failed");
                self.notifier.send(Notification::PreviewFailed {
                    agent_id: id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn start_preview(&self, id: AgentId) -> Result<PreviewSession> {
        let agent = self.store.require(id)?;
        let status = agent.status();
        if !status.is_previewable() {
            return Err(Error::InvalidStatus {
                id,
                status,
                operation: "preview",
            });
        }

        let root = self.vcs.root();
        if self.vcs.has_uncommitted_changes(root)? {
            return Err(Error::UncommittedChanges(root.display().to_string()));
        }
        let previous_branch = self
            .vcs
            .current_branch(root)?
            .ok_or_else(|| Error::Other("Main directory is on a detached HEAD".to_string()))?;

        let branch = preview_branch(id);
        if self.vcs.branch_exists(&branch)? {
            tracing::debug!(%branch, "Removing stale preview branch");
            self.vcs.delete_branch(&branch)?;
        }
        self.vcs.create_branch(&branch, agent.base_branch())?;

        let built = self.build_preview(&branch, agent.branch(), agent.worktree());
        if let Err(e) = built {
            self.roll_back_preview(&previous_branch, &branch);
            return Err(e);
        }

        if let Err(e) = agent.transition(AgentStatus::Previewing) {
            self.roll_back_preview(&previous_branch, &branch);
            return Err(e);
        }
        self.store.mark_dirty();

        Ok(PreviewSession {
            agent_id: id,
            previous_branch,
            previous_status: status,
        })
    }

    /// Check out the preview branch and layer the agent's work onto it
    fn build_preview(
        &self,
        branch: &str,
        agent_branch: &str,
        worktree: &std::path::Path,
    ) -> Result<()> {
        let root = self.vcs.root();
        self.vcs.checkout(root, branch)?;

        if let MergeOutcome::Conflicts(files) = self.vcs.merge(root, agent_branch)? {
            return Err(Error::Git(format!(
                "Preview merge of {} conflicts in: {}",
                agent_branch,
                files.join(", ")
            )));
        }

        if self.vcs.has_uncommitted_changes(worktree)? {
            self.vcs.copy_uncommitted(worktree, root)?;
        }
        Ok(())
    }

    /// Undo a half-built preview; every step is attempted
    fn roll_back_preview(&self, previous_branch: &str, branch: &str) {
        let root = self.vcs.root();
        if self.vcs.conflicted_paths(root).is_ok_and(|files| !files.is_empty()) {
            self.best_effort("abort merge", || self.vcs.abort_merge(root));
        }
        self.best_effort("discard changes", || self.vcs.discard_changes(root));
        self.best_effort("restore branch", || self.vcs.checkout(root, previous_branch));
        self.best_effort("delete preview branch", || self.vcs.delete_branch(branch));
    }

    /// Stop the active preview and restore the main directory
    pub fn stop_preview(&self) -> Result<()> {
        let session = {
            let mut slot = self.preview.lock();
            match std::mem::replace(&mut *slot, PreviewSlot::Claiming) {
                PreviewSlot::Active(session) => session,
                other => {
                    *slot = other;
                    return Err(Error::NoPreview);
                }
            }
        };

        let result = self.restore_from_preview(&session);
        *self.preview.lock() = PreviewSlot::Idle;

        match &result {
            Ok(()) => {
                tracing::info!(agent_id = session.agent_id, "Preview stopped");
                self.notifier.send(Notification::PreviewStopped {
                    agent_id: session.agent_id,
                });
            }
            Err(e) => {
                tracing::warn!(agent_id = session.agent_id, error = %e, "Preview cleanup incomplete");
                self.notifier.send(Notification::PreviewFailed {
                    agent_id: session.agent_id,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    /// Stop the preview if one is active; returns whether one was
    ///
    /// Used at startup for a preview left behind by a crash and at shutdown.
    pub fn cleanup_preview(&self) -> Result<bool> {
        match self.stop_preview() {
            Ok(()) => Ok(true),
            Err(Error::NoPreview) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn restore_from_preview(&self, session: &PreviewSession) -> Result<()> {
        let root = self.vcs.root();
        let branch = session.branch();
        let mut first_error = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        record(self.vcs.discard_changes(root));
        record(self.vcs.checkout(root, &session.previous_branch));
        record(self.vcs.delete_branch(&branch));

        if let Some(agent) = self.store.get(session.agent_id) {
            if agent.status() == AgentStatus::Previewing {
                record(agent.transition(session.previous_status).map(|_| ()));
                self.store.mark_dirty();
            }
        }

        if let Err(e) = clear_preview(&self.paths.preview_file()) {
            tracing::warn!(error = %e, "Failed to remove preview file");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
