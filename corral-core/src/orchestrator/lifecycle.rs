//! Spawning, dismissing, focusing and reviewing agents

use std::path::Path;
use std::sync::Arc;

use super::Orchestrator;
use crate::activity::{install_hook_settings, STATUS_FILE_ENV};
use crate::agent::{Agent, AgentId, AgentIdentity, AgentStatus};
use crate::git::worktree_path;
use crate::tmux::{PaneRef, WindowSpec};
use crate::{Error, Result};

/// Which teardown steps to run for an agent that is going away
#[derive(Debug, Clone, Copy)]
pub(super) struct Teardown {
    pub graceful: bool,
    pub remove_worktree: bool,
    pub delete_branch: bool,
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Orchestrator {
    /// Start a new agent on `branch`
    ///
    /// With `create_branch` the branch is created from `base`; otherwise it
    /// must already exist. A branch held by another agent or checked out in
    /// any worktree is rejected before anything is touched.
    pub fn spawn(&self, branch: &str, base: &str, create_branch: bool) -> Result<Arc<Agent>> {
        if self.store.find_by_branch(branch).is_some() {
            return Err(Error::BranchInUse(branch.to_string()));
        }
        if create_branch {
            if self.vcs.branch_exists(branch)? {
                return Err(Error::BranchInUse(branch.to_string()));
            }
        } else {
            if !self.vcs.branch_exists(branch)? {
                return Err(Error::Git(format!("Branch '{}' does not exist", branch)));
            }
            if self.vcs.is_checked_out(branch)? {
                return Err(Error::BranchInUse(branch.to_string()));
            }
        }

        let worktree = worktree_path(&self.worktree_dir, &self.repo_name, branch);
        if worktree.exists() {
            return Err(Error::Other(format!(
                "Worktree path already exists: {}",
                worktree.display()
            )));
        }

        let id = self.store.allocate_id();

        if create_branch {
            self.vcs.create_branch(branch, base)?;
        }
        if let Err(e) = self.vcs.add_worktree(&worktree, branch) {
            if create_branch {
                self.best_effort("delete branch", || self.vcs.delete_branch(branch));
            }
            return Err(e);
        }

        let launched = self.launch(id, branch, &worktree);
        let (pane, fork_point) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                tracing::warn!(branch, error = %e, "Spawn failed, removing worktree");
                self.best_effort("remove worktree", || self.vcs.remove_worktree(&worktree));
                if create_branch {
                    self.best_effort("delete branch", || self.vcs.delete_branch(branch));
                }
                return Err(e);
            }
        };

        let identity = AgentIdentity {
            branch: branch.to_string(),
            base_branch: base.to_string(),
            worktree,
            window_id: pane.window_id,
            pane_id: pane.pane_id,
            fork_point,
        };
        let agent = self.store.insert(Agent::new(identity).with_id(id));
        tracing::info!(agent_id = id, branch, base, "Spawned agent");
        Ok(agent)
    }

    /// Install hooks and open the agent window
    fn launch(&self, id: AgentId, branch: &str, worktree: &Path) -> Result<(PaneRef, String)> {
        let fork_point = self.vcs.resolve(branch)?;

        let status_file = self.paths.status_file(id);
        let settings_file = self.paths.hook_settings_file(id);
        let _ = std::fs::remove_file(&status_file);
        install_hook_settings(&settings_file, &self.config.agent.hook_command, &status_file)?;

        let agent_config = &self.config.agent;
        let command = if agent_config.settings_flag.is_empty() {
            agent_config.command.clone()
        } else {
            format!(
                "{} {} {}",
                agent_config.command,
                agent_config.settings_flag,
                shell_quote(&settings_file.to_string_lossy())
            )
        };

        let spec = WindowSpec {
            name: branch.to_string(),
            cwd: worktree.to_path_buf(),
            command,
            env: vec![(
                STATUS_FILE_ENV.to_string(),
                status_file.to_string_lossy().into_owned(),
            )],
            unset_env: agent_config.scrub_env.clone(),
        };
        let pane = self.mux.new_window(&spec)?;
        Ok((pane, fork_point))
    }

    /// Stop an agent and tear down everything it owns
    ///
    /// Each teardown step is attempted even when an earlier one fails.
    pub fn dismiss(&self, id: AgentId, delete_branch: bool) -> Result<()> {
        let agent = self.store.require(id)?;

        if self.active_preview().is_some_and(|s| s.agent_id == id) {
            if let Err(e) = self.stop_preview() {
                tracing::warn!(agent_id = id, error = %e, "Failed to stop preview before dismiss");
            }
        }

        self.teardown(
            &agent,
            Teardown {
                graceful: true,
                remove_worktree: true,
                delete_branch,
            },
        );

        if let Err(e) = agent.transition(AgentStatus::Dismissed) {
            tracing::debug!(agent_id = id, error = %e, "Dismissed agent had unexpected status");
        }
        self.store.remove(id);
        tracing::info!(agent_id = id, branch = agent.branch(), delete_branch, "Dismissed agent");
        Ok(())
    }

    /// Best-effort teardown shared by dismiss, merge and cleanup
    pub(super) fn teardown(&self, agent: &Agent, steps: Teardown) {
        if steps.graceful {
            self.stop_gracefully(agent);
        }
        if let Some(review_pane) = agent.review_pane() {
            self.best_effort("kill review pane", || self.mux.kill_pane(&review_pane));
        }
        self.best_effort("kill window", || self.mux.kill_window(agent.window_id()));
        if steps.remove_worktree {
            self.best_effort("remove worktree", || self.vcs.remove_worktree(agent.worktree()));
        }
        if steps.delete_branch {
            self.best_effort("delete branch", || self.vcs.delete_branch(agent.branch()));
        }

        self.classifier.lock().forget(agent.id());
        let _ = std::fs::remove_file(self.paths.status_file(agent.id()));
        let _ = std::fs::remove_file(self.paths.hook_settings_file(agent.id()));
    }

    /// Interrupt, ask for a clean exit, then wait out the grace period
    fn stop_gracefully(&self, agent: &Agent) {
        match self.mux.pane_exists(agent.window_id(), agent.pane_id()) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::debug!(agent_id = agent.id(), error = %e, "Cannot check pane before stop");
                return;
            }
        }
        self.best_effort("interrupt", || self.mux.send_keys(agent.pane_id(), &["C-c"]));
        let exit_keys = self.config.agent.exit_keys.as_str();
        if !exit_keys.is_empty() {
            self.best_effort("send exit", || {
                self.mux.send_keys(agent.pane_id(), &[exit_keys, "Enter"])
            });
        }
        if !self.config.agent.grace_period.is_zero() {
            std::thread::sleep(self.config.agent.grace_period);
        }
    }

    /// Bring an agent's window (and review pane, when open) to the front
    pub fn focus(&self, id: AgentId) -> Result<()> {
        let agent = self.store.require(id)?;
        self.mux.select_window(agent.window_id())?;
        let pane = agent.review_pane().unwrap_or_else(|| agent.pane_id().to_string());
        self.mux.select_pane(&pane)
    }

    /// Open the review tool beside an agent
    ///
    /// Agents in `review_ready` or `reviewed` move to `reviewing`; agents in
    /// `conflicts` keep their status so the monitor can finish the merge.
    pub fn open_review(&self, id: AgentId) -> Result<()> {
        let agent = self.store.require(id)?;
        let status = agent.status();
        if !status.is_reviewable() {
            return Err(Error::InvalidStatus {
                id,
                status,
                operation: "review",
            });
        }
        if let Some(pane) = agent.review_pane() {
            return self.mux.select_pane(&pane);
        }

        let head = self.vcs.head(agent.worktree())?;
        let review = &self.config.review;
        let pane = self.mux.split_pane(
            agent.pane_id(),
            review.split,
            review.size_percent,
            agent.worktree(),
            &review.command,
        )?;

        if let Err(e) = agent.begin_review(pane.clone(), head) {
            self.best_effort("kill review pane", || self.mux.kill_pane(&pane));
            return Err(e);
        }
        self.store.mark_dirty();
        tracing::info!(agent_id = id, pane_id = %pane, "Opened review");
        Ok(())
    }

    /// Run one teardown step, logging instead of failing
    pub(super) fn best_effort(&self, step: &str, f: impl FnOnce() -> Result<()>) {
        if let Err(e) = f() {
            tracing::warn!(step, error = %e, "Teardown step failed");
        }
    }
}
