//! Periodic reconciliation of agents against tmux and git
//!
//! Every external call made here runs on a blocking thread bounded by
//! `monitor.call_timeout`. A timeout or failure skips the affected agent
//! until the next tick; nothing propagates out of the loop.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Orchestrator;
use crate::activity::{Activity, HookStatus};
use crate::agent::{Agent, AgentStatus, WaitingFor};
use crate::notify::Notification;
use crate::tmux::PaneInfo;
use crate::Result;

/// How an agent stopped working
#[derive(Debug, Clone, Copy)]
enum Finish {
    /// The process exited
    Exited(Option<i32>),
    /// The process is alive but reported the end of its turn
    Idle,
}

/// Background task driving [`Orchestrator::tick`]
#[derive(Debug)]
pub struct Monitor {
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(orchestrator: Arc<Orchestrator>, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            cancel,
        }
    }

    /// Run on the current runtime until the token is cancelled
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Tick until cancelled, then save and clean up the preview
    pub async fn run(self) {
        let mut interval = time::interval(self.orchestrator.config.monitor.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            poll_interval = ?self.orchestrator.config.monitor.poll_interval,
            "Monitor started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.orchestrator.tick().await,
            }
        }

        tracing::info!("Monitor stopping");
        let orchestrator = Arc::clone(&self.orchestrator);
        if let Err(e) = tokio::task::spawn_blocking(move || orchestrator.shutdown()).await {
            tracing::warn!(error = %e, "Shutdown task failed");
        }
    }
}

impl Orchestrator {
    /// One monitor pass over every agent, followed by a debounced save
    pub async fn tick(self: &Arc<Self>) {
        let Some(panes) = self.blocking("list panes", |o| o.mux.list_panes()).await else {
            return;
        };

        for agent in self.store.list() {
            if agent.status().is_monitored() {
                self.poll_agent(&agent, &panes).await;
            }
        }

        let this = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || this.persist()).await {
            tracing::warn!(error = %e, "Persist task failed");
        }
    }

    /// Run a blocking external call with the monitor's timeout
    async fn blocking<T, F>(self: &Arc<Self>, operation: &'static str, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Orchestrator) -> Result<T> + Send + 'static,
    {
        let this = Arc::clone(self);
        let call = tokio::task::spawn_blocking(move || f(&this));
        match time::timeout(self.config.monitor.call_timeout, call).await {
            Ok(Ok(Ok(value))) => Some(value),
            Ok(Ok(Err(e))) => {
                tracing::warn!(operation, error = %e, "Monitor call failed");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(operation, error = %e, "Monitor call panicked");
                None
            }
            Err(_) => {
                tracing::debug!(operation, "Monitor call timed out, retrying next tick");
                None
            }
        }
    }

    async fn poll_agent(self: &Arc<Self>, agent: &Arc<Agent>, panes: &[PaneInfo]) {
        let Some(pane) = panes.iter().find(|p| p.pane_id == agent.pane_id()) else {
            self.mark_vanished(agent);
            return;
        };

        match agent.status() {
            AgentStatus::Reviewing => return self.poll_review(agent, panes).await,
            AgentStatus::Conflicts => return self.poll_conflicts(agent, panes).await,
            AgentStatus::Previewing | AgentStatus::Reviewed => {
                if pane.dead && agent.set_finished(pane.exit_status) {
                    self.store.mark_dirty();
                }
                return;
            }
            _ => {}
        }

        if pane.dead {
            return self.handle_finished(agent, Finish::Exited(pane.exit_status)).await;
        }

        // A hook report is authoritative; captured content only counts as
        // confirmed work when a working line is on screen
        let (activity, confirmed) = match self.hook_activity(agent) {
            Some(activity) => (activity, true),
            None => {
                let pane_id = agent.pane_id().to_string();
                let lines = self.config.monitor.capture_lines;
                let Some(content) = self
                    .blocking("capture pane", move |o| o.mux.capture_pane(&pane_id, lines))
                    .await
                else {
                    return;
                };
                let mut classifier = self.classifier.lock();
                let activity = classifier.observe_capture(agent.id(), &content);
                let confirmed = classifier.classify_stable(&content) == Activity::Active;
                (activity, confirmed)
            }
        };

        self.apply_activity(agent, activity, confirmed).await;
    }

    /// Fresh sidecar report for an agent, if any
    fn hook_activity(&self, agent: &Agent) -> Option<Activity> {
        let status = HookStatus::read(&self.paths.status_file(agent.id()))?;
        self.classifier.lock().from_hook(&status, Utc::now())
    }

    /// Apply a classification to the lifecycle
    ///
    /// Finished agents only resume on `confirmed` activity, so a capture that
    /// merely has not settled yet cannot pull them back to `running`.
    async fn apply_activity(
        self: &Arc<Self>,
        agent: &Arc<Agent>,
        activity: Activity,
        confirmed: bool,
    ) {
        let status = agent.status();
        match activity {
            Activity::Active => {
                if !agent.ever_active() {
                    agent.mark_active();
                    self.store.mark_dirty();
                }
                let resume = match status {
                    AgentStatus::Waiting => true,
                    AgentStatus::ReviewReady | AgentStatus::Done => confirmed,
                    _ => false,
                };
                if resume {
                    self.set_status(agent, AgentStatus::Running);
                }
            }
            Activity::Waiting {
                reason,
                has_numbered_list,
            } => {
                if !status.is_active() {
                    return;
                }
                let reason = if reason == WaitingFor::Unknown && has_numbered_list {
                    WaitingFor::Input
                } else {
                    reason
                };
                match agent.set_waiting(reason) {
                    Ok(true) => {
                        self.store.mark_dirty();
                        self.notifier.send(Notification::AgentWaiting {
                            agent_id: agent.id(),
                            branch: agent.branch().to_string(),
                            reason,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(agent_id = agent.id(), error = %e, "Cannot mark agent waiting"),
                }
            }
            Activity::Idle => {
                if status.is_active() && agent.ever_active() {
                    self.handle_finished(agent, Finish::Idle).await;
                }
            }
            Activity::Exited { exit_code } => {
                self.handle_finished(agent, Finish::Exited(exit_code)).await
            }
        }
    }

    /// The process exited (or went idle after working): hand it to review
    /// when it left changes behind
    async fn handle_finished(self: &Arc<Self>, agent: &Arc<Agent>, finish: Finish) {
        if let Finish::Exited(exit_code) = finish {
            if agent.set_finished(exit_code) {
                self.store.mark_dirty();
            }
        }
        if !agent.status().is_active() {
            return;
        }

        let target = Arc::clone(agent);
        let Some(has_changes) = self
            .blocking("check changes", move |o| o.has_changes(&target))
            .await
        else {
            return;
        };

        let to = if has_changes {
            AgentStatus::ReviewReady
        } else {
            AgentStatus::Done
        };
        if self.set_status(agent, to) {
            self.notifier.send(Notification::AgentFinished {
                agent_id: agent.id(),
                branch: agent.branch().to_string(),
                exit_code: agent.exit_code(),
                has_changes,
            });
        }
    }

    async fn poll_review(self: &Arc<Self>, agent: &Arc<Agent>, panes: &[PaneInfo]) {
        if self.review_pane_open(agent, panes) {
            return;
        }

        let worktree = agent.worktree().to_path_buf();
        let Some(head) = self.blocking("read head", move |o| o.vcs.head(&worktree)).await else {
            return;
        };

        let new_commits = agent.end_review().map_or(true, |before| before != head);
        let to = if new_commits {
            AgentStatus::Reviewed
        } else {
            AgentStatus::ReviewReady
        };
        self.set_status(agent, to);
        self.store.mark_dirty();
        self.notifier.send(Notification::ReviewClosed {
            agent_id: agent.id(),
            branch: agent.branch().to_string(),
            new_commits,
        });
    }

    /// Finish a conflicted merge once the tree is clean and no review pane
    /// is open; a clean tree without base merged in means the merge was
    /// aborted
    async fn poll_conflicts(self: &Arc<Self>, agent: &Arc<Agent>, panes: &[PaneInfo]) {
        if self.review_pane_open(agent, panes) {
            return;
        }
        if agent.review_pane().is_some() {
            agent.end_review();
            self.store.mark_dirty();
        }

        let target = Arc::clone(agent);
        let Some(resolved) = self
            .blocking("check resolution", move |o| {
                if o.vcs.has_uncommitted_changes(target.worktree())? {
                    return Ok(None);
                }
                Ok(Some(o.vcs.is_ancestor(target.base_branch(), target.branch())?))
            })
            .await
        else {
            return;
        };

        match resolved {
            None => {}
            Some(true) => {
                let preferences = agent.merge_preferences().unwrap_or_default();
                let this = Arc::clone(self);
                let target = Arc::clone(agent);
                let result = tokio::task::spawn_blocking(move || {
                    this.complete_merge(&target, preferences)
                })
                .await;
                match result {
                    Ok(Ok(_)) => {}
                    // Already reported; hand the agent back so the failure
                    // is not retried and reported every tick
                    Ok(Err(_)) => {
                        self.set_status(agent, AgentStatus::ReviewReady);
                    }
                    Err(e) => {
                        tracing::warn!(agent_id = agent.id(), error = %e, "Merge completion task failed");
                    }
                }
            }
            Some(false) => {
                tracing::info!(agent_id = agent.id(), "Conflicted merge was aborted");
                self.set_status(agent, AgentStatus::ReviewReady);
                self.notifier.send(Notification::MergeFailed {
                    agent_id: agent.id(),
                    branch: agent.branch().to_string(),
                    error: "merge aborted".to_string(),
                });
            }
        }
    }

    /// Whether the agent's review pane is still alive; a dead one is closed
    fn review_pane_open(&self, agent: &Agent, panes: &[PaneInfo]) -> bool {
        let Some(review_pane) = agent.review_pane() else {
            return false;
        };
        match panes.iter().find(|p| p.pane_id == review_pane) {
            Some(pane) if !pane.dead => true,
            Some(_) => {
                self.best_effort("close review pane", || self.mux.kill_pane(&review_pane));
                false
            }
            None => false,
        }
    }

    fn mark_vanished(&self, agent: &Agent) {
        match agent.transition(AgentStatus::Dismissed) {
            Ok(_) => {
                self.store.mark_dirty();
                self.classifier.lock().forget(agent.id());
                tracing::warn!(agent_id = agent.id(), branch = agent.branch(), "Agent window vanished");
                self.notifier.send(Notification::WindowVanished {
                    agent_id: agent.id(),
                    branch: agent.branch().to_string(),
                });
            }
            Err(e) => tracing::warn!(agent_id = agent.id(), error = %e, "Cannot dismiss vanished agent"),
        }
    }

    /// Transition and mark dirty; returns whether the status changed
    fn set_status(&self, agent: &Agent, to: AgentStatus) -> bool {
        match agent.transition(to) {
            Ok(from) if from != to => {
                self.store.mark_dirty();
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(agent_id = agent.id(), error = %e, "Monitor transition rejected");
                false
            }
        }
    }
}
