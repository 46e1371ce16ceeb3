//! Orchestration controller
//!
//! [`Orchestrator`] owns the agent store and drives both user-triggered
//! operations (spawn, dismiss, focus, review, merge, preview, cleanup,
//! recovery) and the periodic [`Monitor`]. User operations block on external
//! tools and are meant to run on a blocking thread; the monitor bounds every
//! external call it makes.

mod lifecycle;
mod merge;
mod monitor;
mod preview;
mod recovery;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::activity::Classifier;
use crate::agent::{Agent, AgentStore};
use crate::config::Config;
use crate::git::{GitRepo, VersionControl};
use crate::notify::Notifier;
use crate::persist::{Persister, PreviewSession, StatePaths};
use crate::tmux::{Multiplexer, Tmux};
use crate::Result;

pub use merge::MergeReport;
pub use monitor::Monitor;

/// The single system-wide preview slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum PreviewSlot {
    #[default]
    Idle,
    /// A start or stop is in progress
    Claiming,
    Active(PreviewSession),
}

/// Coordinates agents, their tools and their persisted state
pub struct Orchestrator {
    config: Config,
    paths: StatePaths,
    worktree_dir: PathBuf,
    repo_name: String,
    vcs: Arc<dyn VersionControl>,
    mux: Arc<dyn Multiplexer>,
    store: Arc<AgentStore>,
    classifier: Mutex<Classifier>,
    preview: Mutex<PreviewSlot>,
    persister: Persister,
    notifier: Notifier,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("repo_name", &self.repo_name)
            .field("state_dir", &self.paths.dir())
            .field("agents", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        config: Config,
        paths: StatePaths,
        worktree_dir: PathBuf,
        vcs: Arc<dyn VersionControl>,
        mux: Arc<dyn Multiplexer>,
        notifier: Notifier,
    ) -> Self {
        let repo_name = vcs
            .root()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo")
            .to_string();
        let classifier = Classifier::new(
            config.patterns.clone(),
            config.monitor.classifier_settings(),
        );
        let persister = Persister::new(paths.state_file(), config.monitor.persist_interval);

        Self {
            config,
            paths,
            worktree_dir,
            repo_name,
            vcs,
            mux,
            store: Arc::new(AgentStore::new()),
            classifier: Mutex::new(classifier),
            preview: Mutex::new(PreviewSlot::Idle),
            persister,
            notifier,
        }
    }

    /// Build an orchestrator for the repository containing `path`, using git
    /// and tmux
    pub fn open(config: Config, path: &Path, notifier: Notifier) -> Result<Self> {
        let repo = GitRepo::open(path)?;
        let paths = StatePaths::new(config.state_dir(&repo.repo_name())?);
        let worktree_dir = config.worktree_dir()?;
        let mux = Tmux::new(config.tmux.session.clone());

        tracing::info!(
            repo = %repo.root().display(),
            state_dir = %paths.dir().display(),
            "Opened repository"
        );

        Ok(Self::new(
            config,
            paths,
            worktree_dir,
            Arc::new(repo),
            Arc::new(mux),
            notifier,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }

    /// Main working directory of the repository
    pub fn repo_root(&self) -> &Path {
        self.vcs.root()
    }

    /// Branch checked out in the main working directory, the usual base for
    /// new agents
    pub fn current_branch(&self) -> Result<String> {
        self.vcs
            .current_branch(self.vcs.root())?
            .ok_or_else(|| crate::Error::Other("Main directory is on a detached HEAD".to_string()))
    }

    /// The active preview, if any
    pub fn active_preview(&self) -> Option<PreviewSession> {
        match &*self.preview.lock() {
            PreviewSlot::Active(session) => Some(session.clone()),
            PreviewSlot::Idle | PreviewSlot::Claiming => None,
        }
    }

    /// Write the store now if it changed, honoring the minimum interval
    pub fn persist(&self) -> bool {
        self.persister.save(&self.store, false)
    }

    /// Preview cleanup and a final forced save; safe to call more than once
    pub fn shutdown(&self) {
        match self.cleanup_preview() {
            Ok(true) => tracing::info!("Preview cleaned up on shutdown"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Preview cleanup on shutdown failed"),
        }
        self.persister.save(&self.store, true);
    }

    /// Whether an agent has work worth reviewing: uncommitted changes, or
    /// commits on its branch that its base does not contain
    fn has_changes(&self, agent: &Agent) -> Result<bool> {
        if self.vcs.has_uncommitted_changes(agent.worktree())? {
            return Ok(true);
        }
        let head = self.vcs.head(agent.worktree())?;
        Ok(!self.vcs.is_ancestor(&head, agent.base_branch())?)
    }
}
