//! In-memory collaborators for orchestrator tests
//!
//! [`FakeVcs`] models commits, branches, worktrees, dirty trees and merges
//! (including configured conflicts). [`FakeMux`] models windows and panes,
//! pane exits and captured content. Worktree directories are real so
//! existence checks behave as in production.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::Orchestrator;
use crate::agent::{Agent, AgentStatus};
use crate::config::Config;
use crate::git::{BranchInfo, MergeOutcome, VersionControl};
use crate::notify::{Notification, Notifier};
use crate::persist::StatePaths;
use crate::tmux::{Multiplexer, PaneInfo, PaneRef, SplitDirection, WindowSpec};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct VcsState {
    /// Commit ID to parent IDs
    commits: HashMap<String, Vec<String>>,
    next_commit: u32,
    branches: BTreeMap<String, String>,
    /// Directory to the branch checked out there
    checkouts: HashMap<PathBuf, String>,
    dirty: HashSet<PathBuf>,
    /// Directory to (incoming commit, conflicted files)
    merging: HashMap<PathBuf, (String, Vec<String>)>,
    /// Branch name to the files a merge involving it conflicts in
    conflicts: HashMap<String, Vec<String>>,
    checkout_log: Vec<String>,
}

impl VcsState {
    fn new_commit(&mut self, parents: Vec<String>) -> String {
        self.next_commit += 1;
        let id = format!("c{:04}", self.next_commit);
        self.commits.insert(id.clone(), parents);
        id
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        if let Some(commit) = self.branches.get(reference) {
            return Ok(commit.clone());
        }
        if self.commits.contains_key(reference) {
            return Ok(reference.to_string());
        }
        Err(Error::Git(format!("Cannot resolve '{}'", reference)))
    }

    fn contains(&self, ancestor: &str, descendant: &str) -> bool {
        let mut queue = VecDeque::from([descendant.to_string()]);
        let mut seen = HashSet::new();
        while let Some(commit) = queue.pop_front() {
            if commit == ancestor {
                return true;
            }
            if seen.insert(commit.clone()) {
                if let Some(parents) = self.commits.get(&commit) {
                    queue.extend(parents.iter().cloned());
                }
            }
        }
        false
    }

    fn branch_at(&self, dir: &Path) -> Result<String> {
        self.checkouts
            .get(dir)
            .cloned()
            .ok_or_else(|| Error::Git(format!("Not a worktree: {}", dir.display())))
    }
}

/// Version control double backed by an in-memory commit graph
#[derive(Debug)]
pub struct FakeVcs {
    root: PathBuf,
    state: Mutex<VcsState>,
}

impl FakeVcs {
    /// A repository at `root` with `main` checked out on one commit
    pub fn new(root: PathBuf) -> Self {
        std::fs::create_dir_all(&root).unwrap();
        let mut state = VcsState::default();
        let initial = state.new_commit(Vec::new());
        state.branches.insert("main".to_string(), initial);
        state.checkouts.insert(root.clone(), "main".to_string());
        Self {
            root,
            state: Mutex::new(state),
        }
    }

    /// Commit everything in `dir`, concluding an in-progress merge
    pub fn commit(&self, dir: &Path) -> String {
        let mut state = self.state.lock();
        let branch = state.branch_at(dir).unwrap();
        let head = state.branches[&branch].clone();
        let mut parents = vec![head];
        if let Some((incoming, _)) = state.merging.remove(dir) {
            parents.push(incoming);
        }
        let commit = state.new_commit(parents);
        state.branches.insert(branch, commit.clone());
        state.dirty.remove(dir);
        commit
    }

    /// Resolve and commit the conflicted merge in `dir`
    pub fn resolve_merge(&self, dir: &Path) -> String {
        assert!(self.state.lock().merging.contains_key(dir), "no merge in progress");
        self.commit(dir)
    }

    pub fn make_dirty(&self, dir: &Path) {
        self.state.lock().dirty.insert(dir.to_path_buf());
    }

    /// Make merges involving `branch` conflict
    pub fn set_conflict(&self, branch: &str, files: &[&str]) {
        self.state.lock().conflicts.insert(
            branch.to_string(),
            files.iter().map(|f| f.to_string()).collect(),
        );
    }

    pub fn clear_conflict(&self, branch: &str) {
        self.state.lock().conflicts.remove(branch);
    }

    /// Linked worktrees, not counting the main directory
    pub fn worktree_count(&self) -> usize {
        self.state.lock().checkouts.len() - 1
    }

    /// How many times `branch` was checked out
    pub fn checkouts_of(&self, branch: &str) -> usize {
        self.state
            .lock()
            .checkout_log
            .iter()
            .filter(|b| *b == branch)
            .count()
    }
}

impl VersionControl for FakeVcs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        let state = self.state.lock();
        let current = state.checkouts.get(&self.root);
        Ok(state
            .branches
            .keys()
            .map(|name| BranchInfo {
                name: name.clone(),
                is_current: current == Some(name),
            })
            .collect())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().branches.contains_key(name))
    }

    fn create_branch(&self, name: &str, start_point: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.branches.contains_key(name) {
            return Err(Error::BranchInUse(name.to_string()));
        }
        let commit = state.resolve(start_point)?;
        state.branches.insert(name.to_string(), commit);
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.checkouts.values().any(|b| b == name) {
            return Err(Error::Git(format!("Branch '{}' is checked out", name)));
        }
        state
            .branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::Git(format!("Branch '{}' not found", name)))
    }

    fn is_checked_out(&self, branch: &str) -> Result<bool> {
        Ok(self.state.lock().checkouts.values().any(|b| b == branch))
    }

    fn worktree_for_branch(&self, branch: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .state
            .lock()
            .checkouts
            .iter()
            .find(|(_, b)| *b == branch)
            .map(|(dir, _)| dir.clone()))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let state = self.state.lock();
        let ancestor = state.resolve(ancestor)?;
        let descendant = state.resolve(descendant)?;
        Ok(state.contains(&ancestor, &descendant))
    }

    fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.branches.contains_key(branch) {
            return Err(Error::Git(format!("Branch '{}' not found", branch)));
        }
        if state.checkouts.values().any(|b| b == branch) {
            return Err(Error::BranchInUse(branch.to_string()));
        }
        if path.exists() {
            return Err(Error::Git(format!("{} already exists", path.display())));
        }
        std::fs::create_dir_all(path)?;
        state.checkouts.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.checkouts.remove(path);
        state.dirty.remove(path);
        state.merging.remove(path);
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn has_uncommitted_changes(&self, dir: &Path) -> Result<bool> {
        let state = self.state.lock();
        state.branch_at(dir)?;
        Ok(state.dirty.contains(dir) || state.merging.contains_key(dir))
    }

    fn head(&self, dir: &Path) -> Result<String> {
        let state = self.state.lock();
        let branch = state.branch_at(dir)?;
        state.resolve(&branch)
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        self.state.lock().resolve(reference)
    }

    fn update_branch(&self, branch: &str, commit: &str) -> Result<()> {
        let mut state = self.state.lock();
        let commit = state.resolve(commit)?;
        state.branches.insert(branch.to_string(), commit);
        Ok(())
    }

    fn merge(&self, dir: &Path, reference: &str) -> Result<MergeOutcome> {
        let mut state = self.state.lock();
        let branch = state.branch_at(dir)?;
        let head = state.resolve(&branch)?;
        let incoming = state.resolve(reference)?;

        if state.contains(&incoming, &head) {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }
        if state.contains(&head, &incoming) {
            state.branches.insert(branch, incoming);
            return Ok(MergeOutcome::Clean);
        }

        let conflict = state
            .conflicts
            .get(&branch)
            .or_else(|| state.conflicts.get(reference))
            .cloned();
        if let Some(files) = conflict {
            state
                .merging
                .insert(dir.to_path_buf(), (incoming, files.clone()));
            return Ok(MergeOutcome::Conflicts(files));
        }

        let commit = state.new_commit(vec![head, incoming]);
        state.branches.insert(branch, commit);
        Ok(MergeOutcome::Clean)
    }

    fn abort_merge(&self, dir: &Path) -> Result<()> {
        self.state
            .lock()
            .merging
            .remove(dir)
            .map(|_| ())
            .ok_or_else(|| Error::Git("No merge in progress".to_string()))
    }

    fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .merging
            .get(dir)
            .map(|(_, files)| files.clone())
            .unwrap_or_default())
    }

    fn merge_ff_only(&self, dir: &Path, reference: &str) -> Result<()> {
        let mut state = self.state.lock();
        let branch = state.branch_at(dir)?;
        let head = state.resolve(&branch)?;
        let incoming = state.resolve(reference)?;
        if !state.contains(&head, &incoming) {
            return Err(Error::Git("Not possible to fast-forward".to_string()));
        }
        if state.dirty.contains(dir) {
            return Err(Error::Git(
                "Your local changes would be overwritten by merge".to_string(),
            ));
        }
        state.branches.insert(branch, incoming);
        Ok(())
    }

    fn copy_uncommitted(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.lock();
        if state.dirty.contains(from) {
            state.dirty.insert(to.to_path_buf());
        }
        Ok(())
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        Ok(Some(self.state.lock().branch_at(dir)?))
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.branches.contains_key(branch) {
            return Err(Error::Git(format!("Branch '{}' not found", branch)));
        }
        if state
            .checkouts
            .iter()
            .any(|(d, b)| b == branch && d.as_path() != dir)
        {
            return Err(Error::BranchInUse(branch.to_string()));
        }
        state.checkouts.insert(dir.to_path_buf(), branch.to_string());
        state.checkout_log.push(branch.to_string());
        Ok(())
    }

    fn discard_changes(&self, dir: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.dirty.remove(dir);
        state.merging.remove(dir);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MuxState {
    next_id: u32,
    panes: Vec<PaneInfo>,
    windows: Vec<WindowSpec>,
    /// (pane, space-joined keys) per send
    keys: Vec<(String, String)>,
    captures: HashMap<String, String>,
    selections: Vec<String>,
    fail_next_window: bool,
    delay: Duration,
}

impl MuxState {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn require_pane(&self, pane_id: &str) -> Result<&PaneInfo> {
        self.panes
            .iter()
            .find(|p| p.pane_id == pane_id)
            .ok_or_else(|| Error::Multiplexer(format!("can't find pane: {}", pane_id)))
    }

    fn add_pane(&mut self, window_id: String) -> String {
        let pane_id = format!("%{}", self.next());
        self.panes.push(PaneInfo {
            window_id,
            pane_id: pane_id.clone(),
            dead: false,
            exit_status: None,
        });
        pane_id
    }
}

/// Multiplexer double keeping windows and panes in memory
#[derive(Debug, Default)]
pub struct FakeMux {
    state: Mutex<MuxState>,
}

impl FakeMux {
    fn pause(&self) {
        let delay = self.state.lock().delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    /// Make every call sleep first
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    pub fn fail_next_window(&self) {
        self.state.lock().fail_next_window = true;
    }

    /// A window not opened through the orchestrator
    pub fn open_bare_window(&self) -> PaneRef {
        let mut state = self.state.lock();
        let window_id = format!("@{}", state.next());
        let pane_id = state.add_pane(window_id.clone());
        PaneRef { window_id, pane_id }
    }

    pub fn opened_windows(&self) -> Vec<WindowSpec> {
        self.state.lock().windows.clone()
    }

    pub fn sent_keys(&self, pane_id: &str) -> Vec<String> {
        self.state
            .lock()
            .keys
            .iter()
            .filter(|(pane, _)| pane == pane_id)
            .map(|(_, keys)| keys.clone())
            .collect()
    }

    pub fn selections(&self) -> Vec<String> {
        self.state.lock().selections.clone()
    }

    pub fn set_capture(&self, pane_id: &str, content: &str) {
        self.state
            .lock()
            .captures
            .insert(pane_id.to_string(), content.to_string());
    }

    /// The pane's process exits; the pane stays (remain-on-exit)
    pub fn exit_pane(&self, pane_id: &str, code: i32) {
        let mut state = self.state.lock();
        if let Some(pane) = state.panes.iter_mut().find(|p| p.pane_id == pane_id) {
            pane.dead = true;
            pane.exit_status = Some(code);
        }
    }

    /// The pane disappears, as if closed by the user
    pub fn close_pane(&self, pane_id: &str) {
        self.state.lock().panes.retain(|p| p.pane_id != pane_id);
    }

    pub fn close_window(&self, window_id: &str) {
        self.state.lock().panes.retain(|p| p.window_id != window_id);
    }

    /// Add a second pane next to `pane_id`
    pub fn split_extra_pane(&self, pane_id: &str) -> String {
        let mut state = self.state.lock();
        let window_id = state.require_pane(pane_id).unwrap().window_id.clone();
        state.add_pane(window_id)
    }
}

impl Multiplexer for FakeMux {
    fn new_window(&self, spec: &WindowSpec) -> Result<PaneRef> {
        self.pause();
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_window) {
            return Err(Error::Multiplexer("no server running".to_string()));
        }
        let window_id = format!("@{}", state.next());
        let pane_id = state.add_pane(window_id.clone());
        state.windows.push(spec.clone());
        Ok(PaneRef { window_id, pane_id })
    }

    fn split_pane(
        &self,
        target_pane: &str,
        _direction: SplitDirection,
        _size_percent: u8,
        _cwd: &Path,
        _command: &str,
    ) -> Result<String> {
        self.pause();
        let mut state = self.state.lock();
        let window_id = state.require_pane(target_pane)?.window_id.clone();
        Ok(state.add_pane(window_id))
    }

    fn kill_window(&self, window_id: &str) -> Result<()> {
        self.pause();
        let mut state = self.state.lock();
        if !state.panes.iter().any(|p| p.window_id == window_id) {
            return Err(Error::Multiplexer(format!("can't find window: {}", window_id)));
        }
        state.panes.retain(|p| p.window_id != window_id);
        Ok(())
    }

    fn kill_pane(&self, pane_id: &str) -> Result<()> {
        self.pause();
        let mut state = self.state.lock();
        state.require_pane(pane_id)?;
        state.panes.retain(|p| p.pane_id != pane_id);
        Ok(())
    }

    fn send_keys(&self, pane_id: &str, keys: &[&str]) -> Result<()> {
        self.pause();
        let mut state = self.state.lock();
        state.require_pane(pane_id)?;
        state.keys.push((pane_id.to_string(), keys.join(" ")));
        Ok(())
    }

    fn select_window(&self, window_id: &str) -> Result<()> {
        self.pause();
        let mut state = self.state.lock();
        if !state.panes.iter().any(|p| p.window_id == window_id) {
            return Err(Error::Multiplexer(format!("can't find window: {}", window_id)));
        }
        state.selections.push(window_id.to_string());
        Ok(())
    }

    fn select_pane(&self, pane_id: &str) -> Result<()> {
        self.pause();
        let mut state = self.state.lock();
        state.require_pane(pane_id)?;
        state.selections.push(pane_id.to_string());
        Ok(())
    }

    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        self.pause();
        Ok(self.state.lock().panes.clone())
    }

    fn capture_pane(&self, pane_id: &str, _lines: usize) -> Result<String> {
        self.pause();
        let state = self.state.lock();
        state.require_pane(pane_id)?;
        Ok(state.captures.get(pane_id).cloned().unwrap_or_default())
    }
}

/// An orchestrator wired to fakes inside a temporary directory
pub struct Harness {
    _temp: TempDir,
    worktree_dir: PathBuf,
    pub vcs: Arc<FakeVcs>,
    pub mux: Arc<FakeMux>,
    pub orchestrator: Arc<Orchestrator>,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_call_timeout(Duration::from_secs(3))
    }

    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new(temp.path().join("repo")));
        let mux = Arc::new(FakeMux::default());
        let worktree_dir = temp.path().join("worktrees");

        let mut config = Config::default();
        config.agent.grace_period = Duration::ZERO;
        config.monitor.persist_interval = Duration::ZERO;
        config.monitor.call_timeout = call_timeout;

        let (notifier, rx) = Notifier::channel();
        let orchestrator = Orchestrator::new(
            config,
            StatePaths::new(temp.path().join("state")),
            worktree_dir.clone(),
            vcs.clone(),
            mux.clone(),
            notifier,
        );

        Self {
            _temp: temp,
            worktree_dir,
            vcs,
            mux,
            orchestrator: Arc::new(orchestrator),
            rx,
        }
    }

    pub fn worktree_dir(&self) -> &Path {
        &self.worktree_dir
    }

    /// Notifications sent so far
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut notes = Vec::new();
        while let Ok(note) = self.rx.try_recv() {
            notes.push(note);
        }
        notes
    }

    /// Leave uncommitted work behind and hand the agent to review
    pub fn finish_with_changes(&self, agent: &Agent) {
        self.vcs.make_dirty(agent.worktree());
        agent.transition(AgentStatus::ReviewReady).unwrap();
    }
}
