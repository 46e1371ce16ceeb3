//! Per-agent lifecycle record
//!
//! Identity fields are immutable once the record is built. Every mutable
//! field lives behind one mutex so multi-field reads (duration, snapshots)
//! always see a consistent view.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::status::{AgentStatus, WaitingFor};
use crate::{Error, Result};

/// Sequential agent identifier; `0` means "not yet assigned"
pub type AgentId = u64;

/// Immutable identity of an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Branch the agent works on
    pub branch: String,
    /// Branch the agent forked from
    pub base_branch: String,
    /// Isolated working directory
    pub worktree: PathBuf,
    /// Multiplexer window hosting the controlling process
    pub window_id: String,
    /// Pane running the controlling process
    pub pane_id: String,
    /// Branch HEAD when the agent was spawned
    pub fork_point: String,
}

/// Cleanup choices recorded by a merge that hit conflicts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePreferences {
    pub delete_branch: bool,
    pub remove_worktree: bool,
}

#[derive(Debug, Clone)]
struct AgentState {
    status: AgentStatus,
    waiting_for: Option<WaitingFor>,
    ever_active: bool,
    exit_code: Option<i32>,
    finished_at: Option<DateTime<Utc>>,
    review_pane: Option<String>,
    pre_review_head: Option<String>,
    merge_preferences: Option<MergePreferences>,
    accumulated: Duration,
    running_since: Option<DateTime<Utc>>,
}

impl AgentState {
    fn running(now: DateTime<Utc>) -> Self {
        Self {
            status: AgentStatus::Running,
            waiting_for: None,
            ever_active: false,
            exit_code: None,
            finished_at: None,
            review_pane: None,
            pre_review_head: None,
            merge_preferences: None,
            accumulated: Duration::ZERO,
            running_since: Some(now),
        }
    }

    fn total_duration_at(&self, now: DateTime<Utc>) -> Duration {
        let live = self
            .running_since
            .and_then(|since| (now - since).to_std().ok())
            .unwrap_or_default();
        self.accumulated + live
    }

    /// Apply a status change, keeping the running-time accounting in step
    fn set_status(&mut self, to: AgentStatus, now: DateTime<Utc>) {
        let from = self.status;
        if from == to {
            return;
        }
        if from == AgentStatus::Running {
            if let Some(since) = self.running_since.take() {
                self.accumulated += (now - since).to_std().unwrap_or_default();
            }
        }
        if to == AgentStatus::Running {
            self.running_since = Some(now);
        }
        if to != AgentStatus::Waiting {
            self.waiting_for = None;
        }
        self.status = to;
    }
}

/// Serializable, point-in-time copy of an agent record
///
/// This is also the persisted form of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub branch: String,
    pub base_branch: String,
    pub worktree: PathBuf,
    pub window_id: String,
    pub pane_id: String,
    #[serde(default)]
    pub fork_point: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub waiting_for: Option<WaitingFor>,
    #[serde(default)]
    pub ever_active: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, with = "humantime_serde")]
    pub accumulated: Duration,
    #[serde(default)]
    pub running_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_pane: Option<String>,
    #[serde(default)]
    pub pre_review_head: Option<String>,
    #[serde(default)]
    pub merge_preferences: Option<MergePreferences>,
}

impl AgentSnapshot {
    /// Accumulated running time plus the live running period, if any
    pub fn total_duration_at(&self, now: DateTime<Utc>) -> Duration {
        let live = self
            .running_since
            .and_then(|since| (now - since).to_std().ok())
            .unwrap_or_default();
        self.accumulated + live
    }
}

/// One unit of isolated work: branch, worktree and controlling process
#[derive(Debug)]
pub struct Agent {
    id: AgentId,
    identity: AgentIdentity,
    started_at: DateTime<Utc>,
    state: Mutex<AgentState>,
}

impl Agent {
    /// Create a fresh agent in `running`, with no ID assigned yet
    pub fn new(identity: AgentIdentity) -> Self {
        Self::new_at(identity, Utc::now())
    }

    /// Create a fresh agent whose first running period starts at `now`
    pub fn new_at(identity: AgentIdentity, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            identity,
            started_at: now,
            state: Mutex::new(AgentState::running(now)),
        }
    }

    /// Set the ID before registration
    pub fn with_id(mut self, id: AgentId) -> Self {
        self.id = id;
        self
    }

    /// Rebuild a record from a persisted snapshot
    ///
    /// Accumulated time is restored as saved; a running agent starts a new
    /// running period at `now`, so the gap between the save and the restart
    /// is not counted.
    pub fn from_snapshot(snapshot: AgentSnapshot, now: DateTime<Utc>) -> Self {
        let running_since = (snapshot.status == AgentStatus::Running).then_some(now);
        Self {
            id: snapshot.id,
            identity: AgentIdentity {
                branch: snapshot.branch,
                base_branch: snapshot.base_branch,
                worktree: snapshot.worktree,
                window_id: snapshot.window_id,
                pane_id: snapshot.pane_id,
                fork_point: snapshot.fork_point,
            },
            started_at: snapshot.started_at,
            state: Mutex::new(AgentState {
                status: snapshot.status,
                waiting_for: snapshot.waiting_for,
                ever_active: snapshot.ever_active,
                exit_code: snapshot.exit_code,
                finished_at: snapshot.finished_at,
                review_pane: snapshot.review_pane,
                pre_review_head: snapshot.pre_review_head,
                merge_preferences: snapshot.merge_preferences,
                accumulated: snapshot.accumulated,
                running_since,
            }),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn branch(&self) -> &str {
        &self.identity.branch
    }

    pub fn base_branch(&self) -> &str {
        &self.identity.base_branch
    }

    pub fn worktree(&self) -> &Path {
        &self.identity.worktree
    }

    pub fn window_id(&self) -> &str {
        &self.identity.window_id
    }

    pub fn pane_id(&self) -> &str {
        &self.identity.pane_id
    }

    pub fn fork_point(&self) -> &str {
        &self.identity.fork_point
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    pub fn waiting_for(&self) -> Option<WaitingFor> {
        self.state.lock().waiting_for
    }

    pub fn ever_active(&self) -> bool {
        self.state.lock().ever_active
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.lock().exit_code
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finished_at
    }

    pub fn review_pane(&self) -> Option<String> {
        self.state.lock().review_pane.clone()
    }

    pub fn pre_review_head(&self) -> Option<String> {
        self.state.lock().pre_review_head.clone()
    }

    pub fn merge_preferences(&self) -> Option<MergePreferences> {
        self.state.lock().merge_preferences
    }

    /// Move to a new status, returning the previous one
    pub fn transition(&self, to: AgentStatus) -> Result<AgentStatus> {
        self.transition_at(to, Utc::now())
    }

    /// Move to a new status at an explicit instant
    pub fn transition_at(&self, to: AgentStatus, now: DateTime<Utc>) -> Result<AgentStatus> {
        let mut state = self.state.lock();
        let from = state.status;
        if !from.can_transition_to(&to) {
            return Err(Error::InvalidTransition { from, to });
        }
        if from != to {
            tracing::info!(agent_id = self.id, %from, %to, "Agent status transition");
        }
        state.set_status(to, now);
        Ok(from)
    }

    /// Enter `waiting` with a reason; returns true if status or reason changed
    pub fn set_waiting(&self, reason: WaitingFor) -> Result<bool> {
        let mut state = self.state.lock();
        let from = state.status;
        if !from.can_transition_to(&AgentStatus::Waiting) {
            return Err(Error::InvalidTransition {
                from,
                to: AgentStatus::Waiting,
            });
        }
        let changed = from != AgentStatus::Waiting || state.waiting_for != Some(reason);
        if changed {
            tracing::info!(agent_id = self.id, %from, waiting_for = %reason, "Agent waiting");
        }
        state.set_status(AgentStatus::Waiting, Utc::now());
        state.waiting_for = Some(reason);
        Ok(changed)
    }

    /// Record that the process produced activity at least once
    pub fn mark_active(&self) {
        self.state.lock().ever_active = true;
    }

    /// Record the exit code and finish time; only the first call has effect
    pub fn set_finished(&self, exit_code: Option<i32>) -> bool {
        self.set_finished_at(exit_code, Utc::now())
    }

    pub fn set_finished_at(&self, exit_code: Option<i32>, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.finished_at.is_some() {
            return false;
        }
        state.exit_code = exit_code;
        state.finished_at = Some(now);
        true
    }

    /// Attach a review pane, entering `reviewing` unless resolving conflicts
    pub fn begin_review(&self, pane_id: String, head: String) -> Result<AgentStatus> {
        let mut state = self.state.lock();
        let from = state.status;
        if !from.is_reviewable() {
            return Err(Error::InvalidStatus {
                id: self.id,
                status: from,
                operation: "review",
            });
        }
        if from != AgentStatus::Conflicts {
            tracing::info!(agent_id = self.id, %from, to = %AgentStatus::Reviewing, "Agent status transition");
            state.set_status(AgentStatus::Reviewing, Utc::now());
        }
        state.review_pane = Some(pane_id);
        state.pre_review_head = Some(head);
        Ok(state.status)
    }

    /// Detach the review pane, returning the HEAD recorded when it opened
    pub fn end_review(&self) -> Option<String> {
        let mut state = self.state.lock();
        state.review_pane = None;
        state.pre_review_head.take()
    }

    /// Remember the cleanup choices of a merge that must wait for resolution
    pub fn set_merge_preferences(&self, preferences: MergePreferences) {
        self.state.lock().merge_preferences = Some(preferences);
    }

    /// Total time spent in `running`
    pub fn total_duration(&self) -> Duration {
        self.total_duration_at(Utc::now())
    }

    pub fn total_duration_at(&self, now: DateTime<Utc>) -> Duration {
        self.state.lock().total_duration_at(now)
    }

    /// Consistent copy of every field
    pub fn snapshot(&self) -> AgentSnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Copy taken at `now`; a live running period is folded into the
    /// accumulated total and the copy's period starts at `now`
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> AgentSnapshot {
        let state = self.state.lock().clone();
        let accumulated = state.total_duration_at(now);
        let running_since = state.running_since.map(|_| now);
        AgentSnapshot {
            id: self.id,
            branch: self.identity.branch.clone(),
            base_branch: self.identity.base_branch.clone(),
            worktree: self.identity.worktree.clone(),
            window_id: self.identity.window_id.clone(),
            pane_id: self.identity.pane_id.clone(),
            fork_point: self.identity.fork_point.clone(),
            status: state.status,
            waiting_for: state.waiting_for,
            ever_active: state.ever_active,
            exit_code: state.exit_code,
            started_at: self.started_at,
            finished_at: state.finished_at,
            accumulated,
            running_since,
            review_pane: state.review_pane,
            pre_review_head: state.pre_review_head,
            merge_preferences: state.merge_preferences,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_identity(branch: &str) -> AgentIdentity {
    AgentIdentity {
        branch: branch.to_string(),
        base_branch: "main".to_string(),
        worktree: PathBuf::from(format!("/tmp/wt/{}", branch.replace('/', "-"))),
        window_id: format!("@{}", branch.len()),
        pane_id: format!("%{}", branch.len()),
        fork_point: "f0f0f0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_agent_is_running() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0));
        assert_eq!(agent.id(), 0);
        assert_eq!(agent.status(), AgentStatus::Running);
        assert!(!agent.ever_active());
        assert_eq!(agent.total_duration_at(at(10)), Duration::from_secs(10));
    }

    #[test]
    fn test_set_finished_first_writer_wins() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0));
        assert!(agent.set_finished_at(Some(1), at(5)));
        assert!(!agent.set_finished_at(Some(0), at(9)));
        assert!(!agent.set_finished(None));
        assert_eq!(agent.exit_code(), Some(1));
        assert_eq!(agent.finished_at(), Some(at(5)));
    }

    #[test]
    fn test_set_finished_concurrent_callers() {
        let agent = Arc::new(Agent::new(test_identity("feat/x")));
        let handles: Vec<_> = (0..8)
            .map(|code| {
                let agent = Arc::clone(&agent);
                std::thread::spawn(move || agent.set_finished(Some(code)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        let code = agent.exit_code().unwrap();
        assert!(!agent.set_finished(Some(code + 100)));
        assert_eq!(agent.exit_code(), Some(code));
    }

    #[test]
    fn test_duration_counts_only_running_periods() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0));
        agent.transition_at(AgentStatus::Waiting, at(10)).unwrap();
        // paused: waiting time is not counted
        assert_eq!(agent.total_duration_at(at(100)), Duration::from_secs(10));
        agent.transition_at(AgentStatus::Running, at(100)).unwrap();
        agent.transition_at(AgentStatus::Running, at(105)).unwrap();
        agent.transition_at(AgentStatus::ReviewReady, at(130)).unwrap();
        assert_eq!(agent.total_duration_at(at(500)), Duration::from_secs(40));
        agent.transition_at(AgentStatus::Running, at(600)).unwrap();
        assert_eq!(agent.total_duration_at(at(610)), Duration::from_secs(50));
    }

    #[test]
    fn test_invalid_transition_is_rejected_without_change() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0));
        let err = agent.transition_at(AgentStatus::Reviewed, at(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(agent.status(), AgentStatus::Running);
    }

    #[test]
    fn test_waiting_reason_cleared_when_leaving_waiting() {
        let agent = Agent::new(test_identity("feat/x"));
        assert!(agent.set_waiting(WaitingFor::Permission).unwrap());
        assert!(!agent.set_waiting(WaitingFor::Permission).unwrap());
        assert!(agent.set_waiting(WaitingFor::Input).unwrap());
        assert_eq!(agent.waiting_for(), Some(WaitingFor::Input));
        agent.transition(AgentStatus::Running).unwrap();
        assert_eq!(agent.waiting_for(), None);
    }

    #[test]
    fn test_review_cycle() {
        let agent = Agent::new(test_identity("feat/x"));
        assert!(agent.begin_review("%9".into(), "abc".into()).is_err());
        agent.transition(AgentStatus::ReviewReady).unwrap();
        assert_eq!(
            agent.begin_review("%9".into(), "abc".into()).unwrap(),
            AgentStatus::Reviewing
        );
        assert_eq!(agent.review_pane().as_deref(), Some("%9"));
        assert_eq!(agent.end_review().as_deref(), Some("abc"));
        assert!(agent.review_pane().is_none());
        assert!(agent.pre_review_head().is_none());
    }

    #[test]
    fn test_review_during_conflicts_keeps_status() {
        let agent = Agent::new(test_identity("feat/x"));
        agent.transition(AgentStatus::ReviewReady).unwrap();
        agent.transition(AgentStatus::Conflicts).unwrap();
        assert_eq!(
            agent.begin_review("%3".into(), "abc".into()).unwrap(),
            AgentStatus::Conflicts
        );
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_accumulated_time() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0)).with_id(7);
        agent.mark_active();
        agent.transition_at(AgentStatus::Waiting, at(42)).unwrap();
        agent.set_merge_preferences(MergePreferences {
            delete_branch: true,
            remove_worktree: false,
        });
        let snapshot = agent.snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: AgentSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);

        let restored = Agent::from_snapshot(parsed, at(1_000));
        assert_eq!(restored.id(), 7);
        assert!(restored.ever_active());
        assert_eq!(restored.status(), AgentStatus::Waiting);
        assert_eq!(
            restored.total_duration_at(at(2_000)),
            Duration::from_secs(42)
        );
        assert_eq!(
            restored.merge_preferences().map(|p| p.delete_branch),
            Some(true)
        );
    }

    #[test]
    fn test_restored_running_agent_keeps_saved_time() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0));
        let snapshot = agent.snapshot_at(at(600));
        assert_eq!(snapshot.accumulated, Duration::from_secs(600));
        assert_eq!(snapshot.running_since, Some(at(600)));

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: AgentSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Agent::from_snapshot(parsed, at(1_000));
        assert_eq!(restored.total_duration_at(at(1_000)), Duration::from_secs(600));
        assert_eq!(restored.total_duration_at(at(1_005)), Duration::from_secs(605));
    }

    #[test]
    fn test_snapshot_total_includes_time_since_save() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0));
        let snapshot = agent.snapshot_at(at(100));
        assert_eq!(snapshot.total_duration_at(at(130)), Duration::from_secs(130));
        // A clock earlier than the save adds nothing
        assert_eq!(snapshot.total_duration_at(at(50)), Duration::from_secs(100));
    }

    #[test]
    fn test_snapshot_of_paused_agent_ignores_now() {
        let agent = Agent::new_at(test_identity("feat/x"), at(0));
        agent.transition_at(AgentStatus::Waiting, at(30)).unwrap();
        let snapshot = agent.snapshot_at(at(500));
        assert_eq!(snapshot.accumulated, Duration::from_secs(30));
        assert_eq!(snapshot.running_since, None);
    }
}
