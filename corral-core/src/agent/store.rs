//! Registry of live agents keyed by ID

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::record::{Agent, AgentId, AgentSnapshot};
use super::status::AgentStatus;
use crate::{Error, Result};

/// Registry of agents
///
/// Membership is guarded by its own lock, separate from each record's
/// state. The dirty flag is raised by every mutation and cleared once a
/// persistence write succeeds.
#[derive(Debug)]
pub struct AgentStore {
    agents: RwLock<BTreeMap<AgentId, Arc<Agent>>>,
    next_id: AtomicU64,
    dirty: AtomicBool,
}

impl Default for AgentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStore {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            dirty: AtomicBool::new(false),
        }
    }

    /// Reserve the next sequential ID without registering anything
    pub fn allocate_id(&self) -> AgentId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register an agent
    ///
    /// An agent without an ID gets the next sequential one. A preset ID
    /// (recovery) is kept, and the counter moves past it.
    pub fn insert(&self, agent: Agent) -> Arc<Agent> {
        let agent = if agent.id() == 0 {
            let id = self.allocate_id();
            agent.with_id(id)
        } else {
            self.next_id.fetch_max(agent.id() + 1, Ordering::SeqCst);
            agent
        };
        let agent = Arc::new(agent);
        self.agents.write().insert(agent.id(), Arc::clone(&agent));
        self.mark_dirty();
        agent
    }

    pub fn get(&self, id: AgentId) -> Option<Arc<Agent>> {
        self.agents.read().get(&id).cloned()
    }

    /// Like [`AgentStore::get`], but a missing agent is an error
    pub fn require(&self, id: AgentId) -> Result<Arc<Agent>> {
        self.get(id).ok_or(Error::AgentNotFound(id))
    }

    /// All agents ordered by ID
    pub fn list(&self) -> Vec<Arc<Agent>> {
        self.agents.read().values().cloned().collect()
    }

    pub fn remove(&self, id: AgentId) -> Option<Arc<Agent>> {
        let removed = self.agents.write().remove(&id);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    /// Transition an agent's status, returning the previous status
    pub fn update_status(&self, id: AgentId, status: AgentStatus) -> Result<AgentStatus> {
        let previous = self.require(id)?.transition(status)?;
        if previous != status {
            self.mark_dirty();
        }
        Ok(previous)
    }

    /// Find the live agent working on a branch
    pub fn find_by_branch(&self, branch: &str) -> Option<Arc<Agent>> {
        self.agents
            .read()
            .values()
            .find(|agent| agent.branch() == branch && agent.status() != AgentStatus::Dismissed)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Consistent copies of every record, ordered by ID
    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        self.list().iter().map(|agent| agent.snapshot()).collect()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Clear the dirty flag, returning whether it was set
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}
