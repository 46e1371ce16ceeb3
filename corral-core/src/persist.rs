//! Durable state: the agent list and the in-flight preview
//!
//! Both files are rewritten wholesale and atomically (temp file then rename).
//! Read failures degrade to "nothing persisted"; the in-memory store stays
//! authoritative for the running process.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentSnapshot, AgentStatus, AgentStore};
use crate::{Error, Result};

/// Current layout version of `state.json`
pub const STATE_VERSION: u32 = 1;

/// Write `bytes` to `path` through a sibling temp file and a rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Other(format!("Not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Files owned by one repository's orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    dir: PathBuf,
}

impl StatePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    pub fn preview_file(&self) -> PathBuf {
        self.dir.join("preview.json")
    }

    /// Sidecar status file written by an agent's hooks
    pub fn status_file(&self, id: AgentId) -> PathBuf {
        self.dir.join("status").join(format!("agent-{}.json", id))
    }

    /// Hook settings handed to an agent's process
    pub fn hook_settings_file(&self, id: AgentId) -> PathBuf {
        self.dir.join("hooks").join(format!("agent-{}.json", id))
    }
}

/// On-disk layout of `state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    #[serde(default)]
    pub agents: Vec<AgentSnapshot>,
}

/// The single active preview: which agent, and what to restore afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSession {
    pub agent_id: AgentId,
    /// Branch checked out in the main directory before the preview
    pub previous_branch: String,
    /// Agent status before it entered `previewing`
    pub previous_status: AgentStatus,
}

impl PreviewSession {
    /// Name of the disposable branch built for this preview
    pub fn branch(&self) -> String {
        preview_branch(self.agent_id)
    }
}

/// Disposable branch name for previewing an agent
pub fn preview_branch(agent_id: AgentId) -> String {
    format!("preview/{}", agent_id)
}

/// Load persisted agents; missing or corrupt files yield an empty list
pub fn load_agents(path: &Path) -> Vec<AgentSnapshot> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read state file");
            return Vec::new();
        }
    };

    match serde_json::from_str::<StateFile>(&contents) {
        Ok(state) => {
            if state.version != STATE_VERSION {
                tracing::warn!(
                    path = %path.display(),
                    version = state.version,
                    "Unexpected state file version, loading anyway"
                );
            }
            state.agents
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
            Vec::new()
        }
    }
}

pub fn save_agents(path: &Path, agents: Vec<AgentSnapshot>) -> Result<()> {
    let state = StateFile {
        version: STATE_VERSION,
        agents,
    };
    let json = serde_json::to_vec_pretty(&state)?;
    write_atomic(path, &json)
}

/// Load the persisted preview, if any
pub fn load_preview(path: &Path) -> Option<PreviewSession> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt preview file");
            None
        }
    }
}

pub fn save_preview(path: &Path, session: &PreviewSession) -> Result<()> {
    let json = serde_json::to_vec_pretty(session)?;
    write_atomic(path, &json)
}

/// Remove the preview file; a missing file is fine
pub fn clear_preview(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Debounced writer of the agent store
#[derive(Debug)]
pub struct Persister {
    path: PathBuf,
    min_interval: Duration,
    last_write: Mutex<Option<Instant>>,
}

impl Persister {
    pub fn new(path: PathBuf, min_interval: Duration) -> Self {
        Self {
            path,
            min_interval,
            last_write: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store if it is dirty and the minimum interval has passed
    ///
    /// `force` skips both checks. Failures are logged and leave the store
    /// dirty so the next call retries. Returns whether a write happened.
    pub fn save(&self, store: &AgentStore, force: bool) -> bool {
        let mut last_write = self.last_write.lock();
        if !force {
            if !store.is_dirty() {
                return false;
            }
            if last_write.is_some_and(|at| at.elapsed() < self.min_interval) {
                return false;
            }
        }

        store.take_dirty();
        let snapshots = store.snapshots();
        let count = snapshots.len();
        match save_agents(&self.path, snapshots) {
            Ok(()) => {
                *last_write = Some(Instant::now());
                tracing::debug!(path = %self.path.display(), agents = count, "Saved state");
                true
            }
            Err(e) => {
                store.mark_dirty();
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to save state");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{test_identity, Agent};
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("state.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!temp.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn test_state_paths_layout() {
        let paths = StatePaths::new("/state");
        assert_eq!(paths.state_file(), PathBuf::from("/state/state.json"));
        assert_eq!(paths.preview_file(), PathBuf::from("/state/preview.json"));
        assert_eq!(
            paths.status_file(4),
            PathBuf::from("/state/status/agent-4.json")
        );
        assert_eq!(
            paths.hook_settings_file(4),
            PathBuf::from("/state/hooks/agent-4.json")
        );
    }

    #[test]
    fn test_agents_roundtrip_and_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        assert!(load_agents(&path).is_empty());

        let store = AgentStore::new();
        store.insert(Agent::new(test_identity("feat/a")));
        store.insert(Agent::new(test_identity("feat/b")));
        save_agents(&path, store.snapshots()).unwrap();

        let loaded = load_agents(&path);
        assert_eq!(loaded, store.snapshots());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["agents"][0]["status"], "running");
    }

    #[test]
    fn test_corrupt_files_load_as_empty() {
        let temp = TempDir::new().unwrap();
        let state = temp.path().join("state.json");
        let preview = temp.path().join("preview.json");
        std::fs::write(&state, "{\"version\":1,\"agents\":[{").unwrap();
        std::fs::write(&preview, "nope").unwrap();
        assert!(load_agents(&state).is_empty());
        assert!(load_preview(&preview).is_none());
    }

    #[test]
    fn test_older_records_load_with_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"version":1,"agents":[{
                "id":3,"branch":"feat/x","base_branch":"main",
                "worktree":"/wt/feat-x","window_id":"@3","pane_id":"%3",
                "status":"waiting","waiting_for":"input","ever_active":true,
                "exit_code":null,"started_at":"2026-01-01T00:00:00Z","finished_at":null
            }]}"#,
        )
        .unwrap();
        let agents = load_agents(&path);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].status, AgentStatus::Waiting);
        assert_eq!(agents[0].accumulated, Duration::ZERO);
        assert!(agents[0].merge_preferences.is_none());
    }

    #[test]
    fn test_preview_roundtrip_and_clear() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("preview.json");
        let session = PreviewSession {
            agent_id: 2,
            previous_branch: "main".to_string(),
            previous_status: AgentStatus::ReviewReady,
        };
        assert_eq!(session.branch(), "preview/2");
        save_preview(&path, &session).unwrap();
        assert_eq!(load_preview(&path), Some(session));
        clear_preview(&path).unwrap();
        clear_preview(&path).unwrap();
        assert!(load_preview(&path).is_none());
    }

    #[test]
    fn test_persister_debounces_and_forces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        let persister = Persister::new(path.clone(), Duration::from_secs(3600));
        let store = AgentStore::new();

        assert!(!persister.save(&store, false));
        store.insert(Agent::new(test_identity("feat/a")));
        assert!(persister.save(&store, false));
        assert!(!store.is_dirty());

        store.insert(Agent::new(test_identity("feat/b")));
        assert!(!persister.save(&store, false));
        assert!(store.is_dirty());
        assert!(persister.save(&store, true));
        assert_eq!(load_agents(&path).len(), 2);
    }

    #[test]
    fn test_persister_failure_keeps_store_dirty() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let persister = Persister::new(blocker.join("state.json"), Duration::ZERO);
        let store = AgentStore::new();
        store.insert(Agent::new(test_identity("feat/a")));
        assert!(!persister.save(&store, false));
        assert!(store.is_dirty());
    }
}
