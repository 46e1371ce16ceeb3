//! Terminal multiplexer collaborator
//!
//! Agents live in tmux windows. The orchestrator only sees the narrow
//! [`Multiplexer`] trait; [`Tmux`] drives the real `tmux` binary.

mod session;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

pub use session::Tmux;

/// Everything needed to open an agent window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSpec {
    /// Window title
    pub name: String,
    /// Working directory of the first pane
    pub cwd: PathBuf,
    /// Shell command run in the pane
    pub command: String,
    /// Variables set for the command
    pub env: Vec<(String, String)>,
    /// Variables removed from the inherited environment
    pub unset_env: Vec<String>,
}

/// Identifiers of a freshly created window and its first pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneRef {
    pub window_id: String,
    pub pane_id: String,
}

/// Orientation of a pane split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    /// New pane beside the target
    #[default]
    Horizontal,
    /// New pane below the target
    Vertical,
}

/// One row of the batched pane listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub window_id: String,
    pub pane_id: String,
    /// The pane's process has exited (kept around by remain-on-exit)
    pub dead: bool,
    pub exit_status: Option<i32>,
}

/// Window and pane operations the orchestrator consumes
///
/// Every call blocks until the underlying tool finishes.
pub trait Multiplexer: Send + Sync {
    /// Open a detached window running `spec.command`
    fn new_window(&self, spec: &WindowSpec) -> Result<PaneRef>;

    /// Split `target_pane`, running `command` in `cwd`; returns the new pane ID
    fn split_pane(
        &self,
        target_pane: &str,
        direction: SplitDirection,
        size_percent: u8,
        cwd: &Path,
        command: &str,
    ) -> Result<String>;

    fn kill_window(&self, window_id: &str) -> Result<()>;

    fn kill_pane(&self, pane_id: &str) -> Result<()>;

    /// Send key names or literal strings, in order
    fn send_keys(&self, pane_id: &str, keys: &[&str]) -> Result<()>;

    fn select_window(&self, window_id: &str) -> Result<()>;

    fn select_pane(&self, pane_id: &str) -> Result<()>;

    /// All panes of the server with liveness and exit information
    fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    /// Last `lines` lines of a pane's visible content and scrollback
    fn capture_pane(&self, pane_id: &str, lines: usize) -> Result<String>;

    /// Whether `pane_id` still exists inside `window_id`
    fn pane_exists(&self, window_id: &str, pane_id: &str) -> Result<bool> {
        Ok(self
            .list_panes()?
            .iter()
            .any(|p| p.window_id == window_id && p.pane_id == pane_id))
    }

    /// Window currently holding a pane
    fn pane_window(&self, pane_id: &str) -> Result<Option<String>> {
        Ok(self
            .list_panes()?
            .into_iter()
            .find(|p| p.pane_id == pane_id)
            .map(|p| p.window_id))
    }
}
