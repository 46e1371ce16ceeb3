//! Status sidecar file written by the agent's hooks
//!
//! The controlling process runs `<hook_command> <status> --file <path>` from
//! its hooks; the monitor reads the resulting `{status, timestamp}` JSON and
//! trusts it only while it is fresh.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::persist::write_atomic;
use crate::{Error, Result};

/// Environment variable carrying the status file path into the agent window
pub const STATUS_FILE_ENV: &str = "CORRAL_STATUS_FILE";

/// State reported by a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    Running,
    WaitingPermission,
    WaitingInput,
    Idle,
    Stopped,
}

impl HookState {
    pub fn name(&self) -> &'static str {
        match self {
            HookState::Running => "running",
            HookState::WaitingPermission => "waiting_permission",
            HookState::WaitingInput => "waiting_input",
            HookState::Idle => "idle",
            HookState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for HookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for HookState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(HookState::Running),
            "waiting_permission" => Ok(HookState::WaitingPermission),
            "waiting_input" => Ok(HookState::WaitingInput),
            "idle" => Ok(HookState::Idle),
            "stopped" => Ok(HookState::Stopped),
            _ => Err(format!("Unknown hook status: {}", s)),
        }
    }
}

/// Contents of the status sidecar file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookStatus {
    pub status: HookState,
    /// Unix seconds
    pub timestamp: i64,
}

impl HookStatus {
    pub fn new(status: HookState, at: DateTime<Utc>) -> Self {
        Self {
            status,
            timestamp: at.timestamp(),
        }
    }

    /// Whether the report is recent enough to trust
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        let age = now.timestamp() - self.timestamp;
        age >= 0 && (age as u64) <= freshness.as_secs()
    }

    /// Read the status file; a missing or unreadable file is `None`
    pub fn read(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Ignoring malformed status file");
                None
            }
        }
    }

    /// Atomically replace the status file
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        write_atomic(path, &json)
    }
}

/// Hook settings handed to the controlling process
///
/// Every hook reports its state to `status_file` through `hook_command`.
pub fn hook_settings(hook_command: &str, status_file: &Path) -> serde_json::Value {
    let file = status_file.display().to_string();
    let entry = |state: HookState| {
        json!([{
            "hooks": [{
                "type": "command",
                "command": format!("{} {} --file '{}'", hook_command, state.name(), file),
            }]
        }])
    };
    json!({
        "hooks": {
            "UserPromptSubmit": entry(HookState::Running),
            "PreToolUse": entry(HookState::Running),
            "PostToolUse": entry(HookState::Running),
            "Notification": entry(HookState::WaitingPermission),
            "Stop": entry(HookState::Idle),
            "SessionEnd": entry(HookState::Stopped),
        }
    })
}

/// Write the hook settings file for one agent
pub fn install_hook_settings(settings_path: &Path, hook_command: &str, status_file: &Path) -> Result<()> {
    let settings = hook_settings(hook_command, status_file);
    let json = serde_json::to_vec_pretty(&settings)?;
    write_atomic(settings_path, &json)
        .map_err(|e| Error::Other(format!("Failed to install hook settings: {}", e)))
}
