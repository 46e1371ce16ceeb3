//! Configuration management for corral
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (CORRAL_*)
//! 3. Config file (~/.config/corral/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::{ClassifierSettings, PatternTable};
use crate::git::default_worktree_dir;
use crate::tmux::SplitDirection;
use crate::{Error, Result};

/// How agent processes are launched and stopped
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that starts the controlling process
    pub command: String,

    /// Flag used to pass the per-agent hook settings file
    pub settings_flag: String,

    /// Command the installed hooks invoke to report status
    pub hook_command: String,

    /// Variables removed from the agent's environment
    pub scrub_env: Vec<String>,

    /// Text typed to ask the process to exit cleanly
    pub exit_keys: String,

    /// Wait after the exit request before tearing the window down
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            settings_flag: "--settings".to_string(),
            hook_command: "corral hook".to_string(),
            scrub_env: vec!["CLAUDECODE".to_string(), "CLAUDE_CODE_ENTRYPOINT".to_string()],
            exit_keys: "/exit".to_string(),
            grace_period: Duration::from_millis(500),
        }
    }
}

/// Review tool opened next to an agent
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub command: String,
    pub split: SplitDirection,
    pub size_percent: u8,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            command: "lazygit".to_string(),
            split: SplitDirection::Horizontal,
            size_percent: 50,
        }
    }
}

/// Monitor loop timing and classifier thresholds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Upper bound for one external call made by the monitor
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Minimum time between two state writes
    #[serde(with = "humantime_serde")]
    pub persist_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub hook_freshness: Duration,

    pub stable_polls: u32,

    /// Lines captured from each pane per poll
    pub capture_lines: usize,

    /// Non-blank lines scanned by the classifier
    pub scan_lines: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            call_timeout: Duration::from_secs(3),
            persist_interval: Duration::from_secs(2),
            hook_freshness: Duration::from_secs(30),
            stable_polls: 2,
            capture_lines: 50,
            scan_lines: 20,
        }
    }
}

impl MonitorConfig {
    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            stable_polls: self.stable_polls,
            hook_freshness: self.hook_freshness,
            scan_lines: self.scan_lines,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TmuxConfig {
    /// Session that receives agent windows (current session when unset)
    pub session: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// State directory (default `<data_dir>/corral/<repo-name>`)
    pub state_dir: Option<PathBuf>,

    /// Parent of agent worktrees (default `<cache_dir>/corral/worktrees`)
    pub worktree_dir: Option<PathBuf>,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub review: ReviewConfig,
    pub monitor: MonitorConfig,
    pub tmux: TmuxConfig,
    pub paths: PathsConfig,
    pub patterns: PatternTable,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub agent_command: Option<String>,
    pub review_command: Option<String>,
    pub tmux_session: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub poll_interval: Option<Duration>,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/corral/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("corral").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - CORRAL_AGENT_COMMAND
    /// - CORRAL_REVIEW_COMMAND
    /// - CORRAL_TMUX_SESSION
    /// - CORRAL_STATE_DIR
    /// - CORRAL_POLL_INTERVAL (e.g. "500ms")
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(command) = var("CORRAL_AGENT_COMMAND") {
            self.agent.command = command;
        }
        if let Some(command) = var("CORRAL_REVIEW_COMMAND") {
            self.review.command = command;
        }
        if let Some(session) = var("CORRAL_TMUX_SESSION") {
            self.tmux.session = Some(session);
        }
        if let Some(dir) = var("CORRAL_STATE_DIR") {
            self.paths.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(interval) = var("CORRAL_POLL_INTERVAL") {
            match humantime::parse_duration(&interval) {
                Ok(interval) => self.monitor.poll_interval = interval,
                Err(e) => {
                    tracing::warn!(value = %interval, error = %e, "Ignoring invalid CORRAL_POLL_INTERVAL")
                }
            }
        }
        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, cli: CliOverrides) -> Self {
        if let Some(command) = cli.agent_command {
            self.agent.command = command;
        }
        if let Some(command) = cli.review_command {
            self.review.command = command;
        }
        if let Some(session) = cli.tmux_session {
            self.tmux.session = Some(session);
        }
        if let Some(dir) = cli.state_dir {
            self.paths.state_dir = Some(dir);
        }
        if let Some(interval) = cli.poll_interval {
            self.monitor.poll_interval = interval;
        }
        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(cli: CliOverrides) -> Result<Self> {
        Ok(Self::load()?.with_env_overrides().with_cli_overrides(cli))
    }

    /// State directory for a repository
    pub fn state_dir(&self, repo_name: &str) -> Result<PathBuf> {
        if let Some(dir) = &self.paths.state_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;
        Ok(data_dir.join("corral").join(repo_name))
    }

    /// Parent directory of agent worktrees
    pub fn worktree_dir(&self) -> Result<PathBuf> {
        match &self.paths.worktree_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_worktree_dir(),
        }
    }
}
