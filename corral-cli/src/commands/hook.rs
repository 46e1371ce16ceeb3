//! Hook command - write the status sidecar file for an agent

use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use corral_core::activity::{HookState, HookStatus, STATUS_FILE_ENV};

/// Report an agent state to its status file
#[derive(Args, Debug)]
pub struct HookArgs {
    /// State to report: running, waiting_permission, waiting_input, idle, stopped
    pub status: HookState,

    /// Status file to write (defaults to $CORRAL_STATUS_FILE)
    #[arg(long, env = STATUS_FILE_ENV)]
    pub file: PathBuf,
}

impl HookArgs {
    /// Execute the hook command
    pub fn execute(&self) -> anyhow::Result<()> {
        HookStatus::new(self.status, Utc::now())
            .write(&self.file)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", self.file.display(), e))
    }
}
