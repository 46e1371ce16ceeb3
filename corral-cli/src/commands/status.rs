//! Status command - show persisted agents and the active preview

use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use corral_core::git::GitRepo;
use corral_core::persist::{load_agents, load_preview, StatePaths};
use corral_core::Config;

use super::{absolute, format_elapsed};

/// Show persisted agents
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Repository to show agents for (defaults to current directory)
    #[arg(short = 'd', long, default_value = ".")]
    pub repo: PathBuf,
}

impl StatusArgs {
    /// Execute the status command
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let repo = GitRepo::open(&absolute(&self.repo)?)
            .map_err(|e| anyhow::anyhow!("Not a git repository: {}", e))?;
        let paths = StatePaths::new(config.state_dir(&repo.repo_name())?);
        let agents = load_agents(&paths.state_file());
        let now = Utc::now();

        println!();
        if agents.is_empty() {
            println!("No agents.");
        } else {
            println!("Agents:");
            println!();
            for agent in &agents {
                println!("  #{} {} [{}]", agent.id, agent.branch, agent.status);
                println!("      Base: {}", agent.base_branch);
                println!("      Worktree: {}", agent.worktree.display());
                if let Some(reason) = agent.waiting_for {
                    println!("      Waiting for: {}", reason);
                }
                if let Some(code) = agent.exit_code {
                    println!("      Exit code: {}", code);
                }
                println!("      Running time: {}", format_elapsed(agent.total_duration_at(now)));
                println!();
            }
        }

        if let Some(preview) = load_preview(&paths.preview_file()) {
            println!(
                "Preview: agent #{} on {} (restores {})",
                preview.agent_id,
                preview.branch(),
                preview.previous_branch
            );
        }
        println!("State: {}", paths.dir().display());

        Ok(())
    }
}
