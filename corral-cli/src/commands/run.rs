//! Run command - interactive console over a running orchestrator
//!
//! Recovers agents from the previous run, undoes a preview left behind by a
//! crash, starts the monitor and then reads one command per line from stdin.
//! Ctrl-C, end of input or `quit` shut down: the monitor saves the state and
//! cleans up the preview on its way out.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use corral_core::{AgentId, Config, MergeReport, Monitor, Notifier, Orchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::{absolute, format_elapsed};

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Repository to orchestrate (defaults to current directory)
    #[arg(short = 'd', long, default_value = ".")]
    pub repo: PathBuf,
}

/// One console line
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true, name = "corral>")]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum ConsoleCommand {
    /// Start an agent on a branch
    Spawn {
        branch: String,
        /// Branch to fork from and merge into (defaults to the current branch)
        #[arg(short, long)]
        base: Option<String>,
        /// Use an existing branch instead of creating it
        #[arg(long)]
        existing: bool,
    },
    /// List agents
    #[command(visible_alias = "ls")]
    List,
    /// Stop an agent and remove its worktree
    Dismiss {
        id: AgentId,
        /// Also delete the agent's branch
        #[arg(long)]
        delete_branch: bool,
    },
    /// Switch to an agent's window
    Focus { id: AgentId },
    /// Open the review pane for an agent
    Review { id: AgentId },
    /// Merge an agent's branch into its base
    Merge {
        id: AgentId,
        /// Keep the agent's branch after merging
        #[arg(long)]
        keep_branch: bool,
        /// Keep the agent's worktree after merging
        #[arg(long)]
        keep_worktree: bool,
    },
    /// Check an agent's work out in the main directory
    Preview { id: AgentId },
    /// Restore the main directory
    StopPreview,
    /// Dismiss agents whose window, worktree or branch is gone
    Cleanup,
    /// Save state, clean up the preview and exit
    #[command(visible_alias = "exit")]
    Quit,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let repo = absolute(&self.repo)?;
        let (notifier, mut notifications) = Notifier::channel();

        let orchestrator = tokio::task::spawn_blocking(move || {
            let orchestrator = Orchestrator::open(config, &repo, notifier)?;
            let recovered = orchestrator.recover_agents()?;
            if orchestrator.cleanup_preview()? {
                println!("Restored the main directory from an interrupted preview");
            }
            Ok::<_, corral_core::Error>((orchestrator, recovered))
        })
        .await?;
        let (orchestrator, recovered) = orchestrator?;
        let orchestrator = Arc::new(orchestrator);

        println!("Corral");
        println!("======");
        println!();
        println!("Repository: {}", orchestrator.repo_root().display());
        if !recovered.is_empty() {
            println!("Recovered agents: {:?}", recovered);
        }
        println!("Type 'help' for commands");
        println!();

        let cancel = CancellationToken::new();
        let monitor = Monitor::new(Arc::clone(&orchestrator), cancel.clone()).spawn();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
                Some(notification) = notifications.recv() => {
                    println!("* {}", notification);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    let words: Vec<&str> = line.split_whitespace().collect();
                    if words.is_empty() {
                        continue;
                    }
                    let command = match ConsoleLine::try_parse_from(words) {
                        Ok(parsed) => parsed.command,
                        Err(e) => {
                            println!("{}", e);
                            continue;
                        }
                    };
                    if command == ConsoleCommand::Quit {
                        break;
                    }

                    let target = Arc::clone(&orchestrator);
                    match tokio::task::spawn_blocking(move || dispatch(&target, command)).await? {
                        Ok(output) => println!("{}", output),
                        Err(e) => println!("error: {}", e),
                    }
                }
            }
        }

        println!("Shutting down...");
        cancel.cancel();
        monitor.await?;
        while let Ok(notification) = notifications.try_recv() {
            println!("* {}", notification);
        }

        Ok(())
    }
}

fn dispatch(orchestrator: &Orchestrator, command: ConsoleCommand) -> corral_core::Result<String> {
    match command {
        ConsoleCommand::Spawn {
            branch,
            base,
            existing,
        } => {
            let base = match base {
                Some(base) => base,
                None => orchestrator.current_branch()?,
            };
            let agent = orchestrator.spawn(&branch, &base, !existing)?;
            Ok(format!(
                "Spawned agent #{} on {} ({})",
                agent.id(),
                agent.branch(),
                agent.worktree().display()
            ))
        }
        ConsoleCommand::List => Ok(list(orchestrator)),
        ConsoleCommand::Dismiss { id, delete_branch } => {
            orchestrator.dismiss(id, delete_branch)?;
            Ok(format!("Dismissed agent #{}", id))
        }
        ConsoleCommand::Focus { id } => {
            orchestrator.focus(id)?;
            Ok(format!("Focused agent #{}", id))
        }
        ConsoleCommand::Review { id } => {
            orchestrator.open_review(id)?;
            Ok(format!("Reviewing agent #{}", id))
        }
        ConsoleCommand::Merge {
            id,
            keep_branch,
            keep_worktree,
        } => match orchestrator.merge_agent(id, !keep_branch, !keep_worktree)? {
            MergeReport::Merged { head } => Ok(format!("Merged agent #{} at {}", id, head)),
            MergeReport::Conflicts(files) => Ok(format!(
                "Agent #{} has conflicts in {}; resolve them in its worktree",
                id,
                files.join(", ")
            )),
        },
        ConsoleCommand::Preview { id } => {
            orchestrator.preview(id)?;
            Ok(format!("Previewing agent #{}", id))
        }
        ConsoleCommand::StopPreview => {
            orchestrator.stop_preview()?;
            Ok("Preview stopped".to_string())
        }
        ConsoleCommand::Cleanup => {
            let removed = orchestrator.cleanup_dead_agents()?;
            if removed.is_empty() {
                return Ok("Nothing to clean up".to_string());
            }
            Ok(removed
                .iter()
                .map(|entry| format!("Removed #{} {} ({})", entry.agent_id, entry.branch, entry.reason))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        ConsoleCommand::Quit => Ok(String::new()),
    }
}

fn list(orchestrator: &Orchestrator) -> String {
    let agents = orchestrator.store().list();
    if agents.is_empty() {
        return "No agents.".to_string();
    }
    let preview = orchestrator.active_preview().map(|s| s.agent_id);

    agents
        .iter()
        .map(|agent| {
            let mut row = format!(
                "{:>4}  {:<12} {:<32} {:>10}",
                format!("#{}", agent.id()),
                agent.status().to_string(),
                agent.branch(),
                format_elapsed(agent.total_duration())
            );
            if let Some(reason) = agent.waiting_for() {
                row.push_str(&format!("  waiting for {}", reason));
            }
            if preview == Some(agent.id()) {
                row.push_str("  [preview]");
            }
            row
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<ConsoleCommand, clap::Error> {
        ConsoleLine::try_parse_from(line.split_whitespace()).map(|l| l.command)
    }

    #[test]
    fn test_parse_spawn() {
        assert_eq!(
            parse("spawn feat/login --base develop").unwrap(),
            ConsoleCommand::Spawn {
                branch: "feat/login".to_string(),
                base: Some("develop".to_string()),
                existing: false,
            }
        );
        assert_eq!(
            parse("spawn fix --existing").unwrap(),
            ConsoleCommand::Spawn {
                branch: "fix".to_string(),
                base: None,
                existing: true,
            }
        );
    }

    #[test]
    fn test_parse_merge_flags() {
        assert_eq!(
            parse("merge 3 --keep-branch").unwrap(),
            ConsoleCommand::Merge {
                id: 3,
                keep_branch: true,
                keep_worktree: false,
            }
        );
    }

    #[test]
    fn test_parse_aliases_and_errors() {
        assert_eq!(parse("ls").unwrap(), ConsoleCommand::List);
        assert_eq!(parse("exit").unwrap(), ConsoleCommand::Quit);
        assert_eq!(parse("stop-preview").unwrap(), ConsoleCommand::StopPreview);
        assert!(parse("dismiss abc").is_err());
        assert!(parse("frobnicate").is_err());
    }
}
