//! Git worktree creation and inspection

use std::path::{Path, PathBuf};

use super::repo::{git_stdout, run_git, GitRepo};
use crate::{Error, Result};

/// Get the default parent directory for agent worktrees
///
/// Returns `~/.cache/corral/worktrees`
pub fn default_worktree_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))?;

    Ok(cache_dir.join("corral").join("worktrees"))
}

/// Generate a worktree path from repo name and branch name
pub fn worktree_path(worktree_dir: &Path, repo_name: &str, branch_name: &str) -> PathBuf {
    let safe_branch = branch_name
        .replace('/', "-")
        .replace('\\', "-")
        .replace(':', "-");

    worktree_dir.join(repo_name).join(safe_branch)
}

/// One entry of `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorktreeEntry {
    path: PathBuf,
    branch: Option<String>,
}

fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(reference) = line.strip_prefix("branch ") {
            if let Some(entry) = current.as_mut() {
                let name = reference.strip_prefix("refs/heads/").unwrap_or(reference);
                entry.branch = Some(name.to_string());
            }
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

impl GitRepo {
    /// Check out an existing branch into a new worktree at `path`
    pub(super) fn create_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        if path.exists() {
            return Err(Error::Git(format!(
                "Worktree path already exists: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Other(format!("Failed to create worktree directory: {}", e))
            })?;
        }

        let path_arg = path.to_string_lossy();
        let output = run_git(self.root(), &["worktree", "add", &path_arg, branch])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("already checked out") || stderr.contains("already used by worktree") {
                return Err(Error::BranchInUse(branch.to_string()));
            }
            return Err(Error::Git(format!("git worktree add failed: {}", stderr.trim())));
        }

        tracing::debug!(branch, path = %path.display(), "Created worktree");
        Ok(())
    }

    /// Remove a worktree, falling back to deleting the directory
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path_arg = path.to_string_lossy();
        let output = run_git(self.root(), &["worktree", "remove", "--force", &path_arg])?;

        if !output.status.success() {
            // Not registered with git (or already half-removed)
            if path.exists() {
                std::fs::remove_dir_all(path).map_err(|e| {
                    Error::Other(format!("Failed to remove worktree directory: {}", e))
                })?;
            }
            let _ = run_git(self.root(), &["worktree", "prune"]);
        }

        Ok(())
    }

    /// Path of the worktree that has `branch` checked out
    pub(super) fn worktree_for(&self, branch: &str) -> Result<Option<PathBuf>> {
        let output = git_stdout(self.root(), &["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&output)
            .into_iter()
            .find(|entry| entry.branch.as_deref() == Some(branch))
            .map(|entry| entry.path))
    }

    /// Check whether a working directory has uncommitted changes
    pub(super) fn is_dirty(&self, dir: &Path) -> Result<bool> {
        let output = git_stdout(dir, &["status", "--porcelain"])?;
        Ok(!output.trim().is_empty())
    }

    /// Branch checked out in `dir`, or `None` when HEAD is detached
    pub(super) fn branch_in(&self, dir: &Path) -> Result<Option<String>> {
        let output = run_git(dir, &["symbolic-ref", "--short", "-q", "HEAD"])?;
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok(Some(name));
        }
        // symbolic-ref exits 1 with no output for a detached HEAD
        if output.status.code() == Some(1) && output.stderr.is_empty() {
            return Ok(None);
        }
        Err(Error::Git(format!(
            "Cannot read HEAD in {}: {}",
            dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
