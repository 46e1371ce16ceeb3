//! Merging, fast-forwarding and carrying uncommitted work between checkouts

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use super::repo::{git_stdout, run_git, GitRepo};
use super::MergeOutcome;
use crate::{Error, Result};

impl GitRepo {
    /// Merge `reference` into the checkout at `dir`
    ///
    /// Conflicts leave the merge in progress so it can be resolved or aborted.
    pub(super) fn merge_into(&self, dir: &Path, reference: &str) -> Result<MergeOutcome> {
        let output = run_git(dir, &["merge", "--no-edit", reference])?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() {
            if stdout.contains("Already up to date") || stdout.contains("Already up-to-date") {
                return Ok(MergeOutcome::AlreadyUpToDate);
            }
            return Ok(MergeOutcome::Clean);
        }

        let conflicts = self.conflicted_paths(dir)?;
        if conflicts.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git(format!(
                "git merge {} failed: {}",
                reference,
                stderr.trim()
            )));
        }

        tracing::debug!(dir = %dir.display(), reference, files = conflicts.len(), "Merge stopped with conflicts");
        Ok(MergeOutcome::Conflicts(conflicts))
    }

    pub fn abort_merge(&self, dir: &Path) -> Result<()> {
        git_stdout(dir, &["merge", "--abort"]).map(|_| ())
    }

    /// Paths with unresolved conflicts in `dir`
    pub fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>> {
        let output = git_stdout(dir, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    pub(super) fn fast_forward(&self, dir: &Path, reference: &str) -> Result<()> {
        git_stdout(dir, &["merge", "--ff-only", reference]).map(|_| ())
    }

    /// Replay the uncommitted and untracked changes of `from` onto `to`
    pub fn copy_uncommitted(&self, from: &Path, to: &Path) -> Result<()> {
        let diff = run_git(from, &["diff", "HEAD", "--binary"])?;
        if !diff.status.success() {
            return Err(Error::Git(format!(
                "git diff failed: {}",
                String::from_utf8_lossy(&diff.stderr).trim()
            )));
        }

        if !diff.stdout.is_empty() {
            apply_patch(to, &diff.stdout)?;
        }

        let untracked = git_stdout(from, &["ls-files", "--others", "--exclude-standard"])?;
        for relative in untracked.lines().filter(|l| !l.is_empty()) {
            let source = from.join(relative);
            let target = to.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, &target)?;
        }

        Ok(())
    }
}

/// Pipe a patch into `git apply` in `dir`
fn apply_patch(dir: &Path, patch: &[u8]) -> Result<()> {
    let mut child = Command::new("git")
        .args(["apply", "--whitespace=nowarn", "-"])
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Git(format!("Failed to run git apply: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(patch)?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(Error::Git(format!(
            "git apply failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
