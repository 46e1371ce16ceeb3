//! Git repository detection and the `VersionControl` implementation

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use git2::Repository;
use parking_lot::Mutex;

use super::{BranchInfo, MergeOutcome, VersionControl};
use crate::{Error, Result};

/// A git repository wrapper providing corral-specific operations
pub struct GitRepo {
    /// The underlying git2 repository
    repo: Mutex<Repository>,
    /// Path to the main working directory
    root: PathBuf,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open a git repository at the given path
    ///
    /// This will search upward from the given path to find the repository
    /// root. When `path` is inside a linked worktree, the main working
    /// directory is used as the root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::discover(path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::Config(format!(
                    "Not a git repository: {}. Run 'git init' first or navigate to a git repository.",
                    path.display()
                ))
            } else {
                Error::Git(e.message().to_string())
            }
        })?;

        let repo = if repo.is_worktree() {
            Repository::open(common_dir(repo.path()))?
        } else {
            repo
        };

        let root = repo
            .workdir()
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
            .to_path_buf();

        Ok(Self {
            repo: Mutex::new(repo),
            root,
        })
    }

    /// Get the main working directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if the given path is inside a git repository
    pub fn is_git_repo(path: impl AsRef<Path>) -> bool {
        Repository::discover(path.as_ref()).is_ok()
    }

    /// Repository name, used for state and worktree directory naming
    pub fn repo_name(&self) -> String {
        self.root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Get the default branch name (main or master)
    pub fn default_branch(&self) -> String {
        let repo = self.repo.lock();
        for candidate in ["main", "master"] {
            if repo
                .find_reference(&format!("refs/heads/{}", candidate))
                .is_ok()
            {
                return candidate.to_string();
            }
        }
        "main".to_string()
    }

    /// Run a closure against the locked libgit2 handle
    pub(super) fn with_repo<T>(&self, f: impl FnOnce(&Repository) -> Result<T>) -> Result<T> {
        let repo = self.repo.lock();
        f(&repo)
    }
}

/// Run `git` in `dir`, returning the raw output
pub(super) fn run_git(dir: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::Git(format!("Failed to run git {}: {}", args.join(" "), e)))
}

/// Run `git` in `dir`, failing with stderr when it exits non-zero
pub(super) fn git_stdout(dir: &Path, args: &[&str]) -> Result<String> {
    let output = run_git(dir, args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl VersionControl for GitRepo {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        self.local_branches()
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        self.local_branch_exists(name)
    }

    fn create_branch(&self, name: &str, start_point: &str) -> Result<()> {
        self.create_local_branch(name, start_point)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        self.delete_local_branch(name)
    }

    fn is_checked_out(&self, branch: &str) -> Result<bool> {
        Ok(self.worktree_for(branch)?.is_some())
    }

    fn worktree_for_branch(&self, branch: &str) -> Result<Option<PathBuf>> {
        self.worktree_for(branch)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.contains(ancestor, descendant)
    }

    fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        self.create_worktree(path, branch)
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        GitRepo::remove_worktree(self, path)
    }

    fn has_uncommitted_changes(&self, dir: &Path) -> Result<bool> {
        self.is_dirty(dir)
    }

    fn head(&self, dir: &Path) -> Result<String> {
        Ok(git_stdout(dir, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        self.resolve_commit(reference)
    }

    fn update_branch(&self, branch: &str, commit: &str) -> Result<()> {
        self.force_branch(branch, commit)
    }

    fn merge(&self, dir: &Path, reference: &str) -> Result<MergeOutcome> {
        self.merge_into(dir, reference)
    }

    fn abort_merge(&self, dir: &Path) -> Result<()> {
        GitRepo::abort_merge(self, dir)
    }

    fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>> {
        GitRepo::conflicted_paths(self, dir)
    }

    fn merge_ff_only(&self, dir: &Path, reference: &str) -> Result<()> {
        self.fast_forward(dir, reference)
    }

    fn copy_uncommitted(&self, from: &Path, to: &Path) -> Result<()> {
        GitRepo::copy_uncommitted(self, from, to)
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        self.branch_in(dir)
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        git_stdout(dir, &["checkout", branch]).map(|_| ())
    }

    fn discard_changes(&self, dir: &Path) -> Result<()> {
        git_stdout(dir, &["reset", "--hard", "HEAD"])?;
        git_stdout(dir, &["clean", "-fd"]).map(|_| ())
    }
}

/// Shared git directory of a linked worktree's private git directory
///
/// A linked worktree lives at `<common>/worktrees/<name>` and names its
/// common directory in the `commondir` file.
fn common_dir(gitdir: &Path) -> PathBuf {
    if let Ok(contents) = std::fs::read_to_string(gitdir.join("commondir")) {
        let common = Path::new(contents.trim());
        return if common.is_absolute() {
            common.to_path_buf()
        } else {
            gitdir.join(common)
        };
    }
    gitdir
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| gitdir.to_path_buf())
}
