//! Git operations for corral
//!
//! The orchestrator talks to version control only through the
//! [`VersionControl`] trait. [`GitRepo`] implements it with libgit2 for
//! reads and the `git` CLI for worktree, merge and checkout operations.

mod branch;
mod merge;
mod repo;
mod worktree;

use std::path::{Path, PathBuf};

use crate::Result;

pub use repo::GitRepo;
pub use worktree::{default_worktree_dir, worktree_path};

/// A local branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    /// Checked out in the main working directory
    pub is_current: bool,
}

/// Result of merging a ref into a checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A merge commit (or fast-forward) was created
    Clean,
    /// Nothing to merge
    AlreadyUpToDate,
    /// The merge stopped with conflicts in these paths
    Conflicts(Vec<String>),
}

/// Version-control operations the orchestrator consumes
///
/// Every call blocks until the underlying tool finishes.
pub trait VersionControl: Send + Sync {
    /// Main working directory of the repository
    fn root(&self) -> &Path;

    /// List local branches
    fn list_branches(&self) -> Result<Vec<BranchInfo>>;

    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Create `name` pointing at `start_point`
    fn create_branch(&self, name: &str, start_point: &str) -> Result<()>;

    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Whether the branch is checked out in any worktree
    fn is_checked_out(&self, branch: &str) -> Result<bool>;

    /// Worktree that has the branch checked out, if any
    fn worktree_for_branch(&self, branch: &str) -> Result<Option<PathBuf>>;

    /// Whether `ancestor` is reachable from `descendant` (or equal)
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Create an isolated working directory bound to an existing branch
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<()>;

    fn remove_worktree(&self, path: &Path) -> Result<()>;

    fn has_uncommitted_changes(&self, dir: &Path) -> Result<bool>;

    /// Commit checked out in a directory
    fn head(&self, dir: &Path) -> Result<String>;

    /// Resolve a ref to a commit
    fn resolve(&self, reference: &str) -> Result<String>;

    /// Point a branch at a commit unconditionally
    fn update_branch(&self, branch: &str, commit: &str) -> Result<()>;

    /// Merge `reference` into the checkout at `dir`
    fn merge(&self, dir: &Path, reference: &str) -> Result<MergeOutcome>;

    fn abort_merge(&self, dir: &Path) -> Result<()>;

    fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>>;

    /// Fast-forward the checkout at `dir` to `reference`, failing otherwise
    fn merge_ff_only(&self, dir: &Path, reference: &str) -> Result<()>;

    /// Apply the uncommitted (and untracked) changes of `from` onto `to`
    fn copy_uncommitted(&self, from: &Path, to: &Path) -> Result<()>;

    /// Branch checked out in a directory (`None` when detached)
    fn current_branch(&self, dir: &Path) -> Result<Option<String>>;

    fn checkout(&self, dir: &Path, branch: &str) -> Result<()>;

    /// Throw away tracked and untracked changes in a directory
    fn discard_changes(&self, dir: &Path) -> Result<()>;
}
