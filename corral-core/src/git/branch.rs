//! Local branch management

use git2::{BranchType, Oid};

use super::repo::GitRepo;
use super::BranchInfo;
use crate::{Error, Result};

impl GitRepo {
    /// List local branches, marking the one checked out in the main directory
    pub(super) fn local_branches(&self) -> Result<Vec<BranchInfo>> {
        self.with_repo(|repo| {
            let mut branches = Vec::new();
            for entry in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = entry?;
                let Some(name) = branch.name()? else {
                    continue;
                };
                branches.push(BranchInfo {
                    name: name.to_string(),
                    is_current: branch.is_head(),
                });
            }
            branches.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(branches)
        })
    }

    pub(super) fn local_branch_exists(&self, name: &str) -> Result<bool> {
        self.with_repo(|repo| Ok(repo.find_branch(name, BranchType::Local).is_ok()))
    }

    pub(super) fn create_local_branch(&self, name: &str, start_point: &str) -> Result<()> {
        self.with_repo(|repo| {
            let commit = repo
                .revparse_single(start_point)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|e| {
                    Error::Git(format!("Cannot resolve '{}': {}", start_point, e.message()))
                })?;
            repo.branch(name, &commit, false).map_err(|e| {
                if e.code() == git2::ErrorCode::Exists {
                    Error::BranchInUse(name.to_string())
                } else {
                    Error::Git(e.message().to_string())
                }
            })?;
            tracing::debug!(branch = name, start_point, "Created branch");
            Ok(())
        })
    }

    pub(super) fn delete_local_branch(&self, name: &str) -> Result<()> {
        self.with_repo(|repo| {
            let mut branch = repo.find_branch(name, BranchType::Local).map_err(|e| {
                Error::Git(format!("Branch '{}' not found: {}", name, e.message()))
            })?;
            branch.delete()?;
            tracing::debug!(branch = name, "Deleted branch");
            Ok(())
        })
    }

    /// Resolve any revision to a full commit SHA
    pub(super) fn resolve_commit(&self, reference: &str) -> Result<String> {
        self.with_repo(|repo| {
            let commit = repo
                .revparse_single(reference)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|e| {
                    Error::Git(format!("Cannot resolve '{}': {}", reference, e.message()))
                })?;
            Ok(commit.id().to_string())
        })
    }

    /// Whether `ancestor` is reachable from `descendant`; equal commits count
    pub(super) fn contains(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let ancestor = self.resolve_commit(ancestor)?;
        let descendant = self.resolve_commit(descendant)?;
        if ancestor == descendant {
            return Ok(true);
        }
        self.with_repo(|repo| {
            let ancestor = Oid::from_str(&ancestor)?;
            let descendant = Oid::from_str(&descendant)?;
            Ok(repo.graph_descendant_of(descendant, ancestor)?)
        })
    }

    /// Move a branch to `commit` without touching any checkout
    pub(super) fn force_branch(&self, branch: &str, commit: &str) -> Result<()> {
        let commit = self.resolve_commit(commit)?;
        self.with_repo(|repo| {
            let oid = Oid::from_str(&commit)?;
            repo.reference(
                &format!("refs/heads/{}", branch),
                oid,
                true,
                &format!("corral: update {} to {}", branch, &commit[..commit.len().min(8)]),
            )?;
            Ok(())
        })
    }
}
