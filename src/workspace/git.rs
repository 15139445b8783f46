//! Blocking git2 plumbing for the workspace lifecycle.
//!
//! Everything here touches the repository synchronously and is expected to be
//! called through `spawn_blocking` (see `workspace::WorkspaceManager`). The
//! merge path is conflict-checked entirely in memory via `merge_trees` before
//! any file in the main checkout is touched.

use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{BranchType, Delta, DiffOptions, Repository, Signature};
use tracing::debug;

use crate::errors::WorkspaceError;
use crate::model::{FileDiff, FileStatus, WorktreeDiff, WorktreeStatus};

/// Non-destructive preview of what a merge would do.
#[derive(Debug, Clone)]
pub struct MergePreview {
    pub conflicting_files: Vec<String>,
    pub needs_rebase: bool,
    pub commits_behind: usize,
    pub base_branch: String,
    pub branch: String,
}

/// A foreman-owned worktree discovered in the repository.
#[derive(Debug, Clone)]
pub struct WorktreeSummary {
    pub task_id: String,
    pub branch: String,
    pub path: PathBuf,
    pub commit_count: usize,
    pub files_changed: usize,
}

pub fn branch_name(task_id: &str, title: &str) -> String {
    format!("foreman/{}-{}", task_id, crate::model::slugify(title, 24))
}

/// Create a worktree for a task, branched from the base branch HEAD. Reuses
/// an existing branch of the same name.
pub fn create_worktree(
    repo_path: &Path,
    wt_path: &Path,
    task_id: &str,
    branch_name: &str,
    base_branch: &str,
) -> Result<(), WorkspaceError> {
    let repo = Repository::open(repo_path)?;
    let base_commit = resolve_branch_commit(&repo, base_branch)?;

    let branch = match repo.branch(branch_name, &base_commit, false) {
        Ok(b) => b,
        Err(e) if e.code() == git2::ErrorCode::Exists => {
            debug!(branch = branch_name, "branch already exists, reusing");
            repo.find_branch(branch_name, BranchType::Local)?
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(parent) = wt_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Worktree names may not contain '/', so key the registration by task id.
    let mut opts = git2::WorktreeAddOptions::new();
    opts.reference(Some(branch.get()));
    repo.worktree(task_id, wt_path, Some(&opts))?;
    Ok(())
}

/// Compute the read-only status view of a task's worktree.
pub fn worktree_status(
    repo_path: &Path,
    wt_path: &Path,
    branch_name: &str,
    base_branch: &str,
) -> Result<WorktreeStatus, WorkspaceError> {
    let repo = Repository::open(repo_path)?;
    if !wt_path.exists() || repo.find_branch(branch_name, BranchType::Local).is_err() {
        return Ok(WorktreeStatus::absent());
    }

    let base_commit = resolve_branch_commit(&repo, base_branch)?;
    let wt_commit = repo
        .find_branch(branch_name, BranchType::Local)?
        .get()
        .peel_to_commit()?;

    let mut revwalk = repo.revwalk()?;
    revwalk.push(wt_commit.id())?;
    revwalk.hide(base_commit.id())?;
    let commit_count = revwalk.count();

    let diff = branch_diff(&repo, &base_commit, &wt_commit)?;
    let stats = diff.stats()?;

    Ok(WorktreeStatus {
        exists: true,
        branch: branch_name.to_string(),
        base_branch: base_branch.to_string(),
        files_changed: stats.files_changed(),
        commit_count,
        additions: stats.insertions(),
        deletions: stats.deletions(),
        worktree_path: Some(wt_path.to_path_buf()),
    })
}

/// Full per-file diff between the branch point and the worktree branch head.
pub fn worktree_diff(
    repo_path: &Path,
    branch_name: &str,
    base_branch: &str,
) -> Result<WorktreeDiff, WorkspaceError> {
    let repo = Repository::open(repo_path)?;
    let base_commit = resolve_branch_commit(&repo, base_branch)?;
    let wt_commit = repo
        .find_branch(branch_name, BranchType::Local)?
        .get()
        .peel_to_commit()?;
    let diff = branch_diff(&repo, &base_commit, &wt_commit)?;

    let mut files = Vec::new();
    for delta_idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(delta_idx) else {
            continue;
        };
        let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) else {
            continue;
        };
        let status = match delta.status() {
            Delta::Added | Delta::Untracked => FileStatus::Added,
            Delta::Modified => FileStatus::Modified,
            Delta::Deleted => FileStatus::Deleted,
            Delta::Renamed => FileStatus::Renamed,
            _ => continue,
        };

        let mut additions = 0;
        let mut deletions = 0;
        if let Ok(Some(patch)) = git2::Patch::from_diff(&diff, delta_idx) {
            let (_, adds, dels) = patch.line_stats()?;
            additions = adds;
            deletions = dels;
        }

        files.push(FileDiff {
            path: path.display().to_string(),
            status,
            additions,
            deletions,
        });
    }

    let stats = diff.stats()?;
    Ok(WorktreeDiff {
        summary: format!(
            "{} file(s) changed, +{} -{}",
            stats.files_changed(),
            stats.insertions(),
            stats.deletions()
        ),
        files,
    })
}

/// In-memory three-way merge check. Never touches the working directory, so
/// it is safe to run while editors or file watchers are open on the checkout.
pub fn merge_preview(
    repo_path: &Path,
    branch_name: &str,
    base_branch: &str,
) -> Result<MergePreview, WorkspaceError> {
    let repo = Repository::open(repo_path)?;
    let base_commit = resolve_branch_commit(&repo, base_branch)?;
    let wt_commit = repo
        .find_branch(branch_name, BranchType::Local)?
        .get()
        .peel_to_commit()?;

    let (_, commits_behind) = repo.graph_ahead_behind(wt_commit.id(), base_commit.id())?;
    let conflicting_files = merged_index_conflicts(&repo, &base_commit, &wt_commit)?;

    Ok(MergePreview {
        conflicting_files,
        needs_rebase: commits_behind > 0,
        commits_behind,
        base_branch: base_branch.to_string(),
        branch: branch_name.to_string(),
    })
}

/// Merge the worktree branch into the base branch.
///
/// Conflicts are detected in memory first; on conflict nothing is modified
/// and the caller gets the file list. With `stage_only` the merged tree is
/// staged into the index and checked out, but no commit is created. Returns
/// the merge commit id, if one was made.
pub fn merge_worktree(
    repo_path: &Path,
    branch_name: &str,
    base_branch: &str,
    message: &str,
    stage_only: bool,
) -> Result<Option<String>, WorkspaceError> {
    let repo = Repository::open(repo_path)?;
    let base_branch = effective_base_name(&repo, base_branch)?;
    let base_branch = base_branch.as_str();
    let base_commit = resolve_branch_commit(&repo, base_branch)?;
    let wt_commit = repo
        .find_branch(branch_name, BranchType::Local)?
        .get()
        .peel_to_commit()?;

    let ancestor_id = repo.merge_base(base_commit.id(), wt_commit.id())?;
    let ancestor_tree = repo.find_commit(ancestor_id)?.tree()?;
    let mut merged = repo.merge_trees(
        &ancestor_tree,
        &base_commit.tree()?,
        &wt_commit.tree()?,
        None,
    )?;
    if merged.has_conflicts() {
        return Err(WorkspaceError::MergeConflicts {
            files: conflict_paths(&merged),
        });
    }

    let merged_tree = repo.find_tree(merged.write_tree_to(&repo)?)?;

    if stage_only {
        let mut index = repo.index()?;
        index.read_tree(&merged_tree)?;
        index.write()?;
        let mut co = CheckoutBuilder::new();
        co.force();
        repo.checkout_index(Some(&mut index), Some(&mut co))?;
        return Ok(None);
    }

    let sig = Signature::now("foreman", "foreman@localhost")?;
    let commit_id = repo.commit(
        Some(&format!("refs/heads/{}", base_branch)),
        &sig,
        &sig,
        message,
        &merged_tree,
        &[&base_commit, &wt_commit],
    )?;

    // Sync the checkout if the base branch is the current HEAD.
    if repo
        .head()
        .ok()
        .and_then(|h| h.shorthand().map(String::from))
        .as_deref()
        == Some(base_branch)
    {
        let mut co = CheckoutBuilder::new();
        co.force();
        repo.checkout_head(Some(&mut co))?;
    }

    Ok(Some(commit_id.to_string()))
}

/// Remove a task's worktree registration, directory, and branch.
pub fn remove_worktree(
    repo_path: &Path,
    wt_path: &Path,
    task_id: &str,
    branch_name: &str,
) -> Result<(), WorkspaceError> {
    let repo = Repository::open(repo_path)?;

    if let Ok(wt) = repo.find_worktree(task_id) {
        let mut opts = git2::WorktreePruneOptions::new();
        opts.valid(true).working_tree(true);
        if let Err(e) = wt.prune(Some(&mut opts)) {
            debug!(task_id, err = %e, "worktree prune failed, cleaning directory manually");
        }
    }
    if wt_path.exists() {
        std::fs::remove_dir_all(wt_path)?;
    }
    if let Ok(mut branch) = repo.find_branch(branch_name, BranchType::Local) {
        branch.delete()?;
    }
    Ok(())
}

/// All foreman-owned worktrees registered in the repository.
pub fn list_worktrees(
    repo_path: &Path,
    base_branch: &str,
) -> Result<Vec<WorktreeSummary>, WorkspaceError> {
    let repo = Repository::open(repo_path)?;
    let mut summaries = Vec::new();

    for name in repo.worktrees()?.iter().flatten() {
        let Ok(wt) = repo.find_worktree(name) else {
            continue;
        };
        let wt_path = wt.path().to_path_buf();
        // Foreman worktrees are branched as foreman/<task-id>-<slug>.
        let Some(branch) = find_foreman_branch(&repo, name) else {
            continue;
        };
        let status = worktree_status(repo_path, &wt_path, &branch, base_branch)?;
        summaries.push(WorktreeSummary {
            task_id: name.to_string(),
            branch,
            path: wt_path,
            commit_count: status.commit_count,
            files_changed: status.files_changed,
        });
    }
    Ok(summaries)
}

fn find_foreman_branch(repo: &Repository, task_id: &str) -> Option<String> {
    let prefix = format!("foreman/{}-", task_id);
    let branches = repo.branches(Some(BranchType::Local)).ok()?;
    for branch in branches.flatten() {
        if let Ok(Some(name)) = branch.0.name()
            && name.starts_with(&prefix)
        {
            return Some(name.to_string());
        }
    }
    None
}

/// The branch merges actually land on: the configured base if it exists,
/// otherwise the repository's current HEAD branch.
fn effective_base_name(repo: &Repository, base_branch: &str) -> Result<String, WorkspaceError> {
    if repo.find_branch(base_branch, BranchType::Local).is_ok() {
        return Ok(base_branch.to_string());
    }
    let head = repo.head()?;
    Ok(head.shorthand().unwrap_or(base_branch).to_string())
}

fn resolve_branch_commit<'r>(
    repo: &'r Repository,
    base_branch: &str,
) -> Result<git2::Commit<'r>, WorkspaceError> {
    if let Ok(branch) = repo.find_branch(base_branch, BranchType::Local) {
        return Ok(branch.get().peel_to_commit()?);
    }
    // Fall back to HEAD for repositories whose default branch differs from
    // the configured name.
    Ok(repo.head()?.peel_to_commit()?)
}

fn branch_diff<'r>(
    repo: &'r Repository,
    base_commit: &git2::Commit<'_>,
    wt_commit: &git2::Commit<'_>,
) -> Result<git2::Diff<'r>, WorkspaceError> {
    let ancestor_id = repo.merge_base(base_commit.id(), wt_commit.id())?;
    let ancestor_tree = repo.find_commit(ancestor_id)?.tree()?;
    let mut opts = DiffOptions::new();
    Ok(repo.diff_tree_to_tree(
        Some(&ancestor_tree),
        Some(&wt_commit.tree()?),
        Some(&mut opts),
    )?)
}

fn merged_index_conflicts(
    repo: &Repository,
    base_commit: &git2::Commit<'_>,
    wt_commit: &git2::Commit<'_>,
) -> Result<Vec<String>, WorkspaceError> {
    let ancestor_id = repo.merge_base(base_commit.id(), wt_commit.id())?;
    let ancestor_tree = repo.find_commit(ancestor_id)?.tree()?;
    let merged = repo.merge_trees(
        &ancestor_tree,
        &base_commit.tree()?,
        &wt_commit.tree()?,
        None,
    )?;
    if merged.has_conflicts() {
        Ok(conflict_paths(&merged))
    } else {
        Ok(Vec::new())
    }
}

fn conflict_paths(index: &git2::Index) -> Vec<String> {
    let mut files = Vec::new();
    if let Ok(conflicts) = index.conflicts() {
        for conflict in conflicts.flatten() {
            let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
            if let Some(entry) = entry {
                let path = String::from_utf8_lossy(&entry.path).to_string();
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
    }
    files
}
