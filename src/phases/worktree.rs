//! Scoped git worktrees.
//!
//! Every script runs against its own detached worktree of the module's
//! repository, so scripts can modify files freely. The worktree is removed
//! when the guard is dropped.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::Result;
use crate::git;

#[derive(Debug)]
pub struct Worktree {
    scm_root: PathBuf,
    path: PathBuf,
}

impl Worktree {
    /// Checks out `HEAD` of `scm_root` at `path`.
    pub fn create(scm_root: &Path, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        git::worktree_add(scm_root, path)?;
        debug!("created worktree {}", path.display());
        Ok(Self {
            scm_root: scm_root.to_path_buf(),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies the changes staged in `scm_root` to this worktree.
    pub fn replay_staged(&self) -> Result<()> {
        let patch = git::diff_staged(&self.scm_root)?;
        if patch.is_empty() {
            return Ok(());
        }
        git::apply(&self.path, &patch)
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        if let Err(e) = git::worktree_remove(&self.scm_root, &self.path) {
            warn!("failed to remove worktree {}: {}", self.path.display(), e);
        }
    }
}
