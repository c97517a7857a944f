//! `commit:<ref>` versions, built from the shared clone.

use std::path::Path;
use std::sync::Arc;

use super::{ResolveRequest, SharedClone, Strategy};
use crate::error::{Error, Result};
use crate::git;

pub const COMMIT_PREFIX: &str = "commit:";

pub struct CommitStrategy {
    clone: Arc<SharedClone>,
}

impl CommitStrategy {
    pub fn new(clone: Arc<SharedClone>) -> Self {
        Self { clone }
    }
}

/// Checks out `rev`, fetching from `origin` first if it is unknown, and
/// returns the full hash of the result.
fn checkout(dir: &Path, rev: &str) -> Result<String> {
    if git::checkout_detached(dir, rev).is_err() {
        git::fetch(dir, "origin", None)?;
        git::checkout_detached(dir, rev)?;
    }
    git::rev_parse_head(dir)
}

impl Strategy for CommitStrategy {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
        let rev = req.version.strip_prefix(COMMIT_PREFIX)?;
        if rev.is_empty() {
            return Some(Err(Error::Resolution {
                version: req.version.to_string(),
                message: "empty commit reference".to_string(),
            }));
        }
        Some(
            self.clone
                .resolve(rev, req.target, |dir| checkout(dir, rev)),
        )
    }
}
