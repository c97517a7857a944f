//! Thin wrappers around the system `git` command.
//!
//! Using the system binary means credential helpers, SSH keys and any
//! configuration in `~/.gitconfig` apply unchanged. Every failure is an
//! [`Error::Command`](crate::error::Error::Command) carrying the command
//! line and its output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::Result;
use crate::process;

fn git(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir);
    cmd
}

/// Full hash of `HEAD` in `dir`.
pub fn rev_parse_head(dir: &Path) -> Result<String> {
    process::run_stdout(git(dir).args(["rev-parse", "HEAD"]))
}

/// Top level of the working tree containing `dir`.
pub fn toplevel(dir: &Path) -> Result<PathBuf> {
    let out = process::run_stdout(git(dir).args(["rev-parse", "--show-toplevel"]))?;
    Ok(PathBuf::from(out))
}

/// `git status --porcelain` output for the whole working tree.
pub fn status_porcelain(dir: &Path) -> Result<String> {
    let output = process::run(git(dir).args(["status", "--porcelain"]))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Creates a detached worktree of `HEAD` of `root` at `path`.
///
/// Safe to call concurrently for distinct paths against one root.
pub fn worktree_add(root: &Path, path: &Path) -> Result<()> {
    debug!("git worktree add {}", path.display());
    process::run(git(root).args(["worktree", "add", "--detach"]).arg(path)).map(|_| ())
}

/// Removes the worktree at `path`. Removing one that is already gone
/// succeeds.
pub fn worktree_remove(root: &Path, path: &Path) -> Result<()> {
    if !path.exists() {
        return process::run(git(root).args(["worktree", "prune"])).map(|_| ());
    }
    process::run(
        git(root)
            .args(["worktree", "remove", "--force"])
            .arg(path),
    )
    .map(|_| ())
}

/// Staged changes of `dir` as a binary patch.
pub fn diff_staged(dir: &Path) -> Result<Vec<u8>> {
    Ok(process::run(git(dir).args(["diff", "--staged", "--binary"]))?.stdout)
}

/// Applies `patch` to the working tree at `dir`.
pub fn apply(dir: &Path, patch: &[u8]) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }
    process::run_with_stdin(git(dir).arg("apply"), patch).map(|_| ())
}

/// Clones `url` into `dest` (whose parent must exist).
pub fn clone(url: &str, dest: &Path) -> Result<()> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    debug!("git clone {} {}", url, dest.display());
    process::run(git(parent).args(["clone", url]).arg(dest)).map(|_| ())
}

/// Fetches `refspec` (or everything when `None`) from `remote`.
pub fn fetch(dir: &Path, remote: &str, refspec: Option<&str>) -> Result<()> {
    let mut cmd = git(dir);
    cmd.args(["fetch", remote]);
    if let Some(r) = refspec {
        cmd.arg(r);
    }
    process::run(&mut cmd).map(|_| ())
}

/// Checks out `rev` with a detached `HEAD`.
pub fn checkout_detached(dir: &Path, rev: &str) -> Result<()> {
    process::run(git(dir).args(["checkout", "-q", "--detach", rev])).map(|_| ())
}

/// Switches to `FETCH_HEAD` with a detached `HEAD`.
pub fn switch_fetch_head(dir: &Path) -> Result<()> {
    process::run(git(dir).args(["switch", "-q", "-d", "FETCH_HEAD"])).map(|_| ())
}

/// Paths of the submodules declared in `root/.gitmodules`, in file order.
pub fn submodule_paths(root: &Path) -> Result<Vec<String>> {
    if !root.join(".gitmodules").is_file() {
        return Ok(Vec::new());
    }
    let out = process::run_stdout(git(root).args([
        "config",
        "--file",
        ".gitmodules",
        "--get-regexp",
        r"^submodule\..*\.path$",
    ]))?;
    Ok(out
        .lines()
        .filter_map(|line| line.split_once(' ').map(|(_, p)| p.trim().to_string()))
        .filter(|p| !p.is_empty())
        .collect())
}
