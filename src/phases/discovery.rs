//! Phase 1: Discovery
//!
//! Finds the modules to test below the source control root of the starting
//! directory.
//!
//! ## Process
//!
//! 1.  **Project or corpus**: In project mode the starting repository is
//!     searched. In corpus mode each checked-out submodule listed in
//!     `.gitmodules` is searched instead, and one that holds no module is an
//!     error.
//!
//! 2.  **Walk**: Directories whose name starts with `.` or `_` are skipped, as
//!     are nested repositories. A directory named after the module marker
//!     (`cue.mod`) makes its parent a module root and is not descended into.
//!
//! 3.  **Status**: Untracked files always block a run. Staged changes block
//!     unless they are to be replayed into each worktree. `--ignore-dirty`
//!     disables both checks.
//!
//! 4.  **Load**: The manifest and the scripts are read and checked before
//!     any run starts, so a broken module fails fast.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use super::Module;
use crate::config::TargetConfig;
use crate::error::{Error, Result};
use crate::git;
use crate::manifest::Manifest;
use crate::script;

/// Where and how to look for modules.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub dir: PathBuf,
    pub corpus: bool,
    /// Directory whose `<module path>` subdirectories replace module
    /// manifest directories.
    pub overlay: Option<PathBuf>,
    /// Staged changes are replayed into worktrees.
    pub staged: bool,
    pub ignore_dirty: bool,
}

/// Discovers every module reachable from `opts.dir`.
pub fn discover(target: &TargetConfig, opts: &DiscoveryOptions) -> Result<Vec<Module>> {
    let root = git::toplevel(&opts.dir)?;
    let modules = if opts.corpus {
        let mut modules = Vec::new();
        for sub in git::submodule_paths(&root)? {
            let project = root.join(&sub);
            if !project.join(".git").exists() {
                debug!("skipping submodule {} (not checked out)", sub);
                continue;
            }
            let found = discover_project(target, opts, &root, &project)?;
            if found.is_empty() {
                return Err(Error::NoModules { dir: project });
            }
            modules.extend(found);
        }
        modules
    } else {
        discover_project(target, opts, &root, &root)?
    };
    if modules.is_empty() {
        return Err(Error::NoModules { dir: root });
    }
    Ok(modules)
}

fn discover_project(
    target: &TargetConfig,
    opts: &DiscoveryOptions,
    tester_root: &Path,
    project: &Path,
) -> Result<Vec<Module>> {
    let roots = module_roots(&target.module_marker, project)?;
    if roots.is_empty() {
        return Ok(Vec::new());
    }
    let has_staged = check_status(project, opts)?;
    roots
        .into_iter()
        .map(|root| load_module(target, opts, tester_root, project, root, has_staged))
        .collect()
}

/// Directories below `project` that contain a `marker` directory.
pub fn module_roots(marker: &str, project: &Path) -> Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    let mut walker = WalkDir::new(project).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let is_dir = entry.file_type().is_dir();
        if name == marker {
            if !is_dir {
                return Err(Error::Discovery {
                    path: entry.path().to_path_buf(),
                    message: format!("{marker} is not a directory"),
                });
            }
            if let Some(parent) = entry.path().parent() {
                roots.push(parent.to_path_buf());
            }
            walker.skip_current_dir();
        } else if is_dir
            && (name.starts_with('.') || name.starts_with('_') || entry.path().join(".git").exists())
        {
            walker.skip_current_dir();
        }
    }
    Ok(roots)
}

/// Untracked and staged entries of a porcelain status listing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TreeState {
    pub untracked: bool,
    pub staged: bool,
}

impl TreeState {
    pub fn parse(porcelain: &str) -> Self {
        let mut state = TreeState::default();
        for line in porcelain.lines() {
            if line.starts_with("??") {
                state.untracked = true;
            } else if line.chars().next().is_some_and(|c| c != ' ') {
                state.staged = true;
            }
        }
        state
    }
}

/// Returns whether `project` has staged changes, failing when its state
/// does not fit the options.
fn check_status(project: &Path, opts: &DiscoveryOptions) -> Result<bool> {
    let state = TreeState::parse(&git::status_porcelain(project)?);
    if opts.ignore_dirty {
        return Ok(state.staged);
    }
    if state.untracked {
        return Err(Error::DirtyWorkingTree {
            dir: project.to_path_buf(),
            state: "untracked files".to_string(),
            hint: Some("add, remove or ignore them, or pass --ignore-dirty".to_string()),
        });
    }
    if state.staged && !opts.staged {
        return Err(Error::DirtyWorkingTree {
            dir: project.to_path_buf(),
            state: "staged changes".to_string(),
            hint: Some("pass --staged to test them".to_string()),
        });
    }
    Ok(state.staged)
}

fn relative(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn load_module(
    target: &TargetConfig,
    opts: &DiscoveryOptions,
    tester_root: &Path,
    project: &Path,
    root: PathBuf,
    has_staged: bool,
) -> Result<Module> {
    let rel_path = relative(&root, project);
    let tester_rel = relative(&root, tester_root);

    let mut manifest_dir = root.join(target.manifest_subdir());
    if let Some(overlay) = &opts.overlay {
        let candidate = overlay.join(&tester_rel);
        if candidate.is_dir() {
            debug!("using overlay {} for {}", candidate.display(), root.display());
            manifest_dir = candidate;
        }
    }
    let manifest = Manifest::load(&manifest_dir)?;
    let scripts = script::list_scripts(&manifest_dir)?;
    for path in &scripts {
        script::check_reserved(path)?;
    }
    let display = display_path(&root.join(&target.module_marker), &tester_rel);
    debug!("found module {} ({} scripts)", display, scripts.len());

    Ok(Module {
        root,
        scm_root: project.to_path_buf(),
        rel_path,
        tester_rel,
        display,
        manifest_dir,
        manifest,
        scripts,
        has_staged,
    })
}

/// Value of the `module:` field of a module file.
fn declared_module(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let value = line.trim().strip_prefix("module:")?.trim();
        let value = value.strip_prefix('"')?.split('"').next()?;
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// The module path declared in `<marker>/module.cue`, else `tester_rel`.
fn display_path(marker_dir: &Path, tester_rel: &Path) -> String {
    let declared = fs::read_to_string(marker_dir.join("module.cue"))
        .ok()
        .and_then(|text| declared_module(&text));
    declared.unwrap_or_else(|| {
        let rel = tester_rel.to_string_lossy();
        if rel.is_empty() {
            ".".to_string()
        } else {
            rel.into_owned()
        }
    })
}
