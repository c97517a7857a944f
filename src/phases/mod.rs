//! Phases of a `unity test` run.
//!
//! ## Overview
//!
//! A run follows these phases:
//! 1. Discovery - Find modules, their manifests and recorded scripts
//! 2. Base - Run every module against the versions its manifest lists
//! 3. Extra - Run every module against the versions given on the command
//!    line, only when no base run failed
//! 4. Report - Aggregate results, print logs and the summary table
//!
//! Within a phase, runs execute in parallel. Each run resolves a binary,
//! creates one worktree per script and hands the scripts to a
//! [`dispatch::Dispatcher`].

use std::path::PathBuf;
use std::time::Duration;

use crate::manifest::Manifest;

pub mod discovery;
pub mod dispatch;
pub mod orchestrator;
pub mod report;
pub mod worktree;

/// A directory tree with a module marker and a manifest.
#[derive(Debug, Clone)]
pub struct Module {
    /// Directory containing the module marker.
    pub root: PathBuf,
    /// Top level of the source control working tree containing `root`.
    pub scm_root: PathBuf,
    /// `root` relative to `scm_root`.
    pub rel_path: PathBuf,
    /// `root` relative to the directory discovery started from.
    pub tester_rel: PathBuf,
    /// Name shown in reports.
    pub display: String,
    pub manifest_dir: PathBuf,
    pub manifest: Manifest,
    /// Recorded scripts, sorted by name.
    pub scripts: Vec<PathBuf>,
    /// The working tree had staged changes at discovery time.
    pub has_staged: bool,
}

impl Module {
    /// `tester_rel` as shown in script logs, `.` for the discovery root.
    pub fn tester_rel_display(&self) -> String {
        let rel = self.tester_rel.to_string_lossy();
        if rel.is_empty() {
            ".".to_string()
        } else {
            rel.into_owned()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// At least one script failed.
    Failed,
    /// The run could not be carried out.
    Errored(String),
}

/// Result of running one module against one version.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Display path of the module.
    pub module: String,
    pub requested: String,
    /// Canonical version; the requested identifier when resolution failed.
    pub resolved: String,
    pub outcome: Outcome,
    pub log: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}
