//! Orchestrator for a complete test matrix.
//!
//! Runs the base phase (manifest versions) and then, only if every base run
//! passed, the extra phase (versions given on the command line). Each phase
//! runs on a rayon pool and completes before the next one is scheduled. A
//! failing run never stops its siblings.
//!
//! A run's duration covers dispatching its scripts only, not resolving the
//! version or creating worktrees. Runs that may rewrite recorded output take
//! a per-manifest-directory gate, so runs sharing archives update them one
//! at a time.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{info, warn};
use rayon::prelude::*;

use super::dispatch::{DispatchRequest, Dispatcher};
use super::worktree::Worktree;
use super::{Module, Outcome, TestResult};
use crate::config::TargetConfig;
use crate::error::{Error, Result};
use crate::resolve::{ResolutionTarget, Resolver};
use crate::script::runner::{script_workdir, SuiteOutcome};
use crate::script::{self, REPO_DIR};

/// Options of one matrix run.
#[derive(Debug, Clone, Default)]
pub struct MatrixOptions {
    /// Extra versions every module is tested against.
    pub versions: Vec<String>,
    pub skip_base: bool,
    /// Rewrite recorded output on mismatch where allowed.
    pub update: bool,
    pub verbose: bool,
    /// Script name filter or manifest filter name.
    pub run: Option<String>,
    /// Replay staged changes into worktrees.
    pub staged: bool,
}

impl MatrixOptions {
    /// Updates apply to the base phase only when no extra version is
    /// tested.
    pub fn update_base(&self) -> bool {
        self.update && self.versions.is_empty()
    }

    /// Updates apply to the extra phase only when exactly one extra
    /// version is tested.
    pub fn update_extra(&self) -> bool {
        self.update && self.versions.len() == 1
    }
}

struct Job<'m> {
    module: &'m Module,
    version: String,
}

pub struct Orchestrator<'a> {
    target: &'a TargetConfig,
    resolver: &'a Resolver,
    dispatcher: &'a Dispatcher,
    pool: rayon::ThreadPool,
    /// Serializes `git worktree add` against shared repositories.
    worktree_gate: Mutex<()>,
    /// One gate per manifest directory, held by runs with update enabled.
    update_gates: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(target: &'a TargetConfig, resolver: &'a Resolver, dispatcher: &'a Dispatcher) -> Result<Self> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to start worker pool: {e}"),
            })?;
        Ok(Self {
            target,
            resolver,
            dispatcher,
            pool,
            worktree_gate: Mutex::new(()),
            update_gates: Mutex::new(HashMap::new()),
        })
    }

    fn update_gate(&self, manifest_dir: &Path) -> Arc<Mutex<()>> {
        let mut gates = self.update_gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(manifest_dir.to_path_buf()).or_default())
    }

    /// Runs both phases and returns results in dispatch order.
    pub fn run(&self, modules: &[Module], opts: &MatrixOptions) -> Vec<TestResult> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        if !opts.skip_base {
            let jobs = jobs(
                modules
                    .iter()
                    .flat_map(|m| m.manifest.versions.iter().map(move |v| (m, v.as_str()))),
                &mut seen,
            );
            results.extend(self.run_phase(&jobs, opts.update_base(), opts));
        }

        if opts.versions.is_empty() {
            return results;
        }
        if results.iter().any(|r| !r.passed()) {
            warn!("base versions failed; skipping {}", opts.versions.join(", "));
            return results;
        }
        let jobs = jobs(
            modules
                .iter()
                .flat_map(|m| opts.versions.iter().map(move |v| (m, v.as_str()))),
            &mut seen,
        );
        results.extend(self.run_phase(&jobs, opts.update_extra(), opts));
        results
    }

    fn run_phase(&self, jobs: &[Job<'_>], update: bool, opts: &MatrixOptions) -> Vec<TestResult> {
        self.pool.install(|| {
            jobs.par_iter()
                .map(|job| self.run_job(job, update, opts))
                .collect()
        })
    }

    fn run_job(&self, job: &Job<'_>, update: bool, opts: &MatrixOptions) -> TestResult {
        let mut resolved = job.version.clone();
        let (outcome, log, duration) = match self.execute(job, update, opts, &mut resolved) {
            Ok((SuiteOutcome { passed: true, log }, took)) => (Outcome::Passed, log, took),
            Ok((SuiteOutcome { passed: false, log }, took)) => (Outcome::Failed, log, took),
            Err(e) => (Outcome::Errored(e.to_string()), String::new(), Duration::ZERO),
        };
        TestResult {
            module: job.module.display.clone(),
            requested: job.version.clone(),
            resolved,
            outcome,
            log,
            duration,
        }
    }

    fn execute(
        &self,
        job: &Job<'_>,
        update: bool,
        opts: &MatrixOptions,
        resolved: &mut String,
    ) -> Result<(SuiteOutcome, Duration)> {
        let module = job.module;
        let scratch = tempfile::Builder::new().prefix("unity-run-").tempdir()?;
        let target = ResolutionTarget::new(
            scratch.path().join(".bin"),
            scratch.path(),
            &self.target.binary_name,
        );
        *resolved = self.resolver.resolve(&job.version, &module.root, &target)?;
        info!("testing {} against version {}", module.display, resolved);

        let workdir = scratch.path().join("work");
        fs::create_dir_all(&workdir)?;
        let pattern = module.manifest.run_pattern(opts.run.as_deref())?;
        let mut worktrees = Vec::new();
        for path in script::select(&module.scripts, pattern.as_ref()) {
            let dest = script_workdir(&workdir, &script::script_name(path)).join(REPO_DIR);
            let tree = {
                let _gate = self.worktree_gate.lock().unwrap_or_else(PoisonError::into_inner);
                Worktree::create(&module.scm_root, &dest)?
            };
            if module.has_staged && opts.staged {
                tree.replay_staged()?;
            }
            worktrees.push(tree);
        }

        let binary = target.binary_path();
        let tester_rel = module.tester_rel_display();
        let request = DispatchRequest {
            manifest_dir: &module.manifest_dir,
            workdir_root: &workdir,
            rel_path: &module.rel_path,
            tester_rel: &tester_rel,
            binary: &binary,
            version: resolved,
            update,
            verbose: opts.verbose,
            run: opts.run.as_deref(),
        };
        let gate = update.then(|| self.update_gate(&module.manifest_dir));
        let _updating = gate
            .as_ref()
            .map(|g| g.lock().unwrap_or_else(PoisonError::into_inner));
        let start = Instant::now();
        let outcome = self.dispatcher.dispatch(&module.manifest, &request)?;
        let took = start.elapsed();
        drop(worktrees);
        Ok((outcome, took))
    }
}

/// Pairs not already in `seen`, in order.
fn jobs<'m, 'v>(
    pairs: impl Iterator<Item = (&'m Module, &'v str)>,
    seen: &mut HashSet<(PathBuf, String)>,
) -> Vec<Job<'m>> {
    pairs
        .filter(|(m, v)| seen.insert((m.root.clone(), v.to_string())))
        .map(|(module, version)| Job {
            module,
            version: version.to_string(),
        })
        .collect()
}
