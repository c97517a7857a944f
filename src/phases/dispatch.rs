//! Execution dispatcher.
//!
//! Scripts run either directly in this process (`--unsafe`) or inside a
//! container that re-invokes this binary through the hidden `sandbox`
//! subcommand with the same parameters. Both paths produce the same log
//! format.
//!
//! In the container, the host paths are mounted at fixed locations:
//!
//! | Host | Container |
//! |---|---|
//! | manifest directory | `/unity/manifest` |
//! | workdir root | `/unity/workdir` |
//! | resolved binary | `/unity/bin/<binary name>` |
//! | this binary | `/unity/unity` |

use std::path::{Path, PathBuf};

use log::debug;

use crate::container::{owner_of, ContainerRuntime, Mount, RunSpec};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::script::runner::{self, RunParams, SuiteOutcome};

const MANIFEST_MOUNT: &str = "/unity/manifest";
const WORKDIR_MOUNT: &str = "/unity/workdir";
const BIN_MOUNT: &str = "/unity/bin";
const SELF_MOUNT: &str = "/unity/unity";

/// Inputs of one module run.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub manifest_dir: &'a Path,
    pub workdir_root: &'a Path,
    pub rel_path: &'a Path,
    pub tester_rel: &'a str,
    pub binary: &'a Path,
    pub version: &'a str,
    pub update: bool,
    pub verbose: bool,
    pub run: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub enum Dispatcher {
    InProcess,
    Sandboxed {
        runtime: ContainerRuntime,
        image: String,
        /// Build of this program for the container's platform.
        self_binary: PathBuf,
    },
}

/// Runs the scripts of `manifest` in this process.
pub fn run_in_process(manifest: &Manifest, req: &DispatchRequest<'_>) -> Result<SuiteOutcome> {
    let pattern = manifest.run_pattern(req.run)?;
    runner::run_suite(&RunParams {
        manifest_dir: req.manifest_dir,
        workdir_root: req.workdir_root,
        rel_path: req.rel_path,
        tester_rel: req.tester_rel,
        binary: req.binary,
        version: req.version,
        update: req.update,
        verbose: req.verbose,
        pattern: pattern.as_ref(),
    })
}

impl Dispatcher {
    pub fn dispatch(&self, manifest: &Manifest, req: &DispatchRequest<'_>) -> Result<SuiteOutcome> {
        match self {
            Dispatcher::InProcess => run_in_process(manifest, req),
            Dispatcher::Sandboxed {
                runtime,
                image,
                self_binary,
            } => {
                let spec = sandbox_spec(image, self_binary, req)?;
                let output = runtime.run(&spec)?;
                let log = String::from_utf8_lossy(&output.stdout).into_owned();
                match output.status.code() {
                    Some(0) => Ok(SuiteOutcome { passed: true, log }),
                    Some(1) => Ok(SuiteOutcome { passed: false, log }),
                    _ => Err(Error::Command {
                        command: format!("docker {}", ContainerRuntime::run_args(&spec).join(" ")),
                        dir: req.workdir_root.to_path_buf(),
                        output: format!("{}{}", String::from_utf8_lossy(&output.stderr), log),
                    }),
                }
            }
        }
    }
}

/// Container invocation running the `sandbox` subcommand for `req`.
pub fn sandbox_spec(image: &str, self_binary: &Path, req: &DispatchRequest<'_>) -> Result<RunSpec> {
    let binary_name = req
        .binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Config {
            message: format!("{} has no file name", req.binary.display()),
        })?;
    let binary_mount = format!("{BIN_MOUNT}/{binary_name}");
    let (uid, gid) = owner_of(req.workdir_root)?;
    let rel = if req.rel_path.as_os_str().is_empty() {
        ".".to_string()
    } else {
        req.rel_path.to_string_lossy().into_owned()
    };

    let mut args: Vec<String> = [
        SELF_MOUNT,
        "sandbox",
        "--manifest",
        MANIFEST_MOUNT,
        "--workdir-root",
        WORKDIR_MOUNT,
        "--rel-path",
        rel.as_str(),
        "--tester-rel-path",
        req.tester_rel,
        "--binary",
        binary_mount.as_str(),
        "--version",
        req.version,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if req.update {
        args.push("--update".to_string());
    }
    if req.verbose {
        args.push("--verbose".to_string());
    }
    if let Some(run) = req.run {
        args.push("--run".to_string());
        args.push(run.to_string());
    }

    let spec = RunSpec {
        image: image.to_string(),
        mounts: vec![
            Mount::new(req.manifest_dir, MANIFEST_MOUNT, !req.update),
            Mount::new(req.workdir_root, WORKDIR_MOUNT, false),
            Mount::new(req.binary, binary_mount.clone(), true),
            Mount::new(self_binary, SELF_MOUNT, true),
        ],
        env: vec![
            ("USER_UID".to_string(), uid.to_string()),
            ("USER_GID".to_string(), gid.to_string()),
        ],
        args,
    };
    debug!("sandbox: {}", ContainerRuntime::run_args(&spec).join(" "));
    Ok(spec)
}
