//! Sandbox command implementation
//!
//! Entry point inside the container. Runs one module's scripts against one
//! binary, prints the log on stdout and exits 1 when a script failed.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use unity::error::Error;
use unity::manifest::Manifest;
use unity::phases::dispatch::{self, DispatchRequest};

/// Arguments for the sandbox command
#[derive(Args, Debug)]
pub struct SandboxArgs {
    /// Manifest directory holding the scripts
    #[arg(long, value_name = "DIR")]
    pub manifest: PathBuf,

    /// Directory holding one work directory per script
    #[arg(long, value_name = "DIR")]
    pub workdir_root: PathBuf,

    /// Module path inside each working copy
    #[arg(long, value_name = "PATH")]
    pub rel_path: PathBuf,

    /// Module path shown in logs
    #[arg(long, value_name = "PATH")]
    pub tester_rel_path: String,

    /// Binary under test
    #[arg(long, value_name = "PATH")]
    pub binary: PathBuf,

    /// Version the binary was resolved to
    #[arg(long)]
    pub version: String,

    /// Rewrite recorded output that no longer matches
    #[arg(long)]
    pub update: bool,

    /// Log passing scripts too
    #[arg(long)]
    pub verbose: bool,

    /// Only run scripts matching this regexp or manifest filter name
    #[arg(long, value_name = "REGEXP")]
    pub run: Option<String>,
}

/// Execute the sandbox command
pub fn execute(args: SandboxArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let outcome = dispatch::run_in_process(
        &manifest,
        &DispatchRequest {
            manifest_dir: &args.manifest,
            workdir_root: &args.workdir_root,
            rel_path: &args.rel_path,
            tester_rel: &args.tester_rel_path,
            binary: &args.binary,
            version: &args.version,
            update: args.update,
            verbose: args.verbose,
            run: args.run.as_deref(),
        },
    )?;
    print!("{}", outcome.log);
    if !outcome.passed {
        return Err(Error::TestsFailed.into());
    }
    Ok(())
}
