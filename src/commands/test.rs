//! Test command implementation
//!
//! Discovers modules, runs the base and extra phases and prints the report.
//! Unless `--unsafe` is given, scripts run inside a container, which needs
//! a build of `unity` for the container's platform (`--self`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::builder::BoolishValueParser;
use clap::Args;
use log::debug;

use unity::build::{BuildHelper, Platform};
use unity::config::{ResolverConfig, TargetConfig};
use unity::container::ContainerRuntime;
use unity::defaults::{self, DEFAULT_IMAGE};
use unity::output::OutputConfig;
use unity::phases::discovery::{self, DiscoveryOptions};
use unity::phases::dispatch::Dispatcher;
use unity::phases::orchestrator::{MatrixOptions, Orchestrator};
use unity::phases::report::Report;
use unity::resolve::Resolver;

/// Arguments for the test command
#[derive(Args, Debug)]
pub struct TestArgs {
    /// Extra versions to test every module against
    #[arg(value_name = "VERSION")]
    pub versions: Vec<String>,

    /// Directory inside the repository to test
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Test every checked-out submodule instead of the repository itself
    #[arg(long)]
    pub corpus: bool,

    /// Rewrite recorded output that no longer matches
    #[arg(long)]
    pub update: bool,

    /// Only run scripts matching this regexp or manifest filter name
    #[arg(long, value_name = "REGEXP")]
    pub run: Option<String>,

    /// Print the logs of passing runs too
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not resolve the PATH version from the environment
    #[arg(long)]
    pub nopath: bool,

    /// Directory of manifest directories replacing the modules' own
    #[arg(long, value_name = "DIR")]
    pub overlay: Option<PathBuf>,

    /// Run scripts directly on the host instead of in a container
    #[arg(long = "unsafe", env = "UNITY_UNSAFE", value_parser = BoolishValueParser::new())]
    pub run_unsafe: bool,

    /// Test staged changes by replaying them into each worktree
    #[arg(long)]
    pub staged: bool,

    /// Do not fail on untracked files or staged changes
    #[arg(long)]
    pub ignore_dirty: bool,

    /// unity binary for the container's platform
    #[arg(long = "self", value_name = "PATH", env = "UNITY_SELF")]
    pub self_binary: Option<PathBuf>,

    /// Skip the manifest versions and only test the given versions
    #[arg(long)]
    pub skip_base: bool,

    /// Container image scripts run in
    #[arg(long, value_name = "IMAGE", env = "UNITY_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Cache root directory
    #[arg(long, value_name = "PATH", env = "UNITY_CACHE")]
    pub cache_root: Option<PathBuf>,
}

/// The unity binary mounted into the container.
fn self_binary(flag: Option<PathBuf>, container: &Platform) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }
    let host = Platform::host();
    if *container == host {
        return Ok(std::env::current_exe()?);
    }
    bail!(
        "container platform {} differs from host platform {}; pass a unity binary built for {} with --self",
        container,
        host,
        container
    )
}

/// Execute the test command
pub fn execute(args: TestArgs, output: &OutputConfig) -> Result<()> {
    if args.update && args.versions.len() > 1 {
        bail!("--update can only be used with at most one version");
    }
    if args.skip_base && args.versions.is_empty() {
        bail!("--skip-base requires at least one version");
    }

    let target = Arc::new(TargetConfig::from_env()?);
    let mut build = BuildHelper::new(&target);
    let dispatcher = if args.run_unsafe {
        Dispatcher::InProcess
    } else {
        let runtime = ContainerRuntime::default();
        build.target_container(&runtime, &args.image)?;
        let self_binary = self_binary(args.self_binary.clone(), build.platform())?;
        debug!("sandboxing with {} in {}", self_binary.display(), args.image);
        Dispatcher::Sandboxed {
            runtime,
            image: args.image.clone(),
            self_binary,
        }
    };

    let resolver_config = ResolverConfig {
        allow_path: !args.nopath,
        cache_root: args
            .cache_root
            .clone()
            .unwrap_or_else(defaults::default_cache_root),
    };
    let resolver = Resolver::new(Arc::clone(&target), &resolver_config, Arc::new(build))?;

    let modules = discovery::discover(
        &target,
        &DiscoveryOptions {
            dir: args.dir.clone(),
            corpus: args.corpus,
            overlay: args.overlay.clone(),
            staged: args.staged,
            ignore_dirty: args.ignore_dirty,
        },
    )?;

    let orchestrator = Orchestrator::new(&target, &resolver, &dispatcher)?;
    let results = orchestrator.run(
        &modules,
        &MatrixOptions {
            versions: args.versions,
            skip_base: args.skip_base,
            update: args.update,
            verbose: args.verbose,
            run: args.run,
            staged: args.staged,
        },
    );

    let report = Report::new(results);
    print!("{}", report.render(output, args.verbose));
    report.verdict()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_binary_prefers_flag() {
        let path = self_binary(Some(PathBuf::from("/x/unity")), &Platform::new("plan9", "mips")).unwrap();
        assert_eq!(path, PathBuf::from("/x/unity"));
    }

    #[test]
    fn test_self_binary_on_host_platform() {
        assert_eq!(
            self_binary(None, &Platform::host()).unwrap(),
            std::env::current_exe().unwrap()
        );
    }

    #[test]
    fn test_self_binary_foreign_platform_needs_flag() {
        let err = self_binary(None, &Platform::new("plan9", "mips")).unwrap_err();
        assert!(err.to_string().contains("--self"));
    }
}
