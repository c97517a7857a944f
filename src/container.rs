//! Container runtime collaborator.
//!
//! Only three operations are needed: inspecting an image's platform,
//! pulling an image, and running a container with bind mounts. The runtime
//! is invoked as a subprocess (`docker` by default).

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info};

use crate::build::Platform;
use crate::error::{Error, Result};
use crate::process;

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>, read_only: bool) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only,
        }
    }

    fn flag(&self) -> String {
        let mut spec = format!(
            "type=bind,source={},target={}",
            self.host.display(),
            self.container
        );
        if self.read_only {
            spec.push_str(",readonly");
        }
        spec
    }
}

/// Everything needed to start one container.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    pub args: Vec<String>,
}

/// Owner of `path` as the `(uid, gid)` pair passed to the container.
#[cfg(unix)]
pub fn owner_of(path: &Path) -> Result<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path)?;
    Ok((meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
pub fn owner_of(_path: &Path) -> Result<(u32, u32)> {
    Ok((0, 0))
}

/// Handle on the container runtime binary.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    program: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ContainerRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }

    /// Platform declared by `image`. Pulls the image when it is not present
    /// locally.
    pub fn inspect_platform(&self, image: &str) -> Result<Platform> {
        let inspect = || {
            process::run_stdout(self.command().args([
                "inspect",
                "-f",
                "{{.Os}} {{.Architecture}}",
                image,
            ]))
        };
        let reported = match inspect() {
            Ok(out) => out,
            Err(e) => {
                debug!("inspect {} failed ({}), pulling", image, e);
                self.pull(image)?;
                inspect()?
            }
        };
        Platform::parse(&reported)
    }

    pub fn pull(&self, image: &str) -> Result<()> {
        info!("pulling {}", image);
        process::run(self.command().args(["pull", "-q", image])).map(|_| ())
    }

    /// Arguments of `docker run` for `spec`.
    pub fn run_args(spec: &RunSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        for (k, v) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }
        for m in &spec.mounts {
            args.push("--mount".to_string());
            args.push(m.flag());
        }
        args.push(spec.image.clone());
        args.extend(spec.args.iter().cloned());
        args
    }

    /// Runs a container and returns its output whatever the exit status.
    pub fn run(&self, spec: &RunSpec) -> Result<Output> {
        if spec.env.iter().all(|(k, _)| k != "USER_UID")
            || spec.env.iter().all(|(k, _)| k != "USER_GID")
        {
            return Err(Error::Container {
                message: "USER_UID and USER_GID must be set".to_string(),
            });
        }
        let mut cmd = self.command();
        cmd.args(Self::run_args(spec));
        debug!("{}", process::describe(&cmd));
        cmd.output().map_err(|e| Error::Container {
            message: format!("{}: {}", self.program, e),
        })
    }
}
