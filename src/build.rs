//! # Build Helper
//!
//! Compiles the binary under test from a source tree for the configured
//! target platform, and derives the cache keys binaries are stored under.
//!
//! The target platform defaults to the host. When scripts run inside a
//! container the platform is taken from the image instead (see
//! [`BuildHelper::target_container`]) so that downloaded and built binaries
//! run there. Builds always get `GOOS`, `GOARCH` and `CGO_ENABLED=0` in
//! their environment.

use std::fmt;
use std::fs;
use std::path::Path;
use std::process::Command;

use log::info;

use crate::cache::CacheKey;
use crate::config::{TargetConfig, OUTPUT_PLACEHOLDER};
use crate::container::ContainerRuntime;
use crate::error::{Error, Result};
use crate::process;

const VERSION_DOMAIN: &str = "unity released version";
const BUILD_DOMAIN: &str = "unity source build";

/// Operating system and architecture in Go's naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub goos: String,
    pub goarch: String,
}

impl Platform {
    pub fn new(goos: impl Into<String>, goarch: impl Into<String>) -> Self {
        Self {
            goos: goos.into(),
            goarch: goarch.into(),
        }
    }

    /// The platform this process runs on.
    pub fn host() -> Self {
        let goos = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let goarch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64",
            "s390x" => "s390x",
            other => other,
        };
        Self::new(goos, goarch)
    }

    /// Parses `"<os> <arch>"` as reported by a container runtime.
    ///
    /// The input must be one line of exactly two whitespace separated tokens.
    pub fn parse(reported: &str) -> Result<Self> {
        let reported = reported.trim();
        let invalid = || Error::Container {
            message: format!("unexpected platform {:?}, want \"<os> <arch>\"", reported),
        };
        if reported.lines().count() != 1 {
            return Err(invalid());
        }
        let tokens: Vec<&str> = reported.split_whitespace().collect();
        match tokens.as_slice() {
            [os, arch] => Ok(Self::new(*os, *arch)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.goos, self.goarch)
    }
}

/// Builds binaries and names cache entries for one target platform.
#[derive(Debug, Clone)]
pub struct BuildHelper {
    platform: Platform,
    build_command: Vec<String>,
}

impl BuildHelper {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            platform: Platform::host(),
            build_command: target.build_command.clone(),
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn set_platform(&mut self, platform: Platform) {
        self.platform = platform;
    }

    /// Targets the platform declared by `image`, pulling it if needed.
    pub fn target_container(&mut self, runtime: &ContainerRuntime, image: &str) -> Result<()> {
        self.platform = runtime.inspect_platform(image)?;
        Ok(())
    }

    /// Cache key for a released version.
    pub fn version_key(&self, version: &str) -> CacheKey {
        CacheKey::derive(
            VERSION_DOMAIN,
            &self.platform.goos,
            &self.platform.goarch,
            version,
        )
    }

    /// Cache key for a binary built from source identified by `build_id`.
    pub fn build_key(&self, build_id: &str) -> CacheKey {
        CacheKey::derive(
            BUILD_DOMAIN,
            &self.platform.goos,
            &self.platform.goarch,
            build_id,
        )
    }

    /// Environment every build runs with.
    pub fn build_env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("GOOS", self.platform.goos.clone()),
            ("GOARCH", self.platform.goarch.clone()),
            ("CGO_ENABLED", "0".to_string()),
        ]
    }

    /// Builds from the source tree at `dir`, writing the binary to `output`.
    pub fn build(&self, dir: &Path, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let output_str = output.to_string_lossy();
        let argv: Vec<String> = self
            .build_command
            .iter()
            .map(|a| a.replace(OUTPUT_PLACEHOLDER, &output_str))
            .collect();
        let (program, args) = argv.split_first().ok_or_else(|| Error::Config {
            message: "build command is empty".to_string(),
        })?;

        info!("building {} in {} for {}", output.display(), dir.display(), self.platform);
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(dir).envs(self.build_env());
        process::run(&mut cmd)?;

        if !output.is_file() {
            return Err(Error::Command {
                command: process::describe(&cmd),
                dir: dir.to_path_buf(),
                output: format!("build did not produce {}", output.display()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(command: &[&str]) -> BuildHelper {
        let target = TargetConfig {
            build_command: command.iter().map(|s| s.to_string()).collect(),
            ..TargetConfig::default()
        };
        BuildHelper::new(&target)
    }

    #[test]
    fn test_parse_platform() {
        assert_eq!(
            Platform::parse("linux amd64\n").unwrap(),
            Platform::new("linux", "amd64")
        );
        assert!(Platform::parse("linux").is_err());
        assert!(Platform::parse("linux amd64 v8").is_err());
        assert!(Platform::parse("linux amd64\nlinux arm64").is_err());
        assert!(Platform::parse("").is_err());
    }

    #[test]
    fn test_host_platform_uses_go_names() {
        let host = Platform::host();
        assert_ne!(host.goos, "macos");
        assert_ne!(host.goarch, "x86_64");
        assert_ne!(host.goarch, "aarch64");
    }

    #[test]
    fn test_keys_depend_on_platform_and_domain() {
        let mut h = helper(&["true", "{output}"]);
        h.set_platform(Platform::new("linux", "amd64"));
        let v = h.version_key("v0.1.0");
        assert_eq!(v, h.version_key("v0.1.0"));
        assert_ne!(v, h.build_key("v0.1.0"));

        let mut other = h.clone();
        other.set_platform(Platform::new("linux", "arm64"));
        assert_ne!(v, other.version_key("v0.1.0"));
    }

    #[test]
    fn test_build_env() {
        let mut h = helper(&["true", "{output}"]);
        h.set_platform(Platform::new("darwin", "arm64"));
        let env = h.build_env();
        assert!(env.contains(&("GOOS", "darwin".to_string())));
        assert!(env.contains(&("GOARCH", "arm64".to_string())));
        assert!(env.contains(&("CGO_ENABLED", "0".to_string())));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_substitutes_output_and_sets_env() {
        let dir = tempfile::tempdir().unwrap();
        let h = helper(&["sh", "-c", "echo \"$GOOS $CGO_ENABLED\" > \"$1\"", "sh", "{output}"]);
        let out = dir.path().join("bin").join("cue");
        h.build(dir.path(), &out).unwrap();
        let content = fs::read_to_string(&out).unwrap();
        assert_eq!(content.trim(), format!("{} 0", h.platform().goos));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_failure_reports_command() {
        let dir = tempfile::tempdir().unwrap();
        let h = helper(&["sh", "-c", "echo compile error >&2; exit 1", "sh", "{output}"]);
        let err = h.build(dir.path(), &dir.path().join("cue")).unwrap_err();
        match err {
            Error::Command { output, .. } => assert!(output.contains("compile error")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_build_without_output_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let h = helper(&["sh", "-c", "true", "sh", "{output}"]);
        assert!(h.build(dir.path(), &dir.path().join("cue")).is_err());
    }
}
