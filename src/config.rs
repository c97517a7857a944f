//! # Target Configuration
//!
//! `unity` tests exactly one tool binary. Everything that depends on which
//! tool that is (its name, where its source lives, how releases are named,
//! how it is built) is collected in [`TargetConfig`] and passed explicitly
//! into the resolution engine and the discoverer.
//!
//! ## Environment overrides
//!
//! | Variable | Field |
//! |---|---|
//! | `UNITY_GIT_SOURCE` | `git_source` |
//! | `UNITY_REVIEW_URL` | `review_url` |
//! | `UNITY_SEMVER_URL_TEMPLATE` | `semver_url_template` |
//! | `UNITY_BUILD_COMMAND` | `build_command` (split on whitespace) |
//!
//! The semver URL template must render to a `file`, `http` or `https` URL.

use std::path::PathBuf;

use url::Url;

use crate::error::{Error, Result};

/// Placeholder replaced by the version identifier in the URL template.
pub const VERSION_PLACEHOLDER: &str = "{version}";
/// Placeholder replaced by the artifact file name in the URL template.
pub const ARTIFACT_PLACEHOLDER: &str = "{artifact}";
/// Placeholder replaced by the output binary path in the build command.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const DEFAULT_GIT_SOURCE: &str = "https://review.gerrithub.io/cue-lang/cue";
const DEFAULT_REVIEW_URL: &str = "https://review.gerrithub.io";
const DEFAULT_URL_TEMPLATE: &str =
    "https://github.com/cue-lang/cue/releases/download/{version}/{artifact}";

/// Profile of the binary under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// File name of the executable.
    pub binary_name: String,
    /// Module path of the binary's source in Go dependency metadata.
    pub source_module: String,
    /// Repository the shared clone is made from.
    pub git_source: String,
    /// Base URL of the code review REST API.
    pub review_url: String,
    /// Download URL template for released archives.
    pub semver_url_template: String,
    /// Build command argv; `{output}` is replaced by the destination path.
    pub build_command: Vec<String>,
    /// Name of the directory that marks a module root.
    pub module_marker: String,
    /// Manifest directory inside the module marker.
    pub tests_dir: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            binary_name: "cue".to_string(),
            source_module: "cuelang.org/go".to_string(),
            git_source: DEFAULT_GIT_SOURCE.to_string(),
            review_url: DEFAULT_REVIEW_URL.to_string(),
            semver_url_template: DEFAULT_URL_TEMPLATE.to_string(),
            build_command: ["go", "build", "-o", OUTPUT_PLACEHOLDER, "cuelang.org/go/cmd/cue"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            module_marker: "cue.mod".to_string(),
            tests_dir: "tests".to_string(),
        }
    }
}

impl TargetConfig {
    /// Defaults overlaid with the `UNITY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values returned by `lookup`.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(v) = get("UNITY_GIT_SOURCE") {
            config.git_source = v;
        }
        if let Some(v) = get("UNITY_REVIEW_URL") {
            config.review_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("UNITY_SEMVER_URL_TEMPLATE") {
            config.semver_url_template = v;
        }
        if let Some(v) = get("UNITY_BUILD_COMMAND") {
            config.build_command = v.split_whitespace().map(str::to_string).collect();
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the resolution engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.build_command.is_empty() {
            return Err(Error::Config {
                message: "build command is empty".to_string(),
            });
        }
        if !self.build_command.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            return Err(Error::Config {
                message: format!(
                    "build command {:?} has no {} placeholder",
                    self.build_command.join(" "),
                    OUTPUT_PLACEHOLDER
                ),
            });
        }
        let sample = self.artifact_url("v0.0.0", "sample.tar.gz")?;
        match sample.scheme() {
            "file" | "http" | "https" => Ok(()),
            other => Err(Error::Config {
                message: format!(
                    "semver URL template {:?} has unsupported scheme {:?}",
                    self.semver_url_template, other
                ),
            }),
        }
    }

    /// Renders the download URL of `artifact` for `version`.
    pub fn artifact_url(&self, version: &str, artifact: &str) -> Result<Url> {
        let rendered = self
            .semver_url_template
            .replace(VERSION_PLACEHOLDER, version)
            .replace(ARTIFACT_PLACEHOLDER, artifact);
        Ok(Url::parse(&rendered)?)
    }

    /// Path of the module manifest directory relative to a module root.
    pub fn manifest_subdir(&self) -> PathBuf {
        PathBuf::from(&self.module_marker).join(&self.tests_dir)
    }
}

/// Options shared by every resolution in one invocation.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Whether the `PATH` version may be resolved from the environment.
    pub allow_path: bool,
    /// Root of the binary cache and the shared clone.
    pub cache_root: PathBuf,
}
