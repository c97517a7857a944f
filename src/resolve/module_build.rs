//! Building the binary from a local Go module.
//!
//! Shared by the absolute-path and `go.mod` strategies. The module root is
//! the nearest directory at or above the context directory holding a
//! `go.mod`. The canonical version is:
//!
//! - the `HEAD` commit of the context, when the module is the binary's own
//!   source module;
//! - otherwise the version of the source module in the `require`
//!   directives.
//!
//! The binary is built into `<root>/.unity-bin/` at most once per root per
//! process. Later callers for the same root share that build's outcome,
//! including its failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{copy_executable, ResolutionTarget};
use crate::build::BuildHelper;
use crate::config::TargetConfig;
use crate::dedup::DedupGuard;
use crate::error::{Error, Result};
use crate::git;

/// Directory below a module root receiving local builds.
pub const MODULE_BIN_DIR: &str = ".unity-bin";

/// The parts of a `go.mod` file the builder needs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GoMod {
    pub module: String,
    pub requires: Vec<(String, String)>,
}

impl GoMod {
    pub fn parse(text: &str) -> Self {
        let mut gomod = GoMod::default();
        let mut in_require = false;
        for raw in text.lines() {
            let line = raw.split("//").next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if in_require {
                if line == ")" {
                    in_require = false;
                } else {
                    gomod.push_require(line);
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("module") {
                if rest.starts_with(char::is_whitespace) {
                    gomod.module = unquote(rest.trim()).to_string();
                }
            } else if let Some(rest) = line.strip_prefix("require") {
                let rest = rest.trim();
                if rest == "(" {
                    in_require = true;
                } else {
                    gomod.push_require(rest);
                }
            }
        }
        gomod
    }

    fn push_require(&mut self, spec: &str) {
        let mut parts = spec.split_whitespace();
        if let (Some(path), Some(version)) = (parts.next(), parts.next()) {
            self.requires
                .push((unquote(path).to_string(), version.to_string()));
        }
    }

    /// Required version of `module`, if any.
    pub fn require(&self, module: &str) -> Option<&str> {
        self.requires
            .iter()
            .find(|(path, _)| path == module)
            .map(|(_, v)| v.as_str())
    }
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '`')
}

/// Nearest ancestor of `dir` (inclusive) containing a `go.mod`.
pub fn find_module_root(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .find(|d| d.join("go.mod").is_file())
        .map(Path::to_path_buf)
}

pub struct ModuleBuilder {
    target: Arc<TargetConfig>,
    build: Arc<BuildHelper>,
    builds: DedupGuard<PathBuf, PathBuf>,
}

impl ModuleBuilder {
    pub fn new(target: Arc<TargetConfig>, build: Arc<BuildHelper>) -> Self {
        Self {
            target,
            build,
            builds: DedupGuard::new(),
        }
    }

    /// Builds from the module enclosing `context` and copies the result to
    /// `dest`. `version` is the identifier being resolved, used in errors.
    pub fn resolve(&self, version: &str, context: &Path, dest: &ResolutionTarget) -> Result<String> {
        let fail = |message: String| Error::Resolution {
            version: version.to_string(),
            message,
        };
        let root = find_module_root(context).ok_or_else(|| {
            fail(format!("no go.mod found at or above {}", context.display()))
        })?;
        let gomod = GoMod::parse(&fs::read_to_string(root.join("go.mod"))?);

        let canonical = if gomod.module == self.target.source_module {
            git::rev_parse_head(context)?
        } else {
            gomod
                .require(&self.target.source_module)
                .ok_or_else(|| {
                    fail(format!(
                        "{} does not require {}",
                        root.join("go.mod").display(),
                        self.target.source_module
                    ))
                })?
                .to_string()
        };

        let output = root.join(MODULE_BIN_DIR).join(&self.target.binary_name);
        let built = self.builds.run(root.clone(), || {
            self.build.build(context, &output)?;
            Ok(output.clone())
        })?;
        copy_executable(&built, &dest.binary_path())?;
        Ok(canonical)
    }
}
