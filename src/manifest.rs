//! # Module Manifest
//!
//! Each module records which versions its scripts are known to pass against
//! in `<marker>/tests/manifest.yaml`:
//!
//! ```yaml
//! versions:
//!   - v0.4.3
//!   - go.mod
//! toolchain: ">=1.21"      # optional Go toolchain requirement
//! filters:                 # optional named script filters for --run
//!   eval: "^eval_"
//! ```
//!
//! The schema is closed: unknown keys are rejected so typos surface as
//! errors instead of silently testing nothing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};

/// File name of the manifest inside the manifest directory.
pub const MANIFEST_FILE: &str = "manifest.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Base versions, tested in this order.
    pub versions: Vec<String>,

    /// Go toolchain version requirement for source builds.
    #[serde(default)]
    pub toolchain: Option<String>,

    /// Named regular expressions usable as `--run` values.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Manifest {
    /// Reads and validates `<dir>/manifest.yaml`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path).map_err(|e| Error::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Self::parse(&text, &path)
    }

    /// Decodes and validates manifest text. `path` is used in errors.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(text).map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: String| Error::Manifest {
            path: PathBuf::from(path),
            message,
        };
        if let Some(i) = self.versions.iter().position(|v| v.trim().is_empty()) {
            return Err(invalid(format!("versions[{i}] is empty")));
        }
        if let Some(req) = &self.toolchain {
            semver::VersionReq::parse(req)
                .map_err(|e| invalid(format!("toolchain {req:?}: {e}")))?;
        }
        for (name, pattern) in &self.filters {
            Regex::new(pattern).map_err(|e| invalid(format!("filter {name:?}: {e}")))?;
        }
        Ok(())
    }

    /// Script name pattern for a `--run` value: a named filter when one
    /// matches, otherwise the value itself as a regular expression.
    pub fn run_pattern(&self, run: Option<&str>) -> Result<Option<Regex>> {
        let Some(run) = run else {
            return Ok(None);
        };
        let pattern = self.filters.get(run).map(String::as_str).unwrap_or(run);
        Ok(Some(Regex::new(pattern)?))
    }
}
