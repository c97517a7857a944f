//! # Error Handling
//!
//! This module defines the centralized error type for `unity`. It uses the
//! `thiserror` library to build one `Error` enum covering every failure the
//! resolution engine and the test matrix can produce.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum. Variants carry the context needed to diagnose
//!   the failure (the command that ran, the URL that was fetched, the version
//!   identifier that could not be resolved).
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`, used
//!   throughout the library.
//!
//! ## Error classes
//!
//! - Policy violations, such as `PathNotAllowed`.
//! - Ambiguous or impossible resolutions: `VersionNoMatch`,
//!   `VersionAmbiguous` and `ArtifactCount`. These are always surfaced, never
//!   resolved by picking one candidate.
//! - Transient external failures: `Command`, `Network` and `Container`. The
//!   command line and its output are preserved. Nothing is retried.
//! - Precondition violations: `DirtyWorkingTree`, `Manifest`, `ReservedPath`,
//!   `EscapingPath`, `Discovery` and `NoModules`.
//! - `TestsFailed`, the sentinel returned once failing runs have already been
//!   reported. Callers must not print it again.
//!
//! Outcomes broadcast by a [`DedupGuard`](crate::dedup::DedupGuard) are shared
//! between many callers, so they travel as [`Error::Shared`].

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Main error type for unity operations
#[derive(Error, Debug)]
pub enum Error {
    /// The `PATH` version was requested while ambient lookups are disabled.
    #[error("PATH version requested but resolution from PATH is not allowed (--nopath)")]
    PathNotAllowed,

    /// No resolution strategy recognised the version identifier.
    #[error("no resolver matched version {version:?}")]
    VersionNoMatch { version: String },

    /// More than one resolution strategy claimed the version identifier.
    #[error("version {version:?} is ambiguous: matched by {}{}", strategies.join(", "), errors.iter().map(|e| format!("\n  {}", e)).collect::<String>())]
    VersionAmbiguous {
        version: String,
        strategies: Vec<&'static str>,
        errors: Vec<String>,
    },

    /// A strategy matched but could not produce a binary.
    #[error("failed to resolve {version}: {message}")]
    Resolution { version: String, message: String },

    /// Artifact downloads for a semantic version did not produce exactly one
    /// candidate archive.
    #[error("expected exactly one artifact for {version}, found {found}{}", failures.iter().map(|e| format!("\n  {}", e)).collect::<String>())]
    ArtifactCount {
        version: String,
        found: usize,
        failures: Vec<String>,
    },

    /// A downloaded archive did not contain the expected binary.
    #[error("archive {url} does not contain {binary}")]
    ArchiveMissingBinary { url: String, binary: String },

    /// An error occurred during a network operation.
    #[error("Network operation error: {url} - {message}")]
    Network { url: String, message: String },

    /// An external command (git, the build command) exited unsuccessfully.
    #[error("command `{command}` failed in {}: {output}", dir.display())]
    Command {
        command: String,
        dir: PathBuf,
        output: String,
    },

    /// The container runtime failed or reported something unexpected.
    #[error("container runtime error: {message}")]
    Container { message: String },

    /// The module's working tree has changes that the current flags do not allow.
    #[error("{} has {state}{}", dir.display(), hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    DirtyWorkingTree {
        dir: PathBuf,
        state: String,
        hint: Option<String>,
    },

    /// The module manifest could not be decoded or failed validation.
    #[error("invalid manifest {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    /// A recorded script writes into a directory owned by the runner.
    #[error("{}: file {path:?} collides with the reserved working copy directory", script.display())]
    ReservedPath { script: PathBuf, path: String },

    /// A recorded script names a file outside its work directory.
    #[error("{}: file {path:?} escapes the script work directory", script.display())]
    EscapingPath { script: PathBuf, path: String },

    /// Discovery found nothing to test.
    #[error("no modules found under {}", dir.display())]
    NoModules { dir: PathBuf },

    /// The directory layout being discovered is malformed.
    #[error("{}: {message}", path.display())]
    Discovery { path: PathBuf, message: String },

    /// A recorded script could not be parsed or executed.
    #[error("script {script}: {message}")]
    Script { script: String, message: String },

    /// Invalid configuration, either from flags or the environment.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An error occurred with a cache operation.
    #[error("Cache operation error: {message}")]
    Cache { message: String },

    /// The shared clone lock could not be acquired.
    #[error("lock {}: {message}", path.display())]
    Lock { path: PathBuf, message: String },

    /// One or more test runs failed. Their logs have already been printed.
    #[error("tests failed")]
    TestsFailed,

    /// An error shared between several waiters of the same dedup key.
    #[error(transparent)]
    Shared(Arc<Error>),

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A semantic version parsing error, wrapped from `semver::Error`.
    #[error("Semver parsing error: {0}")]
    Semver(#[from] semver::Error),

    /// A directory walk error, wrapped from `walkdir::Error`.
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Returns true if this is the already-reported test failure sentinel,
    /// looking through shared wrappers.
    pub fn is_tests_failed(&self) -> bool {
        match self {
            Error::TestsFailed => true,
            Error::Shared(inner) => inner.is_tests_failed(),
            _ => false,
        }
    }
}

/// Result type alias for unity operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_lists_strategies_and_errors() {
        let err = Error::VersionAmbiguous {
            version: "v1".to_string(),
            strategies: vec!["semver", "commit"],
            errors: vec!["boom".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("semver, commit"));
        assert!(msg.contains("\n  boom"));
    }

    #[test]
    fn test_tests_failed_through_shared() {
        let err = Error::Shared(Arc::new(Error::TestsFailed));
        assert!(err.is_tests_failed());
        assert!(!Error::PathNotAllowed.is_tests_failed());
    }

    #[test]
    fn test_command_error_keeps_output() {
        let err = Error::Command {
            command: "git fetch".to_string(),
            dir: PathBuf::from("/tmp/x"),
            output: "fatal: nope".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "command `git fetch` failed in /tmp/x: fatal: nope"
        );
    }

    #[test]
    fn test_dirty_tree_hint() {
        let err = Error::DirtyWorkingTree {
            dir: PathBuf::from("/repo"),
            state: "untracked files".to_string(),
            hint: Some("commit or remove them".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "/repo has untracked files\n  hint: commit or remove them"
        );
    }
}
