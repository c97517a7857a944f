//! # Unity
//!
//! This library tests a tool binary (`cue` by default) across many of its
//! versions. Modules record scripts of tool invocations together with their
//! expected output, plus a manifest of versions those scripts are known to
//! pass against. `unity` resolves each version to a binary, runs every
//! module's scripts against it in isolated working copies and reports which
//! (module, version) pairs regressed.
//!
//! ## Core Concepts
//!
//! - **Version resolution (`resolve`)**: Turns identifiers such as `v0.4.3`,
//!   `commit:abc123`, `change:1234/2`, `go.mod`, `PATH` or an absolute
//!   source path into a runnable binary, downloading or building it.
//! - **Binary cache (`cache`)**: Content-addressed store of every binary
//!   resolved so far, keyed by identifier and target platform.
//! - **Single flight (`dedup`, `lock`)**: Concurrent resolutions of the same
//!   version share one download or build, in process and across processes.
//! - **Phases (`phases`)**: Discovery of modules, the base and extra test
//!   phases, dispatch of scripts in-process or into a container, and the
//!   final report.
//! - **Scripts (`script`)**: The recorded script archive format and the
//!   harness that executes it.
//!
//! ## Execution Flow
//!
//! 1.  **Discovery**: Find modules and load their manifests.
//! 2.  **Base**: Test each module against its manifest versions.
//! 3.  **Extra**: If nothing failed, test each module against the versions
//!     given on the command line.
//! 4.  **Report**: Print failures and a timing table, and return the verdict.

pub mod build;
pub mod cache;
pub mod config;
pub mod container;
pub mod dedup;
pub mod defaults;
pub mod error;
pub mod git;
pub mod lock;
pub mod manifest;
pub mod output;
pub mod phases;
pub mod process;
pub mod resolve;
pub mod script;
