//! Fixtures shared by the integration and CLI tests.
//!
//! A [`TestFixture`] is a temporary directory holding a git repository of
//! modules (`repo/`), fake release archives of the tool binary
//! (`releases/<version>/<artifact>`) and a cache root (`cache/`):
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! let fixture = TestFixture::new()
//!     .with_release("v0.1.0")
//!     .with_repo(&[("cue.mod/tests/manifest.yaml", "versions: [v0.1.0]\n")]);
//! fixture.command().args(["test", "--unsafe"]).assert().success();
//! ```

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::prelude::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use url::Url;

use unity::build::Platform;
use unity::config::TargetConfig;

pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use predicates::prelude::*;

    pub use super::{git, TestFixture};
}

/// Runs git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=unity",
            "-c",
            "user.email=unity@example.com",
            "-c",
            "init.defaultBranch=main",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A shell script standing in for the released binary of `version`.
///
/// `cue version` prints the version, `cue fail` exits 1 and anything else
/// echoes its arguments.
pub fn fake_cue(version: &str) -> String {
    format!(
        "#!/bin/sh\ncase \"$1\" in\nversion) echo \"cue version {version}\" ;;\nfail) echo 'failing as asked' >&2; exit 1 ;;\n*) echo \"$@\" ;;\nesac\n"
    )
}

/// A gzipped tar holding `fake_cue(version)` as `cue`.
pub fn release_archive(version: &str) -> Vec<u8> {
    let script = fake_cue(version);
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(script.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "cue", script.as_bytes())
        .expect("Failed to append archive entry");
    builder
        .into_inner()
        .expect("Failed to finish tar")
        .finish()
        .expect("Failed to finish gzip")
}

/// Release archive name for the host platform.
pub fn artifact_name(version: &str) -> String {
    let host = Platform::host();
    format!("cue_{}_{}_{}.tar.gz", version, host.goos, host.goarch)
}

/// A temporary directory holding a module repository, a directory of
/// release archives and a cache root.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a git repository at `repo/` with one commit of `files`.
    pub fn with_repo(self, files: &[(&str, &str)]) -> Self {
        let repo = self.repo();
        std::fs::create_dir_all(&repo).expect("Failed to create repo directory");
        git(&repo, &["init", "-q"]);
        for (name, content) in files {
            let path = repo.join(name);
            std::fs::create_dir_all(path.parent().expect("file has a parent"))
                .expect("Failed to create directory");
            std::fs::write(path, content).expect("Failed to write file");
        }
        git(&repo, &["add", "-A"]);
        git(&repo, &["commit", "-q", "--allow-empty", "-m", "initial"]);
        self
    }

    /// Publish a release archive of `version` for the host platform.
    pub fn with_release(self, version: &str) -> Self {
        self.temp_dir
            .child("releases")
            .child(version)
            .child(artifact_name(version))
            .write_binary(&release_archive(version))
            .expect("Failed to write release archive");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn repo(&self) -> PathBuf {
        self.path().join("repo")
    }

    pub fn cache_root(&self) -> PathBuf {
        self.path().join("cache")
    }

    /// `file://` download template pointing at the published releases.
    pub fn url_template(&self) -> String {
        let base = Url::from_directory_path(self.path().join("releases"))
            .expect("Failed to build releases URL");
        format!("{}{{version}}/{{artifact}}", base.as_str())
    }

    pub fn target_config(&self) -> TargetConfig {
        TargetConfig {
            semver_url_template: self.url_template(),
            ..TargetConfig::default()
        }
    }

    /// Create a `unity` command running in the repository against the
    /// published releases.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("unity");
        cmd.current_dir(self.repo())
            .env("UNITY_SEMVER_URL_TEMPLATE", self.url_template())
            .env("UNITY_CACHE", self.cache_root())
            .env_remove("UNITY_UNSAFE")
            .env_remove("UNITY_DEBUG");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
