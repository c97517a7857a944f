//! # Version Resolution
//!
//! Turns an opaque version identifier into a runnable binary.
//!
//! ## Strategies
//!
//! Each [`Strategy`] recognises one grammar of version identifier:
//!
//! | Identifier | Strategy |
//! |---|---|
//! | `PATH` | [`path::PathStrategy`] |
//! | `v0.4.3`, `v0.5.0-beta.1` | [`release::SemverStrategy`] |
//! | `/abs/path/to/checkout` | [`absolute::AbsolutePathStrategy`] |
//! | `go.mod` | [`gomod::GoModStrategy`] |
//! | `commit:<ref>` | [`commit::CommitStrategy`] |
//! | `change:<id>/<revision>` | [`change::ChangeStrategy`] |
//! | `refs/changes/...` | [`change::PatchsetRefStrategy`] |
//!
//! A strategy that does not recognise an identifier returns `None`. It is
//! not an error and is how the chain stays exhaustive rather than ordered.
//!
//! ## Resolver chain
//!
//! [`Resolver::resolve`] asks every strategy. Exactly one must match: no
//! match is [`Error::VersionNoMatch`] and several matches are
//! [`Error::VersionAmbiguous`], carrying every matching strategy's error.
//!
//! On success the binary has been copied to
//! [`ResolutionTarget::binary_path`] and the canonical version (a full
//! commit hash for `commit:` identifiers, the identifier itself otherwise)
//! is returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::build::BuildHelper;
use crate::cache::BinaryCache;
use crate::config::{ResolverConfig, TargetConfig};
use crate::defaults;
use crate::error::{Error, Result};

pub mod absolute;
pub mod change;
pub mod commit;
pub mod gomod;
pub mod module_build;
pub mod path;
pub mod release;
pub mod shared_clone;

pub use shared_clone::SharedClone;

/// Where one resolution must leave its binary.
#[derive(Debug, Clone)]
pub struct ResolutionTarget {
    /// Directory that receives the binary.
    pub dir: PathBuf,
    /// Scratch space for intermediate state such as builds.
    pub scratch: PathBuf,
    binary_name: String,
}

impl ResolutionTarget {
    pub fn new(dir: impl Into<PathBuf>, scratch: impl Into<PathBuf>, binary_name: &str) -> Self {
        Self {
            dir: dir.into(),
            scratch: scratch.into(),
            binary_name: binary_name.to_string(),
        }
    }

    /// Full path the resolved binary is copied to.
    pub fn binary_path(&self) -> PathBuf {
        self.dir.join(&self.binary_name)
    }
}

/// One resolution call.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub version: &'a str,
    /// Directory the version is resolved relative to (a module root).
    pub context_dir: &'a Path,
    pub target: &'a ResolutionTarget,
}

/// A way of turning one grammar of version identifier into a binary.
pub trait Strategy: Send + Sync {
    /// Short name used in ambiguity errors.
    fn name(&self) -> &'static str;

    /// `None` when the identifier is not in this strategy's grammar.
    /// Otherwise the canonical version, with the binary at
    /// `req.target.binary_path()`.
    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>>;
}

/// The full set of strategies.
pub struct Resolver {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Resolver {
    /// Builds the standard strategy list with shared dependencies injected.
    pub fn new(
        target: Arc<TargetConfig>,
        config: &ResolverConfig,
        build: Arc<BuildHelper>,
    ) -> Result<Self> {
        let cache = Arc::new(BinaryCache::new(defaults::binaries_dir(&config.cache_root))?);
        let clone = Arc::new(SharedClone::new(
            Arc::clone(&target),
            defaults::clone_dir(&config.cache_root, &target.binary_name),
            Arc::clone(&cache),
            Arc::clone(&build),
        ));
        let modules = Arc::new(module_build::ModuleBuilder::new(
            Arc::clone(&target),
            Arc::clone(&build),
        ));

        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(path::PathStrategy::new(
                &target.binary_name,
                config.allow_path,
            )),
            Box::new(release::SemverStrategy::new(
                Arc::clone(&target),
                Arc::clone(&build),
                Arc::clone(&cache),
            )),
            Box::new(absolute::AbsolutePathStrategy::new(Arc::clone(&modules))),
            Box::new(gomod::GoModStrategy::new(modules)),
            Box::new(commit::CommitStrategy::new(Arc::clone(&clone))),
            Box::new(change::ChangeStrategy::new(Arc::clone(&target), Arc::clone(&clone))),
            Box::new(change::PatchsetRefStrategy::new(target, clone)),
        ];
        Ok(Self::with_strategies(strategies))
    }

    pub fn with_strategies(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[Box<dyn Strategy>] {
        &self.strategies
    }

    /// Resolves `version` relative to `context_dir` into `target`.
    pub fn resolve(
        &self,
        version: &str,
        context_dir: &Path,
        target: &ResolutionTarget,
    ) -> Result<String> {
        let req = ResolveRequest {
            version,
            context_dir,
            target,
        };
        let mut matched: Vec<(&'static str, Result<String>)> = self
            .strategies
            .iter()
            .filter_map(|s| s.resolve(&req).map(|r| (s.name(), r)))
            .collect();

        match matched.len() {
            0 => Err(Error::VersionNoMatch {
                version: version.to_string(),
            }),
            1 => {
                let (name, result) = matched.remove(0);
                debug!("{} resolved {} via {}", version, target.binary_path().display(), name);
                result
            }
            _ => Err(Error::VersionAmbiguous {
                version: version.to_string(),
                strategies: matched.iter().map(|(n, _)| *n).collect(),
                errors: matched
                    .iter()
                    .filter_map(|(n, r)| r.as_ref().err().map(|e| format!("{n}: {e}")))
                    .collect(),
            }),
        }
    }
}

/// Copies the executable at `src` to `dest`, creating `dest`'s directory.
/// Permissions are copied with the content.
pub fn copy_executable(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest).map_err(|e| Error::Cache {
        message: format!("copying {} to {}: {}", src.display(), dest.display(), e),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        prefix: &'static str,
        outcome: fn() -> Result<String>,
    }

    impl Strategy for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
            req.version.starts_with(self.prefix).then(self.outcome)
        }
    }

    fn fixed(name: &'static str, prefix: &'static str, outcome: fn() -> Result<String>) -> Box<dyn Strategy> {
        Box::new(Fixed {
            name,
            prefix,
            outcome,
        })
    }

    fn target() -> ResolutionTarget {
        ResolutionTarget::new("/tmp/unity-test/bin", "/tmp/unity-test/scratch", "cue")
    }

    #[test]
    fn test_binary_path() {
        assert_eq!(target().binary_path(), PathBuf::from("/tmp/unity-test/bin/cue"));
    }

    #[test]
    fn test_exactly_one_match_returns_result() {
        let resolver = Resolver::with_strategies(vec![
            fixed("a", "a:", || Ok("A".to_string())),
            fixed("b", "b:", || Ok("B".to_string())),
        ]);
        let got = resolver.resolve("b:1", Path::new("/"), &target()).unwrap();
        assert_eq!(got, "B");
    }

    #[test]
    fn test_no_match() {
        let resolver = Resolver::with_strategies(vec![fixed("a", "a:", || Ok("A".to_string()))]);
        match resolver.resolve("not-a-version", Path::new("/"), &target()) {
            Err(Error::VersionNoMatch { version }) => assert_eq!(version, "not-a-version"),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_multiple_matches_are_ambiguous_and_join_errors() {
        let resolver = Resolver::with_strategies(vec![
            fixed("first", "x", || Ok("ok".to_string())),
            fixed("second", "x", || {
                Err(Error::Resolution {
                    version: "x".to_string(),
                    message: "bad".to_string(),
                })
            }),
        ]);
        match resolver.resolve("x1", Path::new("/"), &target()) {
            Err(Error::VersionAmbiguous {
                strategies, errors, ..
            }) => {
                assert_eq!(strategies, vec!["first", "second"]);
                assert_eq!(errors.len(), 1);
                assert!(errors[0].starts_with("second: "));
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_matched_error_is_returned_verbatim() {
        let resolver = Resolver::with_strategies(vec![fixed("p", "PATH", || {
            Err(Error::PathNotAllowed)
        })]);
        assert!(matches!(
            resolver.resolve("PATH", Path::new("/"), &target()),
            Err(Error::PathNotAllowed)
        ));
    }

    #[test]
    fn test_standard_grammars_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let target_config = Arc::new(TargetConfig::default());
        let config = ResolverConfig {
            allow_path: false,
            cache_root: dir.path().join("cache"),
        };
        let build = Arc::new(BuildHelper::new(&target_config));
        let resolver = Resolver::new(target_config, &config, build).unwrap();
        let names: Vec<_> = resolver.strategies().iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), 7);

        // Identifiers that fail fast inside their own grammar without
        // touching the network.
        let t = ResolutionTarget::new(dir.path().join("bin"), dir.path().join("s"), "cue");
        let ctx = dir.path();
        let cases = [
            ("PATH", "path"),
            ("go.mod", "go.mod"),
            ("/definitely/not/a/source/tree", "absolute"),
        ];
        for (version, want) in cases {
            let req = ResolveRequest {
                version,
                context_dir: ctx,
                target: &t,
            };
            let matching: Vec<_> = resolver
                .strategies()
                .iter()
                .filter(|s| s.resolve(&req).is_some())
                .map(|s| s.name())
                .collect();
            assert_eq!(matching, vec![want], "identifier {version}");
        }
        for version in ["not-a-version", "change:123", "v1.2.3.4", "v01", "1.2.3"] {
            let req = ResolveRequest {
                version,
                context_dir: ctx,
                target: &t,
            };
            assert!(
                resolver.strategies().iter().all(|s| s.resolve(&req).is_none()),
                "identifier {version} should not match"
            );
        }
    }

    /// Names of the strategies claiming `version`. Claiming runs the
    /// resolution, so every identifier here must resolve locally.
    fn claimants(resolver: &Resolver, version: &str, ctx: &Path, t: &ResolutionTarget) -> Vec<&'static str> {
        let req = ResolveRequest {
            version,
            context_dir: ctx,
            target: t,
        };
        resolver
            .strategies()
            .iter()
            .filter(|s| s.resolve(&req).is_some())
            .map(|s| s.name())
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_git_and_release_grammars_are_exclusive() {
        use crate::git::testutil::{git_ok, init_repo};
        use crate::resolve::commit::tests::local_target;
        use url::Url;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        init_repo(&source, &[("tool.sh", "#!/bin/sh\necho base\n")]);
        let head = git_ok(&source, &["rev-parse", "HEAD"]);
        git_ok(&source, &["update-ref", "refs/changes/34/1234/1", "HEAD"]);
        git_ok(&source, &["update-ref", "refs/changes/34/1234/2", "HEAD"]);

        let review = dir.path().join("review");
        fs::create_dir_all(review.join("changes")).unwrap();
        fs::write(
            review.join("changes").join("1234"),
            format!(")]}}'\n{{\"revisions\": {{\"{head}\": {{\"_number\": 2, \"ref\": \"refs/changes/34/1234/2\"}}}}}}"),
        )
        .unwrap();
        let releases = dir.path().join("releases");
        fs::create_dir_all(&releases).unwrap();
        let file_url = |p: &Path| {
            Url::from_directory_path(p)
                .unwrap()
                .as_str()
                .trim_end_matches('/')
                .to_string()
        };

        let target_config = Arc::new(TargetConfig {
            review_url: file_url(&review),
            semver_url_template: format!("{}/{{version}}/{{artifact}}", file_url(&releases)),
            ..local_target(dir.path(), &source)
        });
        let config = ResolverConfig {
            allow_path: false,
            cache_root: dir.path().join("cache"),
        };
        let build = Arc::new(BuildHelper::new(&target_config));
        let resolver = Resolver::new(target_config, &config, build).unwrap();
        let t = ResolutionTarget::new(dir.path().join("bin"), dir.path().join("s"), "cue");
        let ctx = dir.path();

        let commit = format!("commit:{head}");
        let cases = [
            (commit.as_str(), "commit"),
            ("change:1234/2", "change"),
            ("refs/changes/34/1234/1", "patchset-ref"),
        ];
        for (version, want) in cases {
            assert_eq!(claimants(&resolver, version, ctx, &t), vec![want], "identifier {version}");
            resolver
                .resolve(version, ctx, &t)
                .unwrap_or_else(|e| panic!("{version}: {e}"));
        }

        // No archive is published: the release strategy claims the short
        // forms and then fails to download.
        for version in ["v1", "v0.4", "v0.4.3"] {
            assert_eq!(claimants(&resolver, version, ctx, &t), vec!["semver"], "identifier {version}");
        }
    }
}
