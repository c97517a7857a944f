//! # Shared Clone
//!
//! One working clone of the binary's source repository, reused by every
//! strategy that needs to check out an arbitrary reference (commits, code
//! review changes, patchset refs).
//!
//! ## Protocol
//!
//! 1. Look the requested key up in the [`BinaryCache`]. A hit is copied out
//!    without taking any lock.
//! 2. Otherwise, inside a per-key [`DedupGuard`] so that concurrent workers
//!    asking for the same key wait for one another:
//!    - take the cross-process [`CloneLock`];
//!    - clone the repository if there is no clone yet;
//!    - run the strategy's checkout, which returns the canonical version;
//!    - build and cache under the canonical version, unless that is already
//!      cached;
//!    - release the lock.
//! 3. Copy the cached binary to the target.
//!
//! Caching under the canonical version makes different spellings of one
//! commit converge on a single cache entry.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use super::{copy_executable, ResolutionTarget};
use crate::build::BuildHelper;
use crate::cache::BinaryCache;
use crate::config::TargetConfig;
use crate::dedup::DedupGuard;
use crate::error::Result;
use crate::git;
use crate::lock::CloneLock;

pub struct SharedClone {
    target: Arc<TargetConfig>,
    dir: PathBuf,
    lock: CloneLock,
    cache: Arc<BinaryCache>,
    build: Arc<BuildHelper>,
    inflight: DedupGuard<String, (String, PathBuf)>,
}

impl SharedClone {
    pub fn new(
        target: Arc<TargetConfig>,
        dir: PathBuf,
        cache: Arc<BinaryCache>,
        build: Arc<BuildHelper>,
    ) -> Self {
        let lock = CloneLock::for_dir(&dir);
        Self {
            target,
            dir,
            lock,
            cache,
            build,
            inflight: DedupGuard::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves `key` into `dest`. `checkout` runs inside the clone with the
    /// lock held and returns the canonical version.
    pub fn resolve<F>(&self, key: &str, dest: &ResolutionTarget, checkout: F) -> Result<String>
    where
        F: FnOnce(&Path) -> Result<String>,
    {
        let binary = dest.binary_path();
        if self.cache.copy_to(&self.build.build_key(key), &binary)? {
            debug!("cache hit for {}", key);
            return Ok(key.to_string());
        }
        let (canonical, entry) = self
            .inflight
            .run(key.to_string(), || self.checkout_and_build(dest, checkout))?;
        copy_executable(&entry, &binary)?;
        Ok(canonical)
    }

    fn checkout_and_build<F>(&self, dest: &ResolutionTarget, checkout: F) -> Result<(String, PathBuf)>
    where
        F: FnOnce(&Path) -> Result<String>,
    {
        let _guard = self.lock.acquire()?;
        self.ensure_clone()?;

        let canonical = checkout(&self.dir)?;
        let key = self.build.build_key(&canonical);
        if let Some(entry) = self.cache.get(&key) {
            debug!("{} already built", canonical);
            return Ok((canonical, entry));
        }

        let output = dest.scratch.join("build").join(&self.target.binary_name);
        self.build.build(&self.dir, &output)?;
        let entry = self.cache.put_file(&key, &output)?;
        Ok((canonical, entry))
    }

    fn ensure_clone(&self) -> Result<()> {
        if self.dir.join(".git").exists() {
            return Ok(());
        }
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        info!("cloning {} into {}", self.target.git_source, self.dir.display());
        git::clone(&self.target.git_source, &self.dir)
    }
}
