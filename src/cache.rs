//! # Binary Cache
//!
//! A persistent key to blob store for resolved binaries, shared by every
//! worker in the process and by concurrent invocations of the tool.
//!
//! Keys are SHA-256 digests over the target platform and a version or build
//! identifier (see [`CacheKey::derive`]), so identical keys always name
//! identical binaries. Blobs are laid out with git-style sharding:
//!
//! ```text
//! <cache_root>/bin/<first 2 hex chars>/<remaining 62 hex chars>
//! ```
//!
//! Writes go to a temporary file in the shard directory which is then renamed
//! into place, so readers never observe a partial entry and a repeated put of
//! the same key is a safe overwrite. There is no expiry.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Deterministic cache key for one binary on one platform.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Hashes `domain`, the platform and `id` into a key.
    ///
    /// `domain` separates key spaces (released versions, source builds) that
    /// could otherwise share an identifier.
    pub fn derive(domain: &str, goos: &str, goarch: &str, id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        hasher.update(b"\n");
        hasher.update(format!("GOOS: {goos}\n").as_bytes());
        hasher.update(format!("GOARCH: {goarch}\n").as_bytes());
        hasher.update(id.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Filesystem-backed binary cache.
#[derive(Debug, Clone)]
pub struct BinaryCache {
    dir: PathBuf,
}

impl BinaryCache {
    /// Opens the cache rooted at `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::Cache {
            message: format!("creating {}: {}", dir.display(), e),
        })?;
        Ok(Self { dir })
    }

    /// Path at which the blob for `key` lives (whether or not it exists).
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.to_hex();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Returns the entry path if `key` is present.
    pub fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.entry_path(key);
        path.is_file().then_some(path)
    }

    /// Stores `data` under `key` and returns the entry path.
    pub fn put_bytes(&self, key: &CacheKey, data: &[u8]) -> Result<PathBuf> {
        self.persist(key, |tmp| tmp.write_all(data))
    }

    /// Stores a copy of the file at `src` under `key` and returns the entry path.
    pub fn put_file(&self, key: &CacheKey, src: &Path) -> Result<PathBuf> {
        let mut input = fs::File::open(src).map_err(|e| Error::Cache {
            message: format!("opening {}: {}", src.display(), e),
        })?;
        self.persist(key, |tmp| io::copy(&mut input, tmp).map(|_| ()))
    }

    /// Copies the entry for `key` to `dest`. Returns false on a miss.
    pub fn copy_to(&self, key: &CacheKey, dest: &Path) -> Result<bool> {
        match self.get(key) {
            Some(path) => {
                crate::resolve::copy_executable(&path, dest)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn persist<F>(&self, key: &CacheKey, fill: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut NamedTempFile) -> io::Result<()>,
    {
        let path = self.entry_path(key);
        let shard_dir = path.parent().ok_or_else(|| Error::Cache {
            message: format!("entry path {} has no parent", path.display()),
        })?;
        fs::create_dir_all(shard_dir)?;

        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        fill(&mut tmp)?;
        tmp.as_file().sync_all()?;
        set_executable(tmp.path())?;
        tmp.persist(&path).map_err(|e| Error::Cache {
            message: format!("writing {}: {}", path.display(), e.error),
        })?;
        debug!("cached {} at {}", key, path.display());
        Ok(path)
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cache() -> (tempfile::TempDir, BinaryCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path().join("bin")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_key_is_deterministic_and_platform_sensitive() {
        let a = CacheKey::derive("version", "linux", "amd64", "v0.1.0");
        let b = CacheKey::derive("version", "linux", "amd64", "v0.1.0");
        let c = CacheKey::derive("version", "linux", "arm64", "v0.1.0");
        let d = CacheKey::derive("build", "linux", "amd64", "v0.1.0");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_put_then_get_is_byte_identical() {
        let (_dir, cache) = make_cache();
        let key = CacheKey::derive("version", "linux", "amd64", "v0.1.0");
        assert!(cache.get(&key).is_none());

        let data = b"\x7fELF fake binary";
        cache.put_bytes(&key, data).unwrap();
        let path = cache.get(&key).unwrap();
        assert_eq!(fs::read(path).unwrap(), data);
    }

    #[test]
    fn test_sharded_layout() {
        let (dir, cache) = make_cache();
        let key = CacheKey::derive("version", "linux", "amd64", "v0.2.0");
        let path = cache.put_bytes(&key, b"x").unwrap();
        let hex = key.to_hex();
        assert_eq!(path, dir.path().join("bin").join(&hex[..2]).join(&hex[2..]));
    }

    #[test]
    fn test_put_overwrites_safely() {
        let (_dir, cache) = make_cache();
        let key = CacheKey::derive("version", "linux", "amd64", "v0.3.0");
        cache.put_bytes(&key, b"first").unwrap();
        cache.put_bytes(&key, b"second").unwrap();
        let path = cache.get(&key).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn test_put_file_and_copy_to() {
        let (dir, cache) = make_cache();
        let src = dir.path().join("tool");
        fs::write(&src, b"#!/bin/sh\necho hi\n").unwrap();
        let key = CacheKey::derive("build", "linux", "amd64", "abc");
        cache.put_file(&key, &src).unwrap();

        let dest = dir.path().join("out").join("tool");
        assert!(cache.copy_to(&key, &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), fs::read(&src).unwrap());

        let missing = CacheKey::derive("build", "linux", "amd64", "nope");
        assert!(!cache.copy_to(&missing, &dest).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_entries_are_executable() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, cache) = make_cache();
        let key = CacheKey::derive("version", "linux", "amd64", "v1.0.0");
        let path = cache.put_bytes(&key, b"bin").unwrap();
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
