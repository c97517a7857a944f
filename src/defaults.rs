//! Defaults and on-disk layout of the cache root.

use std::path::{Path, PathBuf};

/// Container image used for `--unsafe`-less runs.
///
/// Pinned by digest so every invocation sandboxes scripts in the same
/// environment. Override with `--image` or `UNITY_IMAGE`.
pub const DEFAULT_IMAGE: &str =
    "docker.io/cueckoo/unity@sha256:e9480dcb2a99ea7a128c0d560964aa4d1f642485da1328b1daa2e46800e33b59";

/// Subdirectory of the cache root holding content-addressed binaries.
pub const BINARIES_DIR: &str = "bin";

/// Subdirectory of the cache root holding the shared source clone.
pub const CLONES_DIR: &str = "clones";

/// `unity` below the user cache directory (`~/.cache` on Linux), or
/// `.unity-cache/unity` when there is none. `--cache-root` and
/// `UNITY_CACHE` take precedence.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".unity-cache"))
        .join("unity")
}

/// Directory of the content-addressed binary cache below `cache_root`.
pub fn binaries_dir(cache_root: &Path) -> PathBuf {
    cache_root.join(BINARIES_DIR)
}

/// Location of the shared clone for `binary_name` below `cache_root`.
pub fn clone_dir(cache_root: &Path, binary_name: &str) -> PathBuf {
    cache_root.join(CLONES_DIR).join(binary_name)
}
