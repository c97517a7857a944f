//! Released versions, downloaded as archives.
//!
//! A semantic version (`v0.4.3`) names an official release. The short forms
//! `v1` and `v0.4` are accepted too and stand for `v1.0.0` and `v0.4.0`
//! when archives are named and cached. Release archives
//! have been published under two naming conventions over time, so every
//! convention that can express the target platform is tried concurrently
//! against the URL template. Exactly one download must succeed. When more
//! than one does, the names collide and the resolution fails rather than
//! picking one.
//!
//! The binary is extracted from the gzipped tar and stored in the
//! [`BinaryCache`] before being copied to the target, so later resolutions
//! of the same version never touch the network.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use flate2::read::GzDecoder;
use log::{debug, info};
use url::Url;

use super::{copy_executable, ResolveRequest, Strategy};
use crate::build::{BuildHelper, Platform};
use crate::cache::{BinaryCache, CacheKey};
use crate::config::TargetConfig;
use crate::dedup::DedupGuard;
use crate::error::{Error, Result};

/// Maps (binary name, version, platform) to an archive file name, or `None`
/// when the convention has no name for the platform.
type ArtifactNamer = fn(&str, &str, &Platform) -> Option<String>;

/// `cue_0.4.3_Linux_x86_64.tar.gz`
fn old_style(binary: &str, version: &str, platform: &Platform) -> Option<String> {
    let os = match platform.goos.as_str() {
        "linux" => "Linux",
        "darwin" => "Darwin",
        "windows" => "Windows",
        _ => return None,
    };
    let arch = match platform.goarch.as_str() {
        "386" => "i386",
        "amd64" => "x86_64",
        _ => return None,
    };
    let bare = version.strip_prefix('v').unwrap_or(version);
    Some(format!("{binary}_{bare}_{os}_{arch}.tar.gz"))
}

/// `cue_v0.4.3_linux_amd64.tar.gz`
fn new_style(binary: &str, version: &str, platform: &Platform) -> Option<String> {
    Some(format!(
        "{binary}_{version}_{}_{}.tar.gz",
        platform.goos, platform.goarch
    ))
}

const NAMERS: [ArtifactNamer; 2] = [old_style, new_style];

/// The full `vMAJOR.MINOR.PATCH[-pre][+build]` form of a release version,
/// or `None` when `version` is not one. `v1` and `v0.4` are padded with
/// zeros; short forms take no pre-release or build suffix.
pub fn release_version(version: &str) -> Option<String> {
    let rest = version.strip_prefix('v')?;
    if ::semver::Version::parse(rest).is_ok() {
        return Some(version.to_string());
    }
    let parts: Vec<&str> = rest.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| is_numeric_identifier(p)) {
        return None;
    }
    let mut full = parts;
    full.resize(3, "0");
    Some(format!("v{}", full.join(".")))
}

/// Digits without a leading zero.
fn is_numeric_identifier(part: &str) -> bool {
    !part.is_empty()
        && part.bytes().all(|b| b.is_ascii_digit())
        && (part == "0" || !part.starts_with('0'))
}

pub fn is_release_version(version: &str) -> bool {
    release_version(version).is_some()
}

/// Reads the resource at `url`. Supports `file`, `http` and `https`.
pub fn fetch_bytes(url: &Url) -> Result<Vec<u8>> {
    let network = |message: String| Error::Network {
        url: url.to_string(),
        message,
    };
    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| network("not a local file path".to_string()))?;
            debug!("open {}", path.display());
            fs::read(&path).map_err(|e| network(e.to_string()))
        }
        "http" | "https" => {
            debug!("get {}", url);
            let resp = ureq::get(url.as_str())
                .call()
                .map_err(|e| network(e.to_string()))?;
            let mut buf = Vec::new();
            resp.into_body()
                .into_reader()
                .read_to_end(&mut buf)
                .map_err(|e| network(e.to_string()))?;
            Ok(buf)
        }
        other => Err(network(format!("unsupported scheme {other:?}"))),
    }
}

/// Contents of the entry named `binary` in a gzipped tar.
pub fn extract_binary(archive: &[u8], binary: &str, url: &str) -> Result<Vec<u8>> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let corrupt = |e: std::io::Error| Error::Network {
        url: url.to_string(),
        message: format!("reading archive: {e}"),
    };
    for entry in tar.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let matches = {
            let path = entry.path().map_err(corrupt)?;
            let path = path.strip_prefix("./").unwrap_or(&*path);
            path == Path::new(binary)
        };
        if matches {
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(corrupt)?;
            return Ok(data);
        }
    }
    Err(Error::ArchiveMissingBinary {
        url: url.to_string(),
        binary: binary.to_string(),
    })
}

/// Resolves released versions through the binary cache.
pub struct SemverStrategy {
    target: Arc<TargetConfig>,
    build: Arc<BuildHelper>,
    cache: Arc<BinaryCache>,
    downloads: DedupGuard<CacheKey, PathBuf>,
}

impl SemverStrategy {
    pub fn new(target: Arc<TargetConfig>, build: Arc<BuildHelper>, cache: Arc<BinaryCache>) -> Self {
        Self {
            target,
            build,
            cache,
            downloads: DedupGuard::new(),
        }
    }

    /// Candidate download URLs for `version` on the target platform.
    pub fn candidate_urls(&self, version: &str) -> Result<Vec<Url>> {
        NAMERS
            .iter()
            .filter_map(|namer| namer(&self.target.binary_name, version, self.build.platform()))
            .map(|artifact| self.target.artifact_url(version, &artifact))
            .collect()
    }

    fn resolve_release(&self, req: &ResolveRequest<'_>, full: &str) -> Result<String> {
        let key = self.build.version_key(full);
        let dest = req.target.binary_path();
        if self.cache.copy_to(&key, &dest)? {
            debug!("cache hit for {}", req.version);
            return Ok(req.version.to_string());
        }
        let entry = self.downloads.run(key, || match self.cache.get(&key) {
            Some(path) => Ok(path),
            None => self.download(full, &key),
        })?;
        copy_executable(&entry, &dest)?;
        Ok(req.version.to_string())
    }

    fn download(&self, version: &str, key: &CacheKey) -> Result<PathBuf> {
        let urls = self.candidate_urls(version)?;
        info!("downloading {} for {}", version, self.build.platform());

        let results: Vec<(Url, Result<Vec<u8>>)> = thread::scope(|s| {
            let handles: Vec<_> = urls
                .into_iter()
                .map(|url| s.spawn(move || {
                    let result = fetch_bytes(&url);
                    (url, result)
                }))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().ok())
                .collect()
        });

        let mut failures = Vec::new();
        let mut successes = Vec::new();
        for (url, result) in results {
            match result {
                Ok(bytes) => successes.push((url, bytes)),
                Err(e) => failures.push(e.to_string()),
            }
        }
        if successes.len() != 1 {
            return Err(Error::ArtifactCount {
                version: version.to_string(),
                found: successes.len(),
                failures,
            });
        }
        let (url, archive) = successes.remove(0);
        let binary = extract_binary(&archive, &self.target.binary_name, url.as_str())?;
        self.cache.put_bytes(key, &binary)
    }
}

impl Strategy for SemverStrategy {
    fn name(&self) -> &'static str {
        "semver"
    }

    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
        let full = release_version(req.version)?;
        Some(self.resolve_release(req, &full))
    }
}
