//! The `PATH` version: whatever binary the environment already provides.

use std::ffi::OsStr;
use std::path::PathBuf;

use log::debug;

use super::{copy_executable, ResolveRequest, Strategy};
use crate::error::{Error, Result};

/// Identifier selecting the binary found on `PATH`.
pub const PATH_VERSION: &str = "PATH";

pub struct PathStrategy {
    binary_name: String,
    allowed: bool,
}

impl PathStrategy {
    pub fn new(binary_name: &str, allowed: bool) -> Self {
        Self {
            binary_name: binary_name.to_string(),
            allowed,
        }
    }
}

/// First regular file named `name` in the directories of `search_path`.
pub fn find_in_path(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

impl Strategy for PathStrategy {
    fn name(&self) -> &'static str {
        "path"
    }

    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
        if req.version != PATH_VERSION {
            return None;
        }
        if !self.allowed {
            return Some(Err(Error::PathNotAllowed));
        }
        Some(self.copy_from_path(req))
    }
}

impl PathStrategy {
    fn copy_from_path(&self, req: &ResolveRequest<'_>) -> Result<String> {
        let search_path = std::env::var_os("PATH").unwrap_or_default();
        let found = find_in_path(&self.binary_name, &search_path).ok_or_else(|| {
            Error::Resolution {
                version: PATH_VERSION.to_string(),
                message: format!("{} not found in PATH", self.binary_name),
            }
        })?;
        debug!("using {} from PATH", found.display());
        copy_executable(&found, &req.target.binary_path())?;
        Ok(PATH_VERSION.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ResolutionTarget;
    use std::fs;
    use std::path::Path;

    #[cfg(unix)]
    fn write_exec(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path_skips_non_executables() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("cue"), "not executable").unwrap();
        write_exec(&b.join("cue"));

        let search = std::env::join_paths([&a, &b]).unwrap();
        assert_eq!(find_in_path("cue", &search), Some(b.join("cue")));
        assert_eq!(find_in_path("other", &search), None);
    }

    #[test]
    fn test_not_applicable_to_other_identifiers() {
        let s = PathStrategy::new("cue", true);
        let t = ResolutionTarget::new("/x", "/y", "cue");
        for version in ["path", "v0.1.0", "commit:abc"] {
            let req = ResolveRequest {
                version,
                context_dir: Path::new("/"),
                target: &t,
            };
            assert!(s.resolve(&req).is_none());
        }
    }

    #[test]
    fn test_disallowed_fails_closed() {
        let s = PathStrategy::new("cue", false);
        let t = ResolutionTarget::new("/x", "/y", "cue");
        let req = ResolveRequest {
            version: "PATH",
            context_dir: Path::new("/"),
            target: &t,
        };
        assert!(matches!(s.resolve(&req), Some(Err(Error::PathNotAllowed))));
    }

    #[cfg(unix)]
    #[test]
    fn test_copies_binary_found_on_path() {
        // `sh` is on PATH everywhere the tests run.
        let dir = tempfile::tempdir().unwrap();
        let s = PathStrategy::new("sh", true);
        let t = ResolutionTarget::new(dir.path().join("bin"), dir.path().join("s"), "sh");
        let req = ResolveRequest {
            version: "PATH",
            context_dir: dir.path(),
            target: &t,
        };
        assert_eq!(s.resolve(&req).unwrap().unwrap(), "PATH");
        assert!(t.binary_path().is_file());
    }
}
