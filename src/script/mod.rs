//! # Recorded Scripts
//!
//! Test scripts are stored as txtar archives: a leading comment holding the
//! commands, followed by file sections introduced by `-- name --` lines.
//!
//! ```text
//! exec cue eval x.cue
//! cmp stdout $WORK/want
//!
//! -- want --
//! a: 1
//! ```
//!
//! Archive files are written to the script's work directory before the
//! commands run. The module's working copy sits in the `repo` subdirectory
//! of that work directory, so no archive file may live under `repo`.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

pub mod runner;

/// Directory, inside each script's work directory, holding the working copy.
pub const REPO_DIR: &str = "repo";

/// Extension of recorded script archives.
pub const SCRIPT_EXTENSION: &str = "txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub name: String,
    pub data: String,
}

/// A parsed txtar archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    pub comment: String,
    pub files: Vec<ArchiveFile>,
}

fn marker_name(line: &str) -> Option<&str> {
    let inner = line.strip_prefix("-- ")?.strip_suffix(" --")?;
    let name = inner.trim();
    (!name.is_empty()).then_some(name)
}

impl Archive {
    pub fn parse(text: &str) -> Self {
        let mut archive = Archive::default();
        let mut current: Option<ArchiveFile> = None;
        for line in text.split_inclusive('\n') {
            let bare = line.trim_end_matches(['\n', '\r']);
            if let Some(name) = marker_name(bare) {
                if let Some(done) = current.take() {
                    archive.files.push(done);
                }
                current = Some(ArchiveFile {
                    name: name.to_string(),
                    data: String::new(),
                });
                continue;
            }
            match current.as_mut() {
                Some(file) => file.data.push_str(line),
                None => archive.comment.push_str(line),
            }
        }
        if let Some(done) = current.take() {
            archive.files.push(done);
        }
        archive
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Replaces the archive at `path` by renaming a complete copy over it,
    /// keeping its permissions.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(self.format().as_bytes())?;
        tmp.as_file().sync_all()?;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(tmp.path(), meta.permissions())?;
        }
        tmp.persist(path).map_err(|e| Error::Script {
            script: path.display().to_string(),
            message: format!("writing archive: {}", e.error),
        })?;
        Ok(())
    }

    /// Serializes back to txtar. Non-empty sections end with a newline.
    pub fn format(&self) -> String {
        let mut out = self.comment.clone();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        for file in &self.files {
            out.push_str(&format!("-- {} --\n", file.name));
            out.push_str(&file.data);
            if !file.data.is_empty() && !file.data.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    pub fn file(&self, name: &str) -> Option<&ArchiveFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Replaces the contents of an existing section. Returns false when
    /// there is no section called `name`.
    pub fn set_file(&mut self, name: &str, data: &str) -> bool {
        match self.files.iter_mut().find(|f| f.name == name) {
            Some(file) => {
                file.data = data.to_string();
                true
            }
            None => false,
        }
    }
}

/// Lexically cleans a relative slash-separated path. `..` that would escape
/// the root is kept.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." if parts.last().is_some_and(|p| *p != "..") => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// True when the archive file `name` would land in the working copy.
pub fn collides_with_repo(name: &str) -> bool {
    let cleaned = clean_path(name);
    cleaned == REPO_DIR || cleaned.starts_with(&format!("{REPO_DIR}/"))
}

/// True when the archive file `name` would land outside the work directory.
pub fn escapes_workdir(name: &str) -> bool {
    let cleaned = clean_path(name);
    cleaned.is_empty() || cleaned == ".." || cleaned.starts_with("../")
}

/// Checks every file name of `archive`, loaded from `script`.
pub fn check_file_names(script: &Path, archive: &Archive) -> Result<()> {
    for file in &archive.files {
        if escapes_workdir(&file.name) {
            return Err(Error::EscapingPath {
                script: script.to_path_buf(),
                path: file.name.clone(),
            });
        }
        if collides_with_repo(&file.name) {
            return Err(Error::ReservedPath {
                script: script.to_path_buf(),
                path: file.name.clone(),
            });
        }
    }
    Ok(())
}

/// Rejects archives that write into the working copy directory or outside
/// the work directory.
pub fn check_reserved(script: &Path) -> Result<()> {
    check_file_names(script, &Archive::load(script)?)
}

/// Script name: the archive's file name without extension.
pub fn script_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Script archives directly inside `dir`, sorted by name.
pub fn list_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = glob::Pattern::escape(&dir.to_string_lossy()) + &format!("/*.{SCRIPT_EXTENSION}");
    let mut scripts: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    scripts.sort();
    Ok(scripts)
}

/// Scripts whose names match `pattern` (all when `None`).
pub fn select<'a>(scripts: &'a [PathBuf], pattern: Option<&Regex>) -> Vec<&'a PathBuf> {
    scripts
        .iter()
        .filter(|p| pattern.is_none_or(|re| re.is_match(&script_name(p))))
        .collect()
}

/// Joins `rel` onto `base` and removes `.` and `..` lexically.
pub fn normalize(base: &Path, rel: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in base.join(rel).components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
