//! Code review versions: `change:<id>/<revision>` and `refs/changes/...`.
//!
//! A change identifier is mapped to a fetchable ref by asking the review
//! service (Gerrit REST) for the change with all its revisions. The revision
//! may be given either as the commit hash of a patchset or as the patchset
//! number. Patchset refs are fetched directly. Both check out `FETCH_HEAD`
//! in the shared clone and resolve to the identifier itself.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde::Deserialize;
use url::Url;

use super::release::fetch_bytes;
use super::{ResolveRequest, SharedClone, Strategy};
use crate::config::TargetConfig;
use crate::error::{Error, Result};
use crate::git;

pub const CHANGE_PREFIX: &str = "change:";
pub const PATCHSET_REF_PREFIX: &str = "refs/changes/";

/// Prefix Gerrit puts before JSON bodies to defeat XSSI.
const XSSI_PREFIX: &str = ")]}'";

#[derive(Debug, Deserialize)]
struct ChangeInfo {
    #[serde(default)]
    revisions: HashMap<String, RevisionInfo>,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    #[serde(rename = "_number")]
    number: u64,
    #[serde(rename = "ref")]
    fetch_ref: String,
}

/// Finds the ref of `revision` (commit hash or patchset number) in a
/// change detail response.
pub fn revision_ref(body: &str, revision: &str) -> Result<Option<String>> {
    let json = body.trim_start().strip_prefix(XSSI_PREFIX).unwrap_or(body);
    let info: ChangeInfo = serde_json::from_str(json)?;
    Ok(info
        .revisions
        .iter()
        .find(|(sha, rev)| sha.as_str() == revision || rev.number.to_string() == revision)
        .map(|(_, rev)| rev.fetch_ref.clone()))
}

/// Splits `change:<id>/<revision>`.
pub fn parse_change(version: &str) -> Option<(&str, &str)> {
    version.strip_prefix(CHANGE_PREFIX)?.split_once('/')
}

fn fetch_and_switch(dir: &Path, source: &str, refspec: &str) -> Result<()> {
    git::fetch(dir, source, Some(refspec))?;
    git::switch_fetch_head(dir)
}

pub struct ChangeStrategy {
    target: Arc<TargetConfig>,
    clone: Arc<SharedClone>,
}

impl ChangeStrategy {
    pub fn new(target: Arc<TargetConfig>, clone: Arc<SharedClone>) -> Self {
        Self { target, clone }
    }

    fn lookup_ref(&self, version: &str, id: &str, revision: &str) -> Result<String> {
        let url = Url::parse(&format!(
            "{}/changes/{}?o=ALL_REVISIONS",
            self.target.review_url.trim_end_matches('/'),
            id
        ))?;
        debug!("querying {}", url);
        let body = fetch_bytes(&url)?;
        revision_ref(&String::from_utf8_lossy(&body), revision)?.ok_or_else(|| {
            Error::Resolution {
                version: version.to_string(),
                message: format!("change {id} has no revision {revision}"),
            }
        })
    }
}

impl Strategy for ChangeStrategy {
    fn name(&self) -> &'static str {
        "change"
    }

    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
        let (id, revision) = parse_change(req.version)?;
        let version = req.version;
        Some(self.clone.resolve(version, req.target, |dir| {
            let fetch_ref = self.lookup_ref(version, id, revision)?;
            fetch_and_switch(dir, &self.target.git_source, &fetch_ref)?;
            Ok(version.to_string())
        }))
    }
}

pub struct PatchsetRefStrategy {
    target: Arc<TargetConfig>,
    clone: Arc<SharedClone>,
}

impl PatchsetRefStrategy {
    pub fn new(target: Arc<TargetConfig>, clone: Arc<SharedClone>) -> Self {
        Self { target, clone }
    }
}

impl Strategy for PatchsetRefStrategy {
    fn name(&self) -> &'static str {
        "patchset-ref"
    }

    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
        if !req.version.starts_with(PATCHSET_REF_PREFIX) {
            return None;
        }
        let version = req.version;
        Some(self.clone.resolve(version, req.target, |dir| {
            fetch_and_switch(dir, &self.target.git_source, version)?;
            Ok(version.to_string())
        }))
    }
}
