//! Absolute paths name a local checkout of the binary's source.

use std::path::Path;
use std::sync::Arc;

use super::module_build::ModuleBuilder;
use super::{ResolveRequest, Strategy};
use crate::error::Result;

pub struct AbsolutePathStrategy {
    modules: Arc<ModuleBuilder>,
}

impl AbsolutePathStrategy {
    pub fn new(modules: Arc<ModuleBuilder>) -> Self {
        Self { modules }
    }
}

impl Strategy for AbsolutePathStrategy {
    fn name(&self) -> &'static str {
        "absolute"
    }

    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
        let dir = Path::new(req.version);
        if !dir.is_absolute() {
            return None;
        }
        Some(self.modules.resolve(req.version, dir, req.target))
    }
}
