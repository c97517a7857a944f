//! The `go.mod` version: whatever the module under test depends on.

use std::sync::Arc;

use super::module_build::ModuleBuilder;
use super::{ResolveRequest, Strategy};
use crate::error::Result;

/// Identifier selecting the version declared by the context's `go.mod`.
pub const GO_MOD_VERSION: &str = "go.mod";

pub struct GoModStrategy {
    modules: Arc<ModuleBuilder>,
}

impl GoModStrategy {
    pub fn new(modules: Arc<ModuleBuilder>) -> Self {
        Self { modules }
    }
}

impl Strategy for GoModStrategy {
    fn name(&self) -> &'static str {
        "go.mod"
    }

    fn resolve(&self, req: &ResolveRequest<'_>) -> Option<Result<String>> {
        if req.version != GO_MOD_VERSION {
            return None;
        }
        Some(self.modules.resolve(req.version, req.context_dir, req.target))
    }
}
