use std::sync::Arc;

use super::{Context, Creation, PER_LOOKUP};
use crate::descriptor::Descriptor;
use crate::error::DiResult;
use crate::service::Instance;

/// Never caches; every request builds a new instance
#[derive(Debug, Default)]
pub struct PerLookupContext;

impl PerLookupContext {
    pub fn new() -> Self {
        Self
    }
}

impl Context for PerLookupContext {
    fn scope(&self) -> &str {
        PER_LOOKUP
    }

    fn find_or_create(&self, descriptor: &Arc<Descriptor>, creation: &Creation<'_>) -> DiResult<Option<Instance>> {
        let instance = creation.create(descriptor)?;
        if let (Some(root), Some(instance)) = (creation.root(), &instance) {
            root.record(descriptor, instance, creation.disposer());
        }
        Ok(instance)
    }

    fn contains_key(&self, _descriptor: &Descriptor) -> bool {
        false
    }

    fn destroy_one(&self, _descriptor: &Descriptor) {}

    fn supports_null_creation(&self) -> bool {
        true
    }

    fn caches_instances(&self) -> bool {
        false
    }

    fn shutdown(&self) {}
}
