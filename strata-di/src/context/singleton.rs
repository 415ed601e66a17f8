//! Locator-lifetime contexts

use std::sync::Arc;

use super::{Context, Creation, InstanceCache, IMMEDIATE, SINGLETON};
use crate::descriptor::Descriptor;
use crate::error::DiResult;
use crate::service::Instance;

/// One instance per descriptor until the descriptor is unbound or the locator shuts down
#[derive(Default)]
pub struct SingletonContext {
    cache: InstanceCache,
}

impl SingletonContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Context for SingletonContext {
    fn scope(&self) -> &str {
        SINGLETON
    }

    fn find_or_create(&self, descriptor: &Arc<Descriptor>, creation: &Creation<'_>) -> DiResult<Option<Instance>> {
        self.cache.find_or_create(descriptor, creation)
    }

    fn contains_key(&self, descriptor: &Descriptor) -> bool {
        self.cache.contains(descriptor)
    }

    fn destroy_one(&self, descriptor: &Descriptor) {
        self.cache.destroy(descriptor);
    }

    fn shutdown(&self) {
        self.cache.clear();
    }
}

/// Singleton semantics, but instances are created as soon as they are committed
#[derive(Default)]
pub struct ImmediateContext {
    cache: InstanceCache,
}

impl ImmediateContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Context for ImmediateContext {
    fn scope(&self) -> &str {
        IMMEDIATE
    }

    fn find_or_create(&self, descriptor: &Arc<Descriptor>, creation: &Creation<'_>) -> DiResult<Option<Instance>> {
        self.cache.find_or_create(descriptor, creation)
    }

    fn contains_key(&self, descriptor: &Descriptor) -> bool {
        self.cache.contains(descriptor)
    }

    fn destroy_one(&self, descriptor: &Descriptor) {
        self.cache.destroy(descriptor);
    }

    fn is_eager(&self) -> bool {
        true
    }

    fn shutdown(&self) {
        self.cache.clear();
    }
}
