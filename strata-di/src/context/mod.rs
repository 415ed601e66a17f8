//! Scope contexts
//!
//! Each scope name maps to a [`Context`] that decides whether an instance is
//! cached, for how long, and for whom. The locator routes every descriptor to
//! the context registered for its scope.

mod cache;
mod operation;
mod per_lookup;
mod per_thread;
mod singleton;

pub use cache::InstanceCache;
pub use operation::{OperationContext, OperationHandle, OperationId};
pub use per_lookup::PerLookupContext;
pub use per_thread::PerThreadContext;
pub use singleton::{ImmediateContext, SingletonContext};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

use crate::container::{ServiceLocator, WeakLocator};
use crate::descriptor::Descriptor;
use crate::error::{DiError, DiResult};
use crate::lifecycle;
use crate::service::Instance;

/// One instance per descriptor for the locator's lifetime
pub const SINGLETON: &str = "Singleton";
/// A fresh instance for every lookup and injection
pub const PER_LOOKUP: &str = "PerLookup";
/// One instance per descriptor per thread
pub const PER_THREAD: &str = "PerThread";
/// Singleton instances realized as soon as they are bound
pub const IMMEDIATE: &str = "Immediate";

/// Instance cache and creation policy for one scope
pub trait Context: Send + Sync {
    /// Scope name this context serves
    fn scope(&self) -> &str;

    /// Return the cached instance, or create and (if caching) remember it
    fn find_or_create(&self, descriptor: &Arc<Descriptor>, creation: &Creation<'_>) -> DiResult<Option<Instance>>;

    fn contains_key(&self, descriptor: &Descriptor) -> bool;

    /// Dispose of the cached instance, if any
    fn destroy_one(&self, descriptor: &Descriptor);

    fn is_active(&self) -> bool {
        true
    }

    /// Whether a descriptor may produce no instance
    fn supports_null_creation(&self) -> bool {
        false
    }

    /// Whether instances are shared between lookups
    fn caches_instances(&self) -> bool {
        true
    }

    /// Whether lookups get proxies when the descriptor does not say
    fn proxies_by_default(&self) -> bool {
        false
    }

    /// Whether descriptors are realized when committed
    fn is_eager(&self) -> bool {
        false
    }

    /// Dispose of every cached instance
    fn shutdown(&self);
}

/// Handed to a context so it can build and later dispose of instances
pub struct Creation<'a> {
    locator: &'a ServiceLocator,
    root: Option<&'a Dependents>,
    producer: Mutex<Option<Instance>>,
}

impl<'a> Creation<'a> {
    pub(crate) fn new(locator: &'a ServiceLocator, root: Option<&'a Dependents>) -> Self {
        Self {
            locator,
            root,
            producer: Mutex::new(None),
        }
    }

    pub fn locator(&self) -> &ServiceLocator {
        self.locator
    }

    /// Run the full lifecycle for `descriptor`; nothing is cached
    pub fn create(&self, descriptor: &Arc<Descriptor>) -> DiResult<Option<Instance>> {
        lifecycle::create(self.locator, descriptor, self.root, &self.producer)
    }

    /// The service handle on whose behalf this creation runs, if any
    pub fn root(&self) -> Option<&Dependents> {
        self.root
    }

    /// Disposer for what the last `create` produced
    pub fn disposer(&self) -> Disposer {
        Disposer {
            locator: self.locator.downgrade(),
            producer: self.producer.lock().clone(),
        }
    }
}

/// Runs pre-destroy for instances a context releases
///
/// Factory products keep the factory instance that provided them, so they
/// can be disposed after the factory's own scope has let go of it.
#[derive(Clone)]
pub struct Disposer {
    locator: WeakLocator,
    producer: Option<Instance>,
}

impl Disposer {
    pub fn dispose(&self, descriptor: &Arc<Descriptor>, instance: &Instance) {
        match self.locator.upgrade() {
            Some(locator) => lifecycle::dispose(&locator, descriptor, instance, self.producer.as_ref()),
            None => trace!("locator gone, dropping {} without disposal", descriptor),
        }
    }
}

/// Instances created while building a service handle's root instance
///
/// Non-caching contexts record what they create here so that destroying the
/// handle also disposes of them.
#[derive(Default)]
pub struct Dependents {
    entries: Mutex<Vec<(Arc<Descriptor>, Instance, Disposer)>>,
}

impl Dependents {
    pub fn record(&self, descriptor: &Arc<Descriptor>, instance: &Instance, disposer: Disposer) {
        self.entries.lock().push((descriptor.clone(), instance.clone(), disposer));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose of every recorded instance, most recent first
    pub(crate) fn destroy_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for (descriptor, instance, disposer) in entries.into_iter().rev() {
            disposer.dispose(&descriptor, &instance);
        }
    }
}

/// Scope name to context mapping of one locator
#[derive(Default)]
pub(crate) struct ScopeRegistry {
    contexts: RwLock<FxHashMap<String, Arc<dyn Context>>>,
}

impl ScopeRegistry {
    pub(crate) fn with_builtins() -> Self {
        let registry = Self::default();
        registry.insert(Arc::new(SingletonContext::new()));
        registry.insert(Arc::new(PerLookupContext::new()));
        registry.insert(Arc::new(PerThreadContext::new()));
        registry.insert(Arc::new(ImmediateContext::new()));
        registry
    }

    /// Register `context`, returning the one it replaces
    pub(crate) fn insert(&self, context: Arc<dyn Context>) -> Option<Arc<dyn Context>> {
        self.contexts.write().insert(context.scope().to_string(), context)
    }

    pub(crate) fn remove(&self, scope: &str) -> Option<Arc<dyn Context>> {
        self.contexts.write().remove(scope)
    }

    pub(crate) fn get(&self, scope: &str) -> DiResult<Arc<dyn Context>> {
        self.contexts
            .read()
            .get(scope)
            .cloned()
            .ok_or_else(|| DiError::NoSuchContext {
                scope: scope.to_string(),
            })
    }

    pub(crate) fn contains(&self, scope: &str) -> bool {
        self.contexts.read().contains_key(scope)
    }

    pub(crate) fn all(&self) -> Vec<Arc<dyn Context>> {
        self.contexts.read().values().cloned().collect()
    }
}
