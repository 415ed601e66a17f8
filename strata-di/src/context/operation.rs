//! Custom scope keyed by an explicitly managed operation
//!
//! An operation is started, activated on any number of threads, and closed
//! when the unit of work ends. Lookups in the scope see the cache of the
//! operation active on the calling thread.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

use super::{Context, Creation, InstanceCache};
use crate::descriptor::Descriptor;
use crate::error::{DiError, DiResult};
use crate::service::Instance;

pub type OperationId = u64;

pub struct OperationContext {
    scope: Arc<str>,
    next_id: AtomicU64,
    operations: DashMap<OperationId, Arc<InstanceCache>>,
    active: DashMap<ThreadId, OperationId>,
}

impl OperationContext {
    pub fn new(scope: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            scope: scope.into(),
            next_id: AtomicU64::new(1),
            operations: DashMap::new(),
            active: DashMap::new(),
        })
    }

    /// Open an operation and activate it on the calling thread
    pub fn start(self: &Arc<Self>) -> OperationHandle {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.operations.insert(id, Arc::new(InstanceCache::new()));
        let handle = OperationHandle {
            id,
            context: self.clone(),
        };
        handle.activate();
        debug!("started operation {} in scope {}", id, self.scope);
        handle
    }

    /// Operation active on the calling thread
    pub fn current(&self) -> Option<OperationId> {
        self.active.get(&thread::current().id()).map(|e| *e.value())
    }

    pub fn open_operations(&self) -> usize {
        self.operations.len()
    }

    fn current_cache(&self) -> Option<Arc<InstanceCache>> {
        let id = self.current()?;
        self.operations.get(&id).map(|e| e.value().clone())
    }

    fn close(&self, id: OperationId) {
        self.active.retain(|_, op| *op != id);
        if let Some((_, cache)) = self.operations.remove(&id) {
            debug!("closing operation {} in scope {}", id, self.scope);
            cache.clear();
        }
    }
}

impl Context for OperationContext {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn find_or_create(&self, descriptor: &Arc<Descriptor>, creation: &Creation<'_>) -> DiResult<Option<Instance>> {
        let cache = self.current_cache().ok_or_else(|| DiError::ContextNotActive {
            scope: self.scope.to_string(),
        })?;
        cache.find_or_create(descriptor, creation)
    }

    fn contains_key(&self, descriptor: &Descriptor) -> bool {
        self.current_cache().is_some_and(|c| c.contains(descriptor))
    }

    fn destroy_one(&self, descriptor: &Descriptor) {
        let caches: Vec<Arc<InstanceCache>> = self.operations.iter().map(|e| e.value().clone()).collect();
        for cache in caches {
            cache.destroy(descriptor);
        }
    }

    fn is_active(&self) -> bool {
        self.current_cache().is_some()
    }

    fn shutdown(&self) {
        let ids: Vec<OperationId> = self.operations.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.close(id);
        }
    }
}

/// One open operation
#[derive(Clone)]
pub struct OperationHandle {
    id: OperationId,
    context: Arc<OperationContext>,
}

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Make this the operation seen by the calling thread
    pub fn activate(&self) {
        if self.is_open() {
            self.context.active.insert(thread::current().id(), self.id);
        }
    }

    /// Detach the calling thread if this operation is active on it
    pub fn suspend(&self) {
        self.context
            .active
            .remove_if(&thread::current().id(), |_, op| *op == self.id);
    }

    pub fn is_open(&self) -> bool {
        self.context.operations.contains_key(&self.id)
    }

    /// Dispose of the operation's instances and detach every thread
    pub fn close(&self) {
        self.context.close(self.id);
    }
}
