use dashmap::DashMap;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::trace;

use super::{Context, Creation, InstanceCache, PER_THREAD};
use crate::descriptor::Descriptor;
use crate::error::DiResult;
use crate::service::Instance;

type Caches = DashMap<ThreadId, Arc<InstanceCache>>;

thread_local! {
    /// Per-thread caches this thread owns, released when the thread exits
    static OWNED: RefCell<Vec<ThreadExit>> = const { RefCell::new(Vec::new()) };
}

/// Removes and disposes of one thread's cache when that thread exits
struct ThreadExit {
    caches: Weak<Caches>,
    thread: ThreadId,
}

impl Drop for ThreadExit {
    fn drop(&mut self) {
        let Some(caches) = self.caches.upgrade() else {
            return;
        };
        if let Some((_, cache)) = caches.remove(&self.thread) {
            trace!("thread {:?} exited, disposing {} per-thread instances", self.thread, cache.len());
            cache.clear_as(self.thread);
        }
    }
}

/// One cache per calling thread
///
/// A thread's cache lives until the thread exits or the context shuts down.
#[derive(Default)]
pub struct PerThreadContext {
    caches: Arc<Caches>,
}

impl PerThreadContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<InstanceCache> {
        let thread = thread::current().id();
        if let Some(cache) = self.caches.get(&thread) {
            return cache.clone();
        }
        let mut created = false;
        let cache = self
            .caches
            .entry(thread)
            .or_insert_with(|| {
                created = true;
                Arc::new(InstanceCache::new())
            })
            .clone();
        if created {
            let exit = ThreadExit {
                caches: Arc::downgrade(&self.caches),
                thread,
            };
            // During thread teardown the registry may already be gone
            if let Err(e) = OWNED.try_with(|owned| owned.borrow_mut().push(exit)) {
                trace!("thread {:?} is exiting, per-thread cache not registered: {}", thread, e);
            }
        }
        cache
    }

    /// Number of threads currently holding a cache
    pub fn thread_count(&self) -> usize {
        self.caches.len()
    }
}

impl Context for PerThreadContext {
    fn scope(&self) -> &str {
        PER_THREAD
    }

    fn find_or_create(&self, descriptor: &Arc<Descriptor>, creation: &Creation<'_>) -> DiResult<Option<Instance>> {
        // The shard guard must not be held while creating
        let cache = self.current();
        cache.find_or_create(descriptor, creation)
    }

    fn contains_key(&self, descriptor: &Descriptor) -> bool {
        self.caches
            .get(&thread::current().id())
            .is_some_and(|cache| cache.contains(descriptor))
    }

    fn destroy_one(&self, descriptor: &Descriptor) {
        let caches: Vec<Arc<InstanceCache>> = self.caches.iter().map(|e| e.value().clone()).collect();
        for cache in caches {
            cache.destroy(descriptor);
        }
    }

    fn shutdown(&self) {
        let caches: Vec<Arc<InstanceCache>> = self.caches.iter().map(|e| e.value().clone()).collect();
        self.caches.clear();
        for cache in caches {
            cache.clear();
        }
    }
}
