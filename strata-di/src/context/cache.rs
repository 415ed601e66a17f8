//! Per-descriptor instance cache shared by the caching contexts
//!
//! Each slot moves `absent -> creating -> present`, and is claimed again while
//! its instance is disposed. Only the thread that
//! claims a slot creates the instance; other threads wait on the condition
//! variable until it is published or the creation fails. A thread meeting
//! its own claim, or waiting on a thread that transitively waits on it, fails
//! with a cycle error instead of blocking forever.

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

use super::{Creation, Disposer};
use crate::descriptor::{Descriptor, DescriptorKey};
use crate::error::{DiError, DiResult};
use crate::lifecycle;
use crate::service::Instance;

/// Which thread each blocked thread is waiting for
static WAITING: Lazy<Mutex<FxHashMap<ThreadId, ThreadId>>> = Lazy::new(|| Mutex::new(FxHashMap::default()));

enum Slot {
    Creating(ThreadId),
    Present {
        descriptor: Arc<Descriptor>,
        instance: Instance,
        order: u64,
        disposer: Disposer,
    },
}

#[derive(Default)]
struct Slots {
    entries: FxHashMap<DescriptorKey, Slot>,
    created: u64,
}

/// Thread-safe descriptor to instance map with exclusive creation
#[derive(Default)]
pub struct InstanceCache {
    slots: Mutex<Slots>,
    ready: Condvar,
}

fn waits_on(me: ThreadId, owner: ThreadId, waiting: &FxHashMap<ThreadId, ThreadId>) -> bool {
    let mut current = owner;
    for _ in 0..=waiting.len() {
        match waiting.get(&current) {
            Some(&next) if next == me => return true,
            Some(&next) => current = next,
            None => return false,
        }
    }
    false
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached instance for `descriptor`, creating it at most once
    pub fn find_or_create(&self, descriptor: &Arc<Descriptor>, creation: &Creation<'_>) -> DiResult<Option<Instance>> {
        let key = descriptor.key();
        let me = thread::current().id();
        let mut slots = self.slots.lock();
        loop {
            let owner = match slots.entries.get(&key) {
                Some(Slot::Present { instance, .. }) => return Ok(Some(instance.clone())),
                Some(Slot::Creating(owner)) => *owner,
                None => break,
            };
            if owner == me {
                return Err(lifecycle::cycle_error(descriptor));
            }
            {
                let mut waiting = WAITING.lock();
                if waits_on(me, owner, &waiting) {
                    debug!("creation of {} would deadlock with {:?}", descriptor, owner);
                    return Err(DiError::CycleDetected {
                        chain: format!("{} is being created by a thread that waits on this one", descriptor),
                    });
                }
                waiting.insert(me, owner);
            }
            trace!("waiting for {} created by {:?}", descriptor, owner);
            self.ready.wait(&mut slots);
            WAITING.lock().remove(&me);
        }
        slots.entries.insert(key, Slot::Creating(me));
        drop(slots);

        let result = creation.create(descriptor);

        let mut slots = self.slots.lock();
        match &result {
            Ok(Some(instance)) => {
                slots.created += 1;
                let order = slots.created;
                slots.entries.insert(
                    key,
                    Slot::Present {
                        descriptor: descriptor.clone(),
                        instance: instance.clone(),
                        order,
                        disposer: creation.disposer(),
                    },
                );
            }
            _ => {
                slots.entries.remove(&key);
            }
        }
        drop(slots);
        self.ready.notify_all();
        result
    }

    pub fn contains(&self, descriptor: &Descriptor) -> bool {
        matches!(
            self.slots.lock().entries.get(&descriptor.key()),
            Some(Slot::Present { .. })
        )
    }

    /// The published instance for `descriptor`, without creating it
    pub fn get(&self, descriptor: &Descriptor) -> Option<Instance> {
        match self.slots.lock().entries.get(&descriptor.key()) {
            Some(Slot::Present { instance, .. }) => Some(instance.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .entries
            .values()
            .filter(|s| matches!(s, Slot::Present { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose of the instance for `descriptor`, then remove it
    ///
    /// The slot stays claimed while pre-destroy runs, so lookups of the same
    /// descriptor wait for the removal instead of seeing a half-destroyed
    /// instance.
    pub fn destroy(&self, descriptor: &Descriptor) {
        self.retire(descriptor.key(), thread::current().id());
    }

    /// Dispose of everything, most recently created first
    pub fn clear(&self) {
        self.clear_as(thread::current().id());
    }

    /// `clear` on behalf of `me`, usable while `me` is tearing down
    pub(crate) fn clear_as(&self, me: ThreadId) {
        let mut present: Vec<(u64, DescriptorKey)> = self
            .slots
            .lock()
            .entries
            .iter()
            .filter_map(|(k, s)| match s {
                Slot::Present { order, .. } => Some((*order, *k)),
                Slot::Creating(_) => None,
            })
            .collect();
        present.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, key) in present {
            self.retire(key, me);
        }
    }

    /// Claim a present slot for `me`, dispose of its instance, then remove it
    fn retire(&self, key: DescriptorKey, me: ThreadId) {
        let claimed = {
            let mut slots = self.slots.lock();
            match slots.entries.get(&key) {
                Some(Slot::Present { .. }) => slots.entries.insert(key, Slot::Creating(me)),
                _ => None,
            }
        };
        if let Some(Slot::Present {
            descriptor,
            instance,
            disposer,
            ..
        }) = claimed
        {
            disposer.dispose(&descriptor, &instance);
            self.release(key, me);
        }
    }

    /// Drop the claim `me` holds on `key` and wake waiters
    fn release(&self, key: DescriptorKey, me: ThreadId) {
        {
            let mut slots = self.slots.lock();
            if matches!(slots.entries.get(&key), Some(Slot::Creating(owner)) if *owner == me) {
                slots.entries.remove(&key);
            }
        }
        self.ready.notify_all();
    }
}
