//! Descriptor registry index
//!
//! The registry publishes immutable [`Snapshot`]s. Readers clone the current
//! `Arc<Snapshot>` and never block a commit; a commit builds the next snapshot
//! under the commit lock and swaps it in one step, so no reader can observe a
//! partially applied transaction.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::descriptor::{Descriptor, ServiceId};
use crate::filter::Filter;
use crate::types::TypeHierarchy;

/// Bumped by every commit in any locator; keys the query caches
static EPOCH: AtomicU64 = AtomicU64::new(0);

pub(crate) fn epoch() -> u64 {
    EPOCH.load(Ordering::Acquire)
}

pub(crate) fn bump_epoch() {
    EPOCH.fetch_add(1, Ordering::AcqRel);
}

/// A descriptor together with the distance of its locator from the querying one
pub(crate) type Ranked = (Arc<Descriptor>, usize);

/// Sort by rank (descending), locator depth, then service id
pub(crate) fn sort_ranked(candidates: &mut [Ranked]) {
    candidates.sort_by(|(a, da), (b, db)| compare(a, *da, b, *db));
}

fn compare(a: &Descriptor, da: usize, b: &Descriptor, db: usize) -> CmpOrdering {
    b.rank()
        .cmp(&a.rank())
        .then(da.cmp(&db))
        .then(a.service_id().cmp(&b.service_id()))
}

/// One committed registry state
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    generation: u64,
    descriptors: Vec<Arc<Descriptor>>,
    by_contract: FxHashMap<String, Vec<usize>>,
    by_name: FxHashMap<String, Vec<usize>>,
    declared: TypeHierarchy,
    types: TypeHierarchy,
}

impl Snapshot {
    pub(crate) fn build(generation: u64, descriptors: Vec<Arc<Descriptor>>, declared: TypeHierarchy) -> Self {
        let mut by_contract: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        let mut by_name: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        let mut types = declared.clone();

        for (index, descriptor) in descriptors.iter().enumerate() {
            let mut raw_contracts: Vec<String> = descriptor.contracts().iter().map(|c| c.raw_name()).collect();
            raw_contracts.dedup();
            for raw in &raw_contracts {
                let entry = by_contract.entry(raw.clone()).or_default();
                if entry.last() != Some(&index) {
                    entry.push(index);
                }
            }
            if let Some(name) = descriptor.name() {
                by_name.entry(name.to_string()).or_default().push(index);
            }

            let implementation = descriptor.implementation_name();
            types.declare(
                implementation,
                raw_contracts.into_iter().filter(|c| c != implementation),
            );
            if let Some(model) = descriptor.class_model() {
                for class in model.chain() {
                    types.declare(class.name(), class.direct_supertypes());
                }
            }
        }

        Self {
            generation,
            descriptors,
            by_contract,
            by_name,
            declared,
            types,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Descriptors in insertion order
    pub(crate) fn descriptors(&self) -> &[Arc<Descriptor>] {
        &self.descriptors
    }

    pub(crate) fn types(&self) -> &TypeHierarchy {
        &self.types
    }

    pub(crate) fn declared(&self) -> &TypeHierarchy {
        &self.declared
    }

    pub(crate) fn contains(&self, id: ServiceId) -> bool {
        self.descriptors.iter().any(|d| d.service_id() == id)
    }

    /// Matching descriptors in insertion order, narrowed by the filter's index hints
    pub(crate) fn find(&self, filter: &dyn Filter) -> Vec<Arc<Descriptor>> {
        let by_contract = filter
            .advertised_contract()
            .map(|c| self.by_contract.get(&c).map(Vec::as_slice).unwrap_or(&[]));
        let by_name = filter
            .name()
            .map(|n| self.by_name.get(n).map(Vec::as_slice).unwrap_or(&[]));

        let indices: Box<dyn Iterator<Item = usize> + '_> = match (by_contract, by_name) {
            (Some(c), Some(n)) if n.len() < c.len() => Box::new(n.iter().copied()),
            (Some(c), _) => Box::new(c.iter().copied()),
            (None, Some(n)) => Box::new(n.iter().copied()),
            (None, None) => Box::new(0..self.descriptors.len()),
        };

        indices
            .map(|i| &self.descriptors[i])
            .filter(|d| filter.matches(d, &self.types))
            .cloned()
            .collect()
    }
}

/// Versioned descriptor index of one locator
pub(crate) struct RegistryIndex {
    snapshot: RwLock<Arc<Snapshot>>,
    commit_lock: Mutex<()>,
    next_service_id: AtomicU64,
}

impl RegistryIndex {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            commit_lock: Mutex::new(()),
            next_service_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    pub(crate) fn next_service_id(&self) -> ServiceId {
        self.next_service_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Serializes commits; readers are never blocked by it
    pub(crate) fn lock_commit(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Publish a new snapshot; the caller holds the commit lock
    pub(crate) fn install(&self, snapshot: Snapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
        bump_epoch();
    }
}

/// Unsorted query results, valid for one epoch
#[derive(Default)]
pub(crate) struct QueryCache {
    entries: DashMap<String, (u64, Vec<Ranked>)>,
}

impl QueryCache {
    pub(crate) fn get(&self, key: &str, epoch: u64) -> Option<Vec<Ranked>> {
        let entry = self.entries.get(key)?;
        let (cached_epoch, values) = entry.value();
        (*cached_epoch == epoch).then(|| values.clone())
    }

    pub(crate) fn put(&self, key: String, epoch: u64, values: Vec<Ranked>) {
        self.entries.insert(key, (epoch, values));
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}
