//! Dynamic configuration transactions
//!
//! Binds, unbinds and idempotent filters are staged on a
//! [`DynamicConfiguration`] and applied by [`commit`](DynamicConfiguration::commit)
//! all together or not at all. Readers see either the registry before the
//! commit or after it, never a mix.

use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::DuplicatePolicy;
use crate::container::ServiceLocator;
use crate::descriptor::{Descriptor, DescriptorBuilder, DescriptorKey, Production};
use crate::error::{DiError, DiResult, MultiError};
use crate::filter::Filter;
use crate::listener::{ChangeEvent, ErrorKind, Operation};
use crate::provider::{Factory, FactoryProduct, FACTORY};
use crate::registry::Snapshot;
use crate::types::TypeRef;

/// A staged set of registry changes
pub struct DynamicConfiguration {
    locator: ServiceLocator,
    binds: Vec<Arc<Descriptor>>,
    unbinds: Vec<Arc<dyn Filter>>,
    idempotent: Vec<Arc<dyn Filter>>,
    declared: Vec<(String, Vec<String>)>,
}

impl DynamicConfiguration {
    pub(crate) fn new(locator: ServiceLocator) -> Self {
        Self {
            locator,
            binds: Vec::new(),
            unbinds: Vec::new(),
            idempotent: Vec::new(),
            declared: Vec::new(),
        }
    }

    pub fn locator(&self) -> &ServiceLocator {
        &self.locator
    }

    /// Stage a descriptor; its service id is assigned now
    pub fn bind(&mut self, builder: DescriptorBuilder) -> Arc<Descriptor> {
        let inner = &self.locator.inner;
        let descriptor = Arc::new(builder.build(inner.id, inner.registry.next_service_id()));
        trace!("staging bind of {}", descriptor);
        self.binds.push(descriptor.clone());
        descriptor
    }

    /// Stage a factory and its product
    ///
    /// The factory descriptor also advertises `Factory<Product>`; the product
    /// is produced by calling `F::provide` on the factory instance.
    pub fn bind_factory<F: Factory>(
        &mut self,
        factory: DescriptorBuilder,
        mut product: DescriptorBuilder,
    ) -> (Arc<Descriptor>, Arc<Descriptor>) {
        let contract = TypeRef::parameterized(FACTORY, vec![TypeRef::class(product.implementation())]);
        let factory = self.bind(factory.to(contract));
        let mut link = FactoryProduct::unbound();
        link.bind::<F>(factory.clone());
        *product.production_mut() = Production::Factory(link);
        let product = self.bind(product);
        (factory, product)
    }

    /// Stage removal of every own descriptor matching `filter`
    pub fn unbind(&mut self, filter: impl Filter + 'static) {
        self.unbinds.push(Arc::new(filter));
    }

    pub fn unbind_descriptor(&mut self, descriptor: &Descriptor) {
        let key = descriptor.key();
        self.unbind(move |d: &Descriptor| d.key() == key);
    }

    /// The commit fails if `filter` matches anything already registered
    pub fn add_idempotent_filter(&mut self, filter: impl Filter + 'static) {
        self.idempotent.push(Arc::new(filter));
    }

    /// Record subtype relations for types without a bound class model
    pub fn declare_type(&mut self, sub: &str, supers: &[&str]) {
        self.declared
            .push((sub.to_string(), supers.iter().map(|s| s.to_string()).collect()));
    }

    pub fn staged_binds(&self) -> &[Arc<Descriptor>] {
        &self.binds
    }

    /// Validate and apply every staged change atomically
    pub fn commit(self) -> DiResult<()> {
        let locator = self.locator.clone();
        locator.ensure_running()?;
        let inner = &locator.inner;
        let config = &inner.config;

        let guard = inner.registry.lock_commit();
        let current = inner.registry.current();
        let mut errors = MultiError::new();

        // Removals, plus the products of removed factories
        let mut removed: Vec<Arc<Descriptor>> = Vec::new();
        let mut removed_keys: FxHashSet<DescriptorKey> = FxHashSet::default();
        for filter in &self.unbinds {
            if let Err(e) = filter.validate() {
                errors.push(e);
                continue;
            }
            for descriptor in current.find(filter.as_ref()) {
                if removed_keys.insert(descriptor.key()) {
                    removed.push(descriptor);
                }
            }
        }
        loop {
            let orphans: Vec<Arc<Descriptor>> = current
                .descriptors()
                .iter()
                .filter(|d| !removed_keys.contains(&d.key()))
                .filter(|d| d.factory().is_some_and(|f| removed_keys.contains(&f.key())))
                .cloned()
                .collect();
            if orphans.is_empty() {
                break;
            }
            for orphan in orphans {
                removed_keys.insert(orphan.key());
                removed.push(orphan);
            }
        }

        // Binds
        let staged_keys: FxHashSet<DescriptorKey> = self.binds.iter().map(|d| d.key()).collect();
        let mut added: Vec<Arc<Descriptor>> = Vec::new();
        for descriptor in self.binds {
            let issues = descriptor.shape_issues();
            let shaped = issues.is_empty();
            for issue in issues {
                errors.push(DiError::InvalidArgument(format!("{}: {}", descriptor, issue)));
            }
            if config.validate_scopes && !inner.scopes.contains(descriptor.scope()) {
                errors.push(DiError::NoSuchContext {
                    scope: descriptor.scope().to_string(),
                });
            }
            if let Some(factory) = descriptor.factory() {
                let known = staged_keys.contains(&factory.key())
                    || (factory.locator_id() == inner.id
                        && current.contains(factory.service_id())
                        && !removed_keys.contains(&factory.key()));
                if !known {
                    errors.push(DiError::InvalidArgument(format!(
                        "{}: factory {} is not bound",
                        descriptor, factory
                    )));
                }
            }
            if !shaped {
                continue;
            }

            let duplicate = current
                .descriptors()
                .iter()
                .filter(|d| !removed_keys.contains(&d.key()))
                .chain(added.iter())
                .find(|d| d.same_binding(&descriptor))
                .cloned();
            match (config.duplicate_policy, duplicate) {
                (DuplicatePolicy::Reject, Some(existing)) => errors.push(DiError::AmbiguousBinding {
                    descriptor: descriptor.to_string(),
                    reason: format!("duplicates {}", existing),
                }),
                (DuplicatePolicy::Ignore, Some(existing)) => {
                    trace!("ignoring {}, already bound as {}", descriptor, existing);
                }
                _ => added.push(descriptor),
            }
        }

        for filter in &self.idempotent {
            if let Err(e) = filter.validate() {
                errors.push(e);
                continue;
            }
            if let Some(hit) = current.find(filter.as_ref()).into_iter().next() {
                errors.push(DiError::AmbiguousBinding {
                    descriptor: hit.to_string(),
                    reason: "an idempotent filter matched an existing descriptor".to_string(),
                });
            }
        }

        let validators = locator.validators();
        for (operation, descriptors) in [(Operation::Bind, &added), (Operation::Unbind, &removed)] {
            for descriptor in descriptors.iter() {
                if !validators.iter().all(|v| v.validate(operation, descriptor, None)) {
                    errors.push(DiError::ValidationRejected {
                        operation: operation.to_string(),
                        descriptor: descriptor.to_string(),
                    });
                }
            }
        }

        if let Err(error) = errors.into_result(()) {
            drop(guard);
            warn!("commit to {} rejected: {}", locator.name(), error);
            locator.report(ErrorKind::DynamicConfiguration, None, &error);
            return Err(error);
        }

        let remaining: Vec<Arc<Descriptor>> = current
            .descriptors()
            .iter()
            .filter(|d| !removed_keys.contains(&d.key()))
            .cloned()
            .chain(added.iter().cloned())
            .collect();
        let mut declared = current.declared().clone();
        for (sub, supers) in self.declared {
            declared.declare(&sub, supers);
        }
        let generation = current.generation() + 1;
        inner.registry.install(Snapshot::build(generation, remaining, declared));
        drop(guard);
        debug!(
            "locator {} committed generation {}: {} added, {} removed",
            locator.name(),
            generation,
            added.len(),
            removed.len()
        );

        if config.dispose_on_unbind {
            for descriptor in &removed {
                if let Ok(context) = locator.context_for(descriptor) {
                    context.destroy_one(descriptor);
                }
            }
        }

        for descriptor in &added {
            let eager = locator
                .context_for(descriptor)
                .is_ok_and(|context| context.is_eager() && context.is_active());
            if eager {
                if let Err(e) = locator.service_for_descriptor(descriptor) {
                    warn!("failed to realize {} eagerly: {}", descriptor, e);
                }
            }
        }

        locator.notify_changes(&ChangeEvent {
            generation,
            added,
            removed,
        });
        Ok(())
    }
}

impl fmt::Debug for DynamicConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicConfiguration")
            .field("locator", &self.locator.name())
            .field("binds", &self.binds.len())
            .field("unbinds", &self.unbinds.len())
            .field("idempotent", &self.idempotent.len())
            .finish()
    }
}
