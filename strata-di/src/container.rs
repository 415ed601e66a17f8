//! The service locator
//!
//! A [`ServiceLocator`] owns a versioned descriptor registry, the contexts of
//! its scopes, and its listeners. Lookups see the locator's own descriptors
//! and those of its ancestors; each descriptor is always instantiated through
//! the locator that registered it.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use crate::builder::LocatorBuilder;
use crate::class::ClassModel;
use crate::config::LocatorConfig;
use crate::context::{Context, Creation, Dependents, ScopeRegistry};
use crate::descriptor::{validate_scope_name, Descriptor, DescriptorBuilder, LocatorId};
use crate::error::{DiError, DiResult};
use crate::filter::{Filter, ServiceFilter};
use crate::handle::ServiceHandle;
use crate::injectee::{Injectee, Injection};
use crate::iterable::IterableProvider;
use crate::lifecycle;
use crate::listener::{
    ChangeEvent, ChangeListener, ErrorInformation, ErrorKind, ErrorService, JustInTimeResolver, LifecycleEvent,
    LifecycleListener, LifecycleStage, Operation, Validator,
};
use crate::proxy::{Lazy, Proxy};
use crate::qualifier::Qualifier;
use crate::registry::{self, sort_ranked, QueryCache, Ranked, RegistryIndex};
use crate::resolver;
use crate::service::{downcast_instance, Instance, Service};
use crate::transaction::DynamicConfiguration;
use crate::types::{IntoTypeRef, TypeRef};

static NEXT_LOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Whether a locator still serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorState {
    Running,
    Shutdown,
}

#[derive(Default)]
pub(crate) struct Listeners {
    pub(crate) changes: Vec<(Arc<dyn Filter>, Arc<dyn ChangeListener>)>,
    pub(crate) lifecycle: Vec<(Arc<dyn Filter>, Arc<dyn LifecycleListener>)>,
    pub(crate) errors: Vec<Arc<dyn ErrorService>>,
    pub(crate) validators: Vec<Arc<dyn Validator>>,
    pub(crate) resolvers: Vec<Arc<dyn JustInTimeResolver>>,
}

pub(crate) struct LocatorInner {
    pub(crate) id: LocatorId,
    pub(crate) parent: Option<ServiceLocator>,
    pub(crate) config: LocatorConfig,
    pub(crate) registry: RegistryIndex,
    pub(crate) scopes: ScopeRegistry,
    pub(crate) listeners: RwLock<Listeners>,
    pub(crate) classes: RwLock<FxHashMap<String, Arc<ClassModel>>>,
    pub(crate) query_cache: QueryCache,
    pub(crate) state: RwLock<LocatorState>,
}

/// Thread-safe service locator
#[derive(Clone)]
pub struct ServiceLocator {
    pub(crate) inner: Arc<LocatorInner>,
}

/// Non-owning reference to a locator
#[derive(Clone)]
pub struct WeakLocator {
    inner: Weak<LocatorInner>,
}

impl WeakLocator {
    pub fn upgrade(&self) -> Option<ServiceLocator> {
        self.inner.upgrade().map(|inner| ServiceLocator { inner })
    }
}

impl Default for ServiceLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceLocator {
    /// Create a new root locator with the default configuration
    pub fn new() -> Self {
        Self::with_config(LocatorConfig::default())
    }

    pub fn with_config(config: LocatorConfig) -> Self {
        Self::create_locator(config, None)
    }

    pub fn builder() -> LocatorBuilder {
        LocatorBuilder::new()
    }

    pub(crate) fn create_locator(config: LocatorConfig, parent: Option<ServiceLocator>) -> Self {
        let id = NEXT_LOCATOR_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "creating locator {} ({}){}",
            config.name,
            id,
            parent
                .as_ref()
                .map(|p| format!(" under {}", p.name()))
                .unwrap_or_default()
        );
        Self {
            inner: Arc::new(LocatorInner {
                id,
                parent,
                config,
                registry: RegistryIndex::new(),
                scopes: ScopeRegistry::with_builtins(),
                listeners: RwLock::new(Listeners::default()),
                classes: RwLock::new(FxHashMap::default()),
                query_cache: QueryCache::default(),
                state: RwLock::new(LocatorState::Running),
            }),
        }
    }

    /// Create a child locator; it inherits this locator's configuration
    pub fn create_child(&self, name: impl Into<String>) -> Self {
        let config = LocatorConfig {
            name: name.into(),
            ..self.inner.config.clone()
        };
        Self::create_locator(config, Some(self.clone()))
    }

    pub fn child_with_config(&self, config: LocatorConfig) -> Self {
        Self::create_locator(config, Some(self.clone()))
    }

    pub fn downgrade(&self) -> WeakLocator {
        WeakLocator {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Process-unique locator id
    pub fn id(&self) -> LocatorId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn parent(&self) -> Option<&ServiceLocator> {
        self.inner.parent.as_ref()
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LocatorState {
        *self.inner.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LocatorState::Running
    }

    /// Number of commits applied to this locator's registry
    pub fn generation(&self) -> u64 {
        self.inner.registry.current().generation()
    }

    pub(crate) fn ensure_running(&self) -> DiResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(DiError::Shutdown {
                locator: self.name().to_string(),
            })
        }
    }

    // Configuration

    /// Start a new configuration transaction
    pub fn configuration(&self) -> DynamicConfiguration {
        DynamicConfiguration::new(self.clone())
    }

    /// Bind one descriptor in its own transaction
    pub fn bind(&self, builder: DescriptorBuilder) -> DiResult<Arc<Descriptor>> {
        let mut config = self.configuration();
        let descriptor = config.bind(builder);
        config.commit()?;
        Ok(descriptor)
    }

    /// Unbind everything matching `filter` in its own transaction
    pub fn unbind(&self, filter: impl Filter + 'static) -> DiResult<()> {
        let mut config = self.configuration();
        config.unbind(filter);
        config.commit()
    }

    // Queries

    /// Matching descriptors visible from this locator, best first
    pub fn descriptors(&self, filter: &dyn Filter) -> DiResult<Vec<Arc<Descriptor>>> {
        self.query(filter, None)
    }

    pub fn best_descriptor(&self, filter: &dyn Filter) -> DiResult<Option<Arc<Descriptor>>> {
        Ok(self.query(filter, None)?.into_iter().next())
    }

    pub(crate) fn query(&self, filter: &dyn Filter, injectee: Option<&Injectee>) -> DiResult<Vec<Arc<Descriptor>>> {
        filter.validate()?;
        self.ensure_running()?;

        let mut ranked = match filter.cache_key() {
            Some(key) => {
                let epoch = registry::epoch();
                match self.inner.query_cache.get(&key, epoch) {
                    Some(hit) => hit,
                    None => {
                        let found = self.collect(filter);
                        self.inner.query_cache.put(key, epoch, found.clone());
                        found
                    }
                }
            }
            None => self.collect(filter),
        };
        sort_ranked(&mut ranked);

        let validators = self.inner.listeners.read().validators.clone();
        Ok(ranked
            .into_iter()
            .map(|(descriptor, _)| descriptor)
            .filter(|d| validators.iter().all(|v| v.validate(Operation::Lookup, d, injectee)))
            .collect())
    }

    fn collect(&self, filter: &dyn Filter) -> Vec<Ranked> {
        let mut found = Vec::new();
        let mut current = Some(self);
        let mut depth = 0;
        while let Some(locator) = current {
            let snapshot = locator.inner.registry.current();
            for descriptor in snapshot.find(filter) {
                if depth > 0 && descriptor.is_local() {
                    continue;
                }
                found.push((descriptor, depth));
            }
            current = locator.inner.parent.as_ref();
            depth += 1;
        }
        found
    }

    // Lookups

    fn lookup_injectee(&self, contract: impl IntoTypeRef, qualifiers: &[Qualifier]) -> DiResult<Injectee> {
        let injectee = Injectee::lookup(contract.into_type_ref()?, qualifiers.to_vec());
        if injectee.required().request_issues().is_some() {
            return Err(DiError::InvalidGenericRequest {
                required: injectee.required().to_string(),
                injectee: injectee.to_string(),
            });
        }
        Ok(injectee)
    }

    fn injection_for(&self, descriptor: &Arc<Descriptor>, injectee: &Injectee) -> DiResult<Injection> {
        if self.should_proxy(descriptor, injectee)? {
            return Ok(Injection::Proxy(Proxy::new(self, descriptor.clone())));
        }
        Ok(match self.instance_for(descriptor, None)? {
            Some(instance) => Injection::Instance(instance),
            None => Injection::Absent,
        })
    }

    /// The best service for `contract`
    pub fn get_service<T: Service>(&self, contract: impl IntoTypeRef) -> DiResult<Arc<T>> {
        self.get_qualified_service(contract, &[])
    }

    pub fn get_named_service<T: Service>(&self, contract: impl IntoTypeRef, name: &str) -> DiResult<Arc<T>> {
        self.get_qualified_service(contract, &[Qualifier::named(name)])
    }

    pub fn get_qualified_service<T: Service>(
        &self,
        contract: impl IntoTypeRef,
        qualifiers: &[Qualifier],
    ) -> DiResult<Arc<T>> {
        let injectee = self.lookup_injectee(contract, qualifiers)?;
        let best = resolver::best_candidate(self, &injectee)?.ok_or_else(|| injectee.unsatisfied())?;
        self.injection_for(&best, &injectee)?
            .optional::<T>()?
            .ok_or_else(|| DiError::InvalidArgument(format!("{} produced no instance", best)))
    }

    /// Like [`get_service`](Self::get_service), but `None` when nothing
    /// matches or the match produced nothing
    pub fn try_get_service<T: Service>(&self, contract: impl IntoTypeRef) -> DiResult<Option<Arc<T>>> {
        self.try_get_qualified_service(contract, &[])
    }

    pub fn try_get_qualified_service<T: Service>(
        &self,
        contract: impl IntoTypeRef,
        qualifiers: &[Qualifier],
    ) -> DiResult<Option<Arc<T>>> {
        let injectee = self.lookup_injectee(contract, qualifiers)?;
        match resolver::best_candidate(self, &injectee)? {
            Some(best) => self.injection_for(&best, &injectee)?.optional::<T>(),
            None => Ok(None),
        }
    }

    /// Deferred reference; proxiable services stay unrealized until used
    pub fn get_lazy<T: Service>(&self, contract: impl IntoTypeRef) -> DiResult<Lazy<T>> {
        let injectee = self.lookup_injectee(contract, &[])?;
        let best = resolver::best_candidate(self, &injectee)?.ok_or_else(|| injectee.unsatisfied())?;
        self.injection_for(&best, &injectee)?.lazy::<T>()
    }

    /// Every service for `contract`, best first; null products are skipped
    pub fn get_all_services<T: Service>(&self, contract: impl IntoTypeRef) -> DiResult<Vec<Arc<T>>> {
        self.get_all_instances(&ServiceFilter::contract(contract))?
            .into_iter()
            .map(downcast_instance)
            .collect()
    }

    pub fn get_all_instances(&self, filter: &dyn Filter) -> DiResult<Vec<Instance>> {
        let mut instances = Vec::new();
        for descriptor in self.query(filter, None)? {
            if let Some(instance) = self.instance_for(&descriptor, None)? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    /// Handle to the best service for `contract`
    pub fn get_service_handle(
        &self,
        contract: impl IntoTypeRef,
        qualifiers: &[Qualifier],
    ) -> DiResult<Option<ServiceHandle>> {
        let injectee = self.lookup_injectee(contract, qualifiers)?;
        Ok(resolver::best_candidate(self, &injectee)?.map(|best| ServiceHandle::new(self, best)))
    }

    pub fn get_all_service_handles(&self, filter: &dyn Filter) -> DiResult<Vec<ServiceHandle>> {
        Ok(self
            .query(filter, None)?
            .into_iter()
            .map(|descriptor| ServiceHandle::new(self, descriptor))
            .collect())
    }

    pub fn handle_for(&self, descriptor: &Arc<Descriptor>) -> ServiceHandle {
        ServiceHandle::new(self, descriptor.clone())
    }

    /// Instance of a specific descriptor, created through its context
    pub fn service_for_descriptor(&self, descriptor: &Arc<Descriptor>) -> DiResult<Option<Instance>> {
        self.instance_for(descriptor, None)
    }

    pub fn iterable_provider(&self, contract: impl IntoTypeRef) -> DiResult<IterableProvider> {
        let injectee = self.lookup_injectee(contract, &[])?;
        Ok(IterableProvider::new(self, injectee))
    }

    // Dispatch

    fn owner_of(&self, descriptor: &Descriptor) -> DiResult<ServiceLocator> {
        let mut current = Some(self);
        while let Some(locator) = current {
            if locator.id() == descriptor.locator_id() {
                return Ok(locator.clone());
            }
            current = locator.inner.parent.as_ref();
        }
        Err(DiError::InvalidArgument(format!(
            "{} is not visible from locator {}",
            descriptor,
            self.name()
        )))
    }

    pub(crate) fn context_for(&self, descriptor: &Descriptor) -> DiResult<Arc<dyn Context>> {
        self.owner_of(descriptor)?.inner.scopes.get(descriptor.scope())
    }

    /// Obtain an instance through the context of the descriptor's own locator
    pub(crate) fn instance_for(
        &self,
        descriptor: &Arc<Descriptor>,
        root: Option<&Dependents>,
    ) -> DiResult<Option<Instance>> {
        self.ensure_running()?;
        let owner = self.owner_of(descriptor)?;
        let context = owner.inner.scopes.get(descriptor.scope())?;
        if !context.is_active() {
            return Err(DiError::ContextNotActive {
                scope: descriptor.scope().to_string(),
            });
        }
        let instance = context.find_or_create(descriptor, &Creation::new(&owner, root))?;
        if instance.is_none() && !context.supports_null_creation() {
            return Err(DiError::NullNotSupported {
                descriptor: descriptor.to_string(),
                scope: descriptor.scope().to_string(),
            });
        }
        Ok(instance)
    }

    pub(crate) fn is_proxiable(&self, descriptor: &Descriptor) -> bool {
        descriptor.proxiable().unwrap_or_else(|| {
            self.context_for(descriptor)
                .map(|context| context.proxies_by_default())
                .unwrap_or(false)
        })
    }

    /// Whether `injectee` gets a proxy instead of the instance itself
    pub(crate) fn should_proxy(&self, descriptor: &Arc<Descriptor>, injectee: &Injectee) -> DiResult<bool> {
        if !self.is_proxiable(descriptor) {
            return Ok(false);
        }
        if !descriptor.proxy_for_same_scope() {
            let owner = injectee.owner().and_then(|o| o.descriptor());
            if owner.is_some_and(|o| o.scope() == descriptor.scope()) {
                return Ok(false);
            }
        }
        // Surface not-proxiable classes now rather than at first use
        if descriptor.class_model().is_some() {
            lifecycle::reified(&self.owner_of(descriptor)?, descriptor)?;
        }
        Ok(true)
    }

    // Contexts

    /// Register a context, replacing (and shutting down) any context of the
    /// same scope; eager contexts realize their descriptors right away
    pub fn add_context(&self, context: Arc<dyn Context>) -> DiResult<()> {
        self.ensure_running()?;
        validate_scope_name(context.scope()).map_err(DiError::InvalidArgument)?;
        if let Some(previous) = self.inner.scopes.insert(context.clone()) {
            debug!("replacing context for scope {} in {}", context.scope(), self.name());
            previous.shutdown();
        }
        if context.is_eager() && context.is_active() {
            self.realize_scope(context.scope());
        }
        Ok(())
    }

    pub fn remove_context(&self, scope: &str) -> Option<Arc<dyn Context>> {
        let removed = self.inner.scopes.remove(scope)?;
        debug!("removing context for scope {} from {}", scope, self.name());
        removed.shutdown();
        Some(removed)
    }

    pub fn context(&self, scope: &str) -> DiResult<Arc<dyn Context>> {
        self.inner.scopes.get(scope)
    }

    pub(crate) fn realize_scope(&self, scope: &str) {
        let snapshot = self.inner.registry.current();
        for descriptor in snapshot.descriptors().iter().filter(|d| d.scope() == scope) {
            if let Err(e) = self.instance_for(descriptor, None) {
                warn!("failed to realize {} eagerly: {}", descriptor, e);
            }
        }
    }

    // Listeners

    pub fn add_change_listener(&self, filter: impl Filter + 'static, listener: impl ChangeListener + 'static) {
        self.inner
            .listeners
            .write()
            .changes
            .push((Arc::new(filter), Arc::new(listener)));
    }

    pub fn add_lifecycle_listener(
        &self,
        filter: impl Filter + 'static,
        listener: impl LifecycleListener + 'static,
    ) {
        self.inner
            .listeners
            .write()
            .lifecycle
            .push((Arc::new(filter), Arc::new(listener)));
    }

    pub fn add_error_service(&self, service: impl ErrorService + 'static) {
        self.inner.listeners.write().errors.push(Arc::new(service));
    }

    pub fn add_validator(&self, validator: impl Validator + 'static) {
        self.inner.listeners.write().validators.push(Arc::new(validator));
    }

    pub fn add_jit_resolver(&self, resolver: impl JustInTimeResolver + 'static) {
        self.inner.listeners.write().resolvers.push(Arc::new(resolver));
    }

    pub(crate) fn validators(&self) -> Vec<Arc<dyn Validator>> {
        self.inner.listeners.read().validators.clone()
    }

    pub(crate) fn notify_lifecycle(
        &self,
        stage: LifecycleStage,
        descriptor: &Arc<Descriptor>,
        instance: Option<&Instance>,
    ) {
        let listeners = self.inner.listeners.read().lifecycle.clone();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.inner.registry.current();
        let event = LifecycleEvent {
            stage,
            descriptor,
            instance,
        };
        for (filter, listener) in listeners {
            if filter.matches(descriptor, snapshot.types()) {
                listener.lifecycle_event(&event);
            }
        }
    }

    pub(crate) fn notify_changes(&self, event: &ChangeEvent) {
        let listeners = self.inner.listeners.read().changes.clone();
        let snapshot = self.inner.registry.current();
        for (filter, listener) in listeners {
            let relevant = ChangeEvent {
                generation: event.generation,
                added: event
                    .added
                    .iter()
                    .filter(|d| filter.matches(d, snapshot.types()))
                    .cloned()
                    .collect(),
                removed: event
                    .removed
                    .iter()
                    .filter(|d| filter.matches(d, snapshot.types()))
                    .cloned()
                    .collect(),
            };
            if !relevant.is_empty() {
                listener.configuration_changed(&relevant);
            }
        }
    }

    /// Hand a failure to every registered error service
    pub(crate) fn report(&self, kind: ErrorKind, descriptor: Option<&Arc<Descriptor>>, error: &DiError) {
        let services = self.inner.listeners.read().errors.clone();
        if services.is_empty() {
            return;
        }
        let info = ErrorInformation {
            kind,
            descriptor: descriptor.cloned(),
            error: error.clone(),
        };
        for service in services {
            service.on_failure(&info);
        }
    }

    /// Ask just-in-time resolvers to bind something for `injectee`
    pub(crate) fn run_jit_resolvers(&self, injectee: &Injectee) -> DiResult<bool> {
        let resolvers = self.inner.listeners.read().resolvers.clone();
        for resolver in resolvers {
            if resolver.resolve(self, injectee)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // Greedy resolution

    /// Make a class model available for greedy resolution
    pub fn register_class(&self, model: &Arc<ClassModel>) {
        trace!("registering class {} with {}", model.name(), self.name());
        self.inner
            .classes
            .write()
            .insert(model.name().to_string(), model.clone());
    }

    pub(crate) fn bind_greedy(&self, required: &TypeRef) -> DiResult<bool> {
        let model = self.inner.classes.read().get(&required.raw_name()).cloned();
        let Some(model) = model.filter(|m| m.is_instantiable()) else {
            return Ok(false);
        };
        match self.bind(DescriptorBuilder::class(&model)) {
            Ok(_) => Ok(true),
            // Another thread bound it first
            Err(e) if e.any(|e| matches!(e, DiError::AmbiguousBinding { .. })) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Analyze a descriptor without creating an instance
    pub fn reify(&self, descriptor: &Arc<Descriptor>) -> DiResult<()> {
        lifecycle::reified(&self.owner_of(descriptor)?, descriptor).map(|_| ())
    }

    // Unmanaged instances

    /// Construct an instance of an unmanaged class (constructor injection only)
    pub fn create<T: Service>(&self, model: &ClassModel) -> DiResult<T> {
        self.ensure_running()?;
        let object = lifecycle::create_unmanaged(self, model)?;
        object.downcast::<T>().map(|boxed| *boxed).map_err(|_| DiError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual: model.name().to_string(),
        })
    }

    /// Field and method injection into an existing value
    pub fn inject<T: Service>(&self, target: &mut T, model: &ClassModel) -> DiResult<()> {
        self.ensure_running()?;
        lifecycle::inject_unmanaged(self, target as &mut dyn Any, model)
    }

    pub fn post_construct<T: Service>(&self, target: &mut T, model: &ClassModel) -> DiResult<()> {
        lifecycle::post_construct_unmanaged(target as &mut dyn Any, model)
    }

    pub fn pre_destroy<T: Service>(&self, target: &T, model: &ClassModel) -> DiResult<()> {
        lifecycle::pre_destroy_unmanaged(target as &dyn Any, model)
    }

    /// Construct, inject and run the post-construct hook
    pub fn create_and_initialize<T: Service>(&self, model: &ClassModel) -> DiResult<T> {
        let mut value = self.create::<T>(model)?;
        self.inject(&mut value, model)?;
        self.post_construct(&mut value, model)?;
        Ok(value)
    }

    /// Destroy every context and refuse further requests
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.write();
            if *state == LocatorState::Shutdown {
                return;
            }
            *state = LocatorState::Shutdown;
        }
        debug!("shutting down locator {} ({})", self.name(), self.id());
        for context in self.inner.scopes.all() {
            context.shutdown();
        }
        self.inner.query_cache.clear();
    }
}

impl fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("parent", &self.parent().map(|p| p.name().to_string()))
            .finish()
    }
}
