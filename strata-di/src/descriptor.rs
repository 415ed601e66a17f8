//! Service descriptors
//!
//! A [`Descriptor`] is the registry's record of one injectable unit. It is
//! built from a [`DescriptorBuilder`] inside a dynamic configuration and is
//! immutable once committed, except for its rank.

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::class::{ClassKind, ClassModel};
use crate::context::{PER_LOOKUP, SINGLETON};
use crate::error::DiError;
use crate::lifecycle::Reified;
use crate::provider::FactoryProduct;
use crate::qualifier::{Qualifier, NAMED};
use crate::service::{Instance, Service};
use crate::types::{IntoTypeRef, TypeRef};

/// Monotonically assigned per locator
pub type ServiceId = u64;

/// Process-unique locator identity
pub type LocatorId = u64;

/// Globally unique descriptor identity
pub type DescriptorKey = (LocatorId, ServiceId);

/// Whether child locators can see a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Normal,
    /// Only visible to lookups on the owning locator
    Local,
}

/// How a descriptor produces its instance
pub(crate) enum Production {
    Class(Arc<ClassModel>),
    Constant(Instance),
    Factory(FactoryProduct),
}

impl Production {
    fn kind_name(&self) -> &'static str {
        match self {
            Production::Class(_) => "class",
            Production::Constant(_) => "constant",
            Production::Factory(_) => "factory product",
        }
    }
}

/// Staged description of a service, turned into a [`Descriptor`] on bind
pub struct DescriptorBuilder {
    implementation: Arc<str>,
    production: Production,
    contracts: Vec<TypeRef>,
    scope: Option<Arc<str>>,
    name: Option<Arc<str>>,
    qualifiers: Vec<Qualifier>,
    rank: i32,
    metadata: BTreeMap<String, Vec<String>>,
    proxiable: Option<bool>,
    proxy_for_same_scope: Option<bool>,
    visibility: Visibility,
    issues: Vec<String>,
}

impl DescriptorBuilder {
    fn with_production(implementation: Arc<str>, production: Production) -> Self {
        Self {
            contracts: vec![TypeRef::class(implementation.clone())],
            implementation,
            production,
            scope: None,
            name: None,
            qualifiers: Vec::new(),
            rank: 0,
            metadata: BTreeMap::new(),
            proxiable: None,
            proxy_for_same_scope: None,
            visibility: Visibility::Normal,
            issues: Vec::new(),
        }
    }

    /// A service built from a class model; the implementation and its
    /// declared interfaces are contracts
    pub fn class(model: &Arc<ClassModel>) -> Self {
        let mut builder = Self::with_production(model.name.clone(), Production::Class(model.clone()));
        builder.scope = model.default_scope.clone();
        for interface in &model.interfaces {
            if !builder.contracts.contains(interface) {
                builder.contracts.push(interface.clone());
            }
        }
        builder
    }

    /// A pre-built instance bound in singleton scope
    pub fn constant<T: Service>(implementation: impl Into<Arc<str>>, value: T) -> Self {
        Self::constant_instance(implementation, Arc::new(value))
    }

    pub fn constant_instance(implementation: impl Into<Arc<str>>, instance: Instance) -> Self {
        let mut builder = Self::with_production(implementation.into(), Production::Constant(instance));
        builder.scope = Some(SINGLETON.into());
        builder
    }

    /// A product of a factory; completed by `DynamicConfiguration::bind_factory`
    pub fn product(implementation: impl Into<Arc<str>>) -> Self {
        let mut builder = Self::with_production(implementation.into(), Production::Factory(FactoryProduct::unbound()));
        builder.scope = Some(PER_LOOKUP.into());
        builder
    }

    /// Advertise an additional contract
    pub fn to(mut self, contract: impl IntoTypeRef) -> Self {
        match contract.into_type_ref() {
            Ok(ty) => {
                if !self.contracts.contains(&ty) {
                    self.contracts.push(ty);
                }
            }
            Err(e) => self.issues.push(e.to_string()),
        }
        self
    }

    /// Give the descriptor a name, which also adds the `Named` qualifier
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn qualified_by(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn in_scope(mut self, scope: impl Into<Arc<str>>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Force lookups to receive (or never receive) a lazy proxy
    pub fn proxy(mut self, proxiable: bool) -> Self {
        self.proxiable = Some(proxiable);
        self
    }

    /// Whether injection points in the same scope also receive the proxy
    pub fn proxy_for_same_scope(mut self, enabled: bool) -> Self {
        self.proxy_for_same_scope = Some(enabled);
        self
    }

    /// Hide the descriptor from child locators
    pub fn local(mut self) -> Self {
        self.visibility = Visibility::Local;
        self
    }

    pub(crate) fn implementation(&self) -> &str {
        &self.implementation
    }

    pub(crate) fn production_mut(&mut self) -> &mut Production {
        &mut self.production
    }

    pub(crate) fn build(self, locator_id: LocatorId, service_id: ServiceId) -> Descriptor {
        let type_params = match &self.production {
            Production::Class(model) => model.type_params.clone(),
            _ => Vec::new(),
        };
        let contracts = self
            .contracts
            .iter()
            .map(|c| if type_params.is_empty() { c.clone() } else { c.bind_variables(&type_params) })
            .collect();
        let mut qualifiers = self.qualifiers;
        if let Some(name) = &self.name {
            let named = Qualifier::named(name.to_string());
            if !qualifiers.contains(&named) {
                qualifiers.push(named);
            }
        }
        Descriptor {
            locator_id,
            service_id,
            implementation: self.implementation,
            contracts,
            scope: self.scope.unwrap_or_else(|| SINGLETON.into()),
            name: self.name,
            qualifiers,
            rank: AtomicI32::new(self.rank),
            metadata: self.metadata,
            proxiable: self.proxiable,
            proxy_for_same_scope: self.proxy_for_same_scope,
            visibility: self.visibility,
            production: self.production,
            issues: self.issues,
            reified: OnceCell::new(),
            handles: AtomicUsize::new(0),
        }
    }
}

/// A committed service description
pub struct Descriptor {
    locator_id: LocatorId,
    service_id: ServiceId,
    implementation: Arc<str>,
    contracts: Vec<TypeRef>,
    scope: Arc<str>,
    name: Option<Arc<str>>,
    qualifiers: Vec<Qualifier>,
    rank: AtomicI32,
    metadata: BTreeMap<String, Vec<String>>,
    proxiable: Option<bool>,
    proxy_for_same_scope: Option<bool>,
    visibility: Visibility,
    production: Production,
    issues: Vec<String>,
    reified: OnceCell<Result<Arc<Reified>, DiError>>,
    handles: AtomicUsize,
}

impl Descriptor {
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    pub fn locator_id(&self) -> LocatorId {
        self.locator_id
    }

    pub fn key(&self) -> DescriptorKey {
        (self.locator_id, self.service_id)
    }

    pub fn implementation_name(&self) -> &str {
        &self.implementation
    }

    pub fn contracts(&self) -> &[TypeRef] {
        &self.contracts
    }

    /// Whether any advertised contract has this raw name
    pub fn advertises(&self, raw_name: &str) -> bool {
        self.contracts.iter().any(|c| c.raw_name() == raw_name)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.qualifiers
    }

    pub fn has_qualifier(&self, name: &str) -> bool {
        self.qualifiers.iter().any(|q| q.name() == name)
    }

    pub fn rank(&self) -> i32 {
        self.rank.load(Ordering::Acquire)
    }

    /// Change the rank seen by future queries, returning the previous one
    pub fn set_rank(&self, rank: i32) -> i32 {
        self.rank.swap(rank, Ordering::AcqRel)
    }

    /// Values recorded under `key`
    pub fn metadata(&self, key: &str) -> &[String] {
        self.metadata.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_metadata(&self) -> &BTreeMap<String, Vec<String>> {
        &self.metadata
    }

    /// Explicit proxy policy; `None` defers to the scope's context
    pub fn proxiable(&self) -> Option<bool> {
        self.proxiable
    }

    pub fn proxy_for_same_scope(&self) -> bool {
        self.proxy_for_same_scope.unwrap_or(true)
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_local(&self) -> bool {
        self.visibility == Visibility::Local
    }

    pub fn class_model(&self) -> Option<&Arc<ClassModel>> {
        match &self.production {
            Production::Class(model) => Some(model),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.production, Production::Constant(_))
    }

    /// The factory descriptor producing this one, if any
    pub fn factory(&self) -> Option<&Arc<Descriptor>> {
        match &self.production {
            Production::Factory(product) => product.factory(),
            _ => None,
        }
    }

    pub fn is_reified(&self) -> bool {
        matches!(self.reified.get(), Some(Ok(_)))
    }

    /// Number of live service handles referring to this descriptor
    pub fn active_handles(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }

    pub(crate) fn production(&self) -> &Production {
        &self.production
    }

    pub(crate) fn reified_cell(&self) -> &OnceCell<Result<Arc<Reified>, DiError>> {
        &self.reified
    }

    pub(crate) fn handle_opened(&self) {
        self.handles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn handle_closed(&self) {
        let _ = self
            .handles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Structural problems that make the descriptor unbindable
    pub(crate) fn shape_issues(&self) -> Vec<String> {
        let mut issues = self.issues.clone();
        if self.implementation.trim().is_empty() {
            issues.push("implementation name is empty".to_string());
        }
        if let Some(name) = &self.name {
            if let Err(e) = validate_name(name) {
                issues.push(e);
            }
        }
        if let Err(e) = validate_scope_name(&self.scope) {
            issues.push(e);
        }
        for q in &self.qualifiers {
            if let Err(e) = q.validate() {
                issues.push(e.to_string());
            }
        }
        if let Some(named) = self.qualifiers.iter().find(|q| q.is_named()) {
            if self.name.as_deref() != named.attribute("value") {
                issues.push(format!(
                    "{} qualifier {} disagrees with descriptor name {:?}",
                    NAMED, named, self.name
                ));
            }
        }
        if let Production::Class(model) = &self.production {
            if model.kind == ClassKind::Interface {
                issues.push(format!("{} is an interface and cannot be bound", model.name));
            }
        }
        if let Production::Factory(product) = &self.production {
            if product.factory().is_none() {
                issues.push("factory product bound without a factory".to_string());
            }
        }
        issues
    }

    /// Whether binding `other` next to `self` would shadow it
    pub(crate) fn same_binding(&self, other: &Descriptor) -> bool {
        let same_production = match (&self.production, &other.production) {
            (Production::Class(a), Production::Class(b)) => Arc::ptr_eq(a, b) || a.name == b.name,
            (Production::Factory(a), Production::Factory(b)) => {
                match (a.factory(), b.factory()) {
                    (Some(fa), Some(fb)) => fa.implementation == fb.implementation,
                    _ => false,
                }
            }
            _ => false,
        };
        same_production
            && self.implementation == other.implementation
            && self.scope == other.scope
            && self.name == other.name
            && same_set(&self.contracts, &other.contracts)
            && same_set(&self.qualifiers, &other.qualifiers)
    }
}

fn same_set<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("descriptor name is empty".to_string());
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("descriptor name '{}' contains whitespace", name.escape_debug()));
    }
    Ok(())
}

pub(crate) fn validate_scope_name(scope: &str) -> Result<(), String> {
    let mut chars = scope.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(format!("invalid scope name '{}'", scope))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(id={}", self.implementation, self.service_id)?;
        if let Some(name) = &self.name {
            write!(f, ", name={}", name)?;
        }
        write!(f, ", scope={}, rank={})", self.scope, self.rank())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("locator_id", &self.locator_id)
            .field("service_id", &self.service_id)
            .field("implementation", &self.implementation)
            .field("contracts", &self.contracts)
            .field("scope", &self.scope)
            .field("name", &self.name)
            .field("qualifiers", &self.qualifiers)
            .field("rank", &self.rank())
            .field("visibility", &self.visibility)
            .field("production", &self.production.kind_name())
            .finish()
    }
}
