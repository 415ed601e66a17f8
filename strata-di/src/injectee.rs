//! Injection points, their reified form, and the values injected into them

use std::fmt;
use std::sync::{Arc, Weak};

use crate::descriptor::{Descriptor, ServiceId};
use crate::error::{DiError, DiResult};
use crate::handle::ServiceHandle;
use crate::iterable::IterableProvider;
use crate::proxy::{Lazy, Proxy};
use crate::qualifier::{conflicting_qualifiers, Qualifier};
use crate::service::{downcast_instance, Instance, Service};
use crate::types::{IntoTypeRef, TypeRef};

/// Wrapper marking an optional injection point
pub const OPTIONAL: &str = "Optional";
/// Wrapper requesting a lazy single-value provider
pub const PROVIDER: &str = "Provider";
/// Wrapper requesting every matching service
pub const ITERABLE_PROVIDER: &str = "IterableProvider";
/// Alias of [`ITERABLE_PROVIDER`]
pub const ITERABLE: &str = "Iterable";
/// Wrapper requesting a disposable handle
pub const SERVICE_HANDLE: &str = "ServiceHandle";
/// The type a self injection point must request
pub const ACTIVE_DESCRIPTOR: &str = "ActiveDescriptor";

/// How the resolved candidates are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionKind {
    /// The best candidate's instance (or a proxy for it)
    Direct,
    /// A provider deferring lookup of the best candidate
    Provider,
    /// A provider over every candidate
    Iterable,
    /// A handle for the best candidate
    Handle,
}

/// Declared injection point, before reification
#[derive(Debug, Clone)]
pub struct InjectionPoint {
    required: Result<TypeRef, String>,
    qualifiers: Vec<Qualifier>,
    optional: bool,
    self_ref: bool,
    unqualified: Option<Vec<String>>,
    kind: InjectionKind,
}

impl InjectionPoint {
    /// Injection point requiring `ty` (text is parsed, e.g. `Repository<User>`)
    pub fn of(ty: impl IntoTypeRef) -> Self {
        Self {
            required: ty.into_type_ref().map_err(|e| e.to_string()),
            qualifiers: Vec::new(),
            optional: false,
            self_ref: false,
            unqualified: None,
            kind: InjectionKind::Direct,
        }
    }

    /// Injection point receiving the owner's own descriptor
    pub fn self_descriptor() -> Self {
        Self::of(TypeRef::class(ACTIVE_DESCRIPTOR)).self_ref()
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn self_ref(mut self) -> Self {
        self.self_ref = true;
        self
    }

    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        self.qualified(Qualifier::named(name))
    }

    /// Match only descriptors carrying none of `excluded` (none at all when empty)
    pub fn unqualified(mut self, excluded: &[&str]) -> Self {
        self.unqualified = Some(excluded.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn provider(mut self) -> Self {
        self.kind = InjectionKind::Provider;
        self
    }

    pub fn iterable(mut self) -> Self {
        self.kind = InjectionKind::Iterable;
        self
    }

    pub fn handle(mut self) -> Self {
        self.kind = InjectionKind::Handle;
        self
    }

    /// Declared type text, used for method signatures
    pub(crate) fn signature_type(&self) -> String {
        match &self.required {
            Ok(ty) => ty.to_string(),
            Err(_) => "<invalid>".to_string(),
        }
    }

    /// Strip wrapper types and check the point's shape
    pub(crate) fn reify(&self, position: Position, owner: Option<OwnerRef>) -> Result<Injectee, Vec<String>> {
        let mut issues = Vec::new();
        let mut required = match &self.required {
            Ok(ty) => ty.clone(),
            Err(e) => return Err(vec![format!("{}: {}", position, e)]),
        };
        let mut optional = self.optional;
        let mut kind = self.kind;

        if !self.self_ref {
            loop {
                let TypeRef::Class { name, args } = &required else {
                    break;
                };
                let wrapper_kind = match &**name {
                    OPTIONAL => None,
                    PROVIDER => Some(InjectionKind::Provider),
                    ITERABLE_PROVIDER | ITERABLE => Some(InjectionKind::Iterable),
                    SERVICE_HANDLE => Some(InjectionKind::Handle),
                    _ => break,
                };
                if args.len() != 1 {
                    issues.push(format!(
                        "{}: wrapper {} requires exactly one type argument",
                        position, name
                    ));
                    break;
                }
                match wrapper_kind {
                    None if optional && &**name == OPTIONAL => {
                        issues.push(format!("{}: nested {} wrapper", position, OPTIONAL));
                    }
                    None => optional = true,
                    Some(k) if kind != InjectionKind::Direct => {
                        issues.push(format!(
                            "{}: {} cannot wrap a {:?} injection",
                            position, name, k
                        ));
                    }
                    Some(k) => kind = k,
                }
                required = args[0].clone();
            }
        }

        if self.self_ref {
            if required.raw_name() != ACTIVE_DESCRIPTOR {
                issues.push(format!(
                    "{}: self injection must request {}, not {}",
                    position, ACTIVE_DESCRIPTOR, required
                ));
            }
            if optional {
                issues.push(format!("{}: self injection cannot be optional", position));
            }
            if !self.qualifiers.is_empty() {
                issues.push(format!("{}: self injection cannot carry qualifiers", position));
            }
        }

        if self.unqualified.is_some() && !self.qualifiers.is_empty() {
            issues.push(format!(
                "{}: an unqualified injection point cannot carry qualifiers",
                position
            ));
        }
        if let Some((a, b)) = conflicting_qualifiers(&self.qualifiers) {
            issues.push(format!("{}: conflicting qualifiers {} and {}", position, a, b));
        }
        for q in &self.qualifiers {
            if let Err(e) = q.validate() {
                issues.push(format!("{}: {}", position, e));
            }
        }

        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(Injectee {
            required,
            kind,
            qualifiers: self.qualifiers.clone(),
            optional,
            self_ref: self.self_ref,
            unqualified: self.unqualified.clone(),
            position,
            owner,
        })
    }
}

/// Where an injection point lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Constructor { index: usize },
    Field { name: Arc<str> },
    Method { name: Arc<str>, index: usize },
    /// A direct lookup through the locator API
    Lookup,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Constructor { index } => write!(f, "constructor parameter {}", index),
            Position::Field { name } => write!(f, "field {}", name),
            Position::Method { name, index } => write!(f, "parameter {} of method {}", index, name),
            Position::Lookup => write!(f, "lookup"),
        }
    }
}

/// Non-owning reference to the descriptor that declares an injection point
#[derive(Debug, Clone)]
pub struct OwnerRef {
    pub(crate) implementation: Arc<str>,
    pub(crate) service_id: Option<ServiceId>,
    pub(crate) descriptor: Weak<Descriptor>,
}

impl OwnerRef {
    pub(crate) fn of(descriptor: &Arc<Descriptor>) -> Self {
        Self {
            implementation: descriptor.implementation_name().into(),
            service_id: Some(descriptor.service_id()),
            descriptor: Arc::downgrade(descriptor),
        }
    }

    pub(crate) fn unmanaged(implementation: &str) -> Self {
        Self {
            implementation: implementation.into(),
            service_id: None,
            descriptor: Weak::new(),
        }
    }

    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    pub fn service_id(&self) -> Option<ServiceId> {
        self.service_id
    }

    pub fn descriptor(&self) -> Option<Arc<Descriptor>> {
        self.descriptor.upgrade()
    }
}

/// A reified injection point
#[derive(Debug, Clone)]
pub struct Injectee {
    required: TypeRef,
    kind: InjectionKind,
    qualifiers: Vec<Qualifier>,
    optional: bool,
    self_ref: bool,
    unqualified: Option<Vec<String>>,
    position: Position,
    owner: Option<OwnerRef>,
}

impl Injectee {
    /// An injectee describing a direct lookup
    pub fn lookup(required: TypeRef, qualifiers: Vec<Qualifier>) -> Self {
        Self {
            required,
            kind: InjectionKind::Direct,
            qualifiers,
            optional: false,
            self_ref: false,
            unqualified: None,
            position: Position::Lookup,
            owner: None,
        }
    }

    /// Base contract after wrapper normalization
    pub fn required(&self) -> &TypeRef {
        &self.required
    }

    pub fn kind(&self) -> InjectionKind {
        self.kind
    }

    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.qualifiers
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_self(&self) -> bool {
        self.self_ref
    }

    pub fn unqualified(&self) -> Option<&[String]> {
        self.unqualified.as_deref()
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn owner(&self) -> Option<&OwnerRef> {
        self.owner.as_ref()
    }

    /// Narrow a lookup injectee by one more qualifier
    pub(crate) fn with_qualifier(&self, qualifier: Qualifier) -> Self {
        let mut narrowed = self.clone();
        if !narrowed.qualifiers.contains(&qualifier) {
            narrowed.qualifiers.push(qualifier);
        }
        narrowed
    }

    pub(crate) fn owner_name(&self) -> String {
        self.owner
            .as_ref()
            .map(|o| o.implementation.to_string())
            .unwrap_or_else(|| "<lookup>".to_string())
    }

    pub(crate) fn unsatisfied(&self) -> DiError {
        DiError::UnsatisfiedDependency {
            owner: self.owner_name(),
            required: self.required.to_string(),
            injectee: self.position.to_string(),
        }
    }
}

impl fmt::Display for Injectee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) of {}", self.position, self.required, self.owner_name())
    }
}

/// A value delivered to an injection point
#[derive(Clone)]
pub enum Injection {
    /// Nothing matched an optional injection point
    Absent,
    Instance(Instance),
    Proxy(Proxy),
    /// The owner's own descriptor (self injection)
    Descriptor(Arc<Descriptor>),
    Provider(IterableProvider),
    Handle(ServiceHandle),
}

impl Injection {
    pub fn is_absent(&self) -> bool {
        matches!(self, Injection::Absent)
    }

    /// The injected service as `T`, realizing a proxy if needed
    pub fn instance<T: Service>(self) -> DiResult<Arc<T>> {
        match self {
            Injection::Instance(instance) => downcast_instance(instance),
            Injection::Proxy(proxy) => proxy.get_as::<T>(),
            Injection::Handle(handle) => handle.get::<T>(),
            Injection::Provider(provider) => provider.get::<T>(),
            Injection::Absent => Err(DiError::InvalidArgument(format!(
                "no {} was injected",
                std::any::type_name::<T>()
            ))),
            Injection::Descriptor(_) => Err(DiError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                actual: ACTIVE_DESCRIPTOR.to_string(),
            }),
        }
    }

    /// `None` for an absent optional injection
    pub fn optional<T: Service>(self) -> DiResult<Option<Arc<T>>> {
        match self {
            Injection::Absent => Ok(None),
            other => other.instance::<T>().map(Some),
        }
    }

    /// A deferred reference; proxies stay unrealized
    pub fn lazy<T: Service>(self) -> DiResult<Lazy<T>> {
        match self {
            Injection::Proxy(proxy) => Ok(Lazy::pending(proxy)),
            other => other.instance::<T>().map(Lazy::ready),
        }
    }

    pub fn descriptor(self) -> DiResult<Arc<Descriptor>> {
        match self {
            Injection::Descriptor(descriptor) => Ok(descriptor),
            _ => Err(DiError::TypeMismatch {
                expected: ACTIVE_DESCRIPTOR.to_string(),
                actual: self.kind_name().to_string(),
            }),
        }
    }

    pub fn provider(self) -> DiResult<IterableProvider> {
        match self {
            Injection::Provider(provider) => Ok(provider),
            _ => Err(DiError::TypeMismatch {
                expected: ITERABLE_PROVIDER.to_string(),
                actual: self.kind_name().to_string(),
            }),
        }
    }

    pub fn handle(self) -> DiResult<ServiceHandle> {
        match self {
            Injection::Handle(handle) => Ok(handle),
            _ => Err(DiError::TypeMismatch {
                expected: SERVICE_HANDLE.to_string(),
                actual: self.kind_name().to_string(),
            }),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Injection::Absent => "absent",
            Injection::Instance(_) => "instance",
            Injection::Proxy(_) => "proxy",
            Injection::Descriptor(_) => ACTIVE_DESCRIPTOR,
            Injection::Provider(_) => ITERABLE_PROVIDER,
            Injection::Handle(_) => SERVICE_HANDLE,
        }
    }
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Injection::{}", self.kind_name())
    }
}

/// Cursor over the values resolved for a constructor or method
pub struct Args {
    values: std::vec::IntoIter<Injection>,
    position: usize,
}

impl Args {
    pub(crate) fn new(values: Vec<Injection>) -> Self {
        Self {
            values: values.into_iter(),
            position: 0,
        }
    }

    /// Remaining argument count
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    pub fn next(&mut self) -> DiResult<Injection> {
        let value = self.values.next().ok_or_else(|| {
            DiError::InvalidArgument(format!("argument {} was not declared", self.position))
        })?;
        self.position += 1;
        Ok(value)
    }

    pub fn instance<T: Service>(&mut self) -> DiResult<Arc<T>> {
        self.next()?.instance::<T>()
    }

    pub fn optional<T: Service>(&mut self) -> DiResult<Option<Arc<T>>> {
        self.next()?.optional::<T>()
    }

    pub fn lazy<T: Service>(&mut self) -> DiResult<Lazy<T>> {
        self.next()?.lazy::<T>()
    }

    pub fn descriptor(&mut self) -> DiResult<Arc<Descriptor>> {
        self.next()?.descriptor()
    }

    pub fn provider(&mut self) -> DiResult<IterableProvider> {
        self.next()?.provider()
    }

    pub fn handle(&mut self) -> DiResult<ServiceHandle> {
        self.next()?.handle()
    }
}
