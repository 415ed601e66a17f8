//! Extension points notified by the locator
//!
//! Every hook is a trait with a blanket implementation for matching closures,
//! so simple listeners can be registered inline.

use std::fmt;
use std::sync::Arc;

use crate::container::ServiceLocator;
use crate::descriptor::Descriptor;
use crate::error::{DiError, DiResult};
use crate::injectee::Injectee;
use crate::service::Instance;

/// Descriptors added and removed by one committed configuration
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Registry generation after the commit
    pub generation: u64,
    pub added: Vec<Arc<Descriptor>>,
    pub removed: Vec<Arc<Descriptor>>,
}

impl ChangeEvent {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Invoked synchronously in the committing thread after every commit
pub trait ChangeListener: Send + Sync {
    fn configuration_changed(&self, event: &ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn configuration_changed(&self, event: &ChangeEvent) {
        self(event)
    }
}

/// Stage of an instance's life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    PreProduction,
    PostProduction,
    PreDestruction,
}

/// Notification about one instance of one descriptor
pub struct LifecycleEvent<'a> {
    pub stage: LifecycleStage,
    pub descriptor: &'a Arc<Descriptor>,
    /// Absent before production and for null products
    pub instance: Option<&'a Instance>,
}

impl fmt::Debug for LifecycleEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("stage", &self.stage)
            .field("descriptor", &self.descriptor.to_string())
            .field("instance", &self.instance.is_some())
            .finish()
    }
}

pub trait LifecycleListener: Send + Sync {
    fn lifecycle_event(&self, event: &LifecycleEvent<'_>);
}

impl<F> LifecycleListener for F
where
    F: Fn(&LifecycleEvent<'_>) + Send + Sync,
{
    fn lifecycle_event(&self, event: &LifecycleEvent<'_>) {
        self(event)
    }
}

/// Category of failure reported to error services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A descriptor could not be analyzed
    Reification,
    /// A configuration commit was rejected
    DynamicConfiguration,
    /// Production of an instance failed
    Creation,
    /// A pre-destroy hook or factory dispose failed
    Destruction,
}

#[derive(Debug, Clone)]
pub struct ErrorInformation {
    pub kind: ErrorKind,
    pub descriptor: Option<Arc<Descriptor>>,
    pub error: DiError,
}

/// Observer of failures; destruction failures are only ever reported here
pub trait ErrorService: Send + Sync {
    fn on_failure(&self, info: &ErrorInformation);
}

impl<F> ErrorService for F
where
    F: Fn(&ErrorInformation) + Send + Sync,
{
    fn on_failure(&self, info: &ErrorInformation) {
        self(info)
    }
}

/// Operation a validator is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Bind,
    Unbind,
    Lookup,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Bind => write!(f, "bind"),
            Operation::Unbind => write!(f, "unbind"),
            Operation::Lookup => write!(f, "lookup"),
        }
    }
}

/// Vetoes binds and unbinds at commit, and hides lookup candidates
pub trait Validator: Send + Sync {
    /// `injectee` is present for lookups made on behalf of an injection point
    fn validate(&self, operation: Operation, descriptor: &Descriptor, injectee: Option<&Injectee>) -> bool;
}

impl<F> Validator for F
where
    F: Fn(Operation, &Descriptor, Option<&Injectee>) -> bool + Send + Sync,
{
    fn validate(&self, operation: Operation, descriptor: &Descriptor, injectee: Option<&Injectee>) -> bool {
        self(operation, descriptor, injectee)
    }
}

/// Last-resort resolver for injection points nothing satisfies
///
/// Returning `Ok(true)` means descriptors were bound and the lookup should be
/// retried once.
pub trait JustInTimeResolver: Send + Sync {
    fn resolve(&self, locator: &ServiceLocator, injectee: &Injectee) -> DiResult<bool>;
}

impl<F> JustInTimeResolver for F
where
    F: Fn(&ServiceLocator, &Injectee) -> DiResult<bool> + Send + Sync,
{
    fn resolve(&self, locator: &ServiceLocator, injectee: &Injectee) -> DiResult<bool> {
        self(locator, injectee)
    }
}
