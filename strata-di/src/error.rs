//! Error types for the DI container

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for DI operations
pub type DiResult<T> = Result<T, DiError>;

/// Shared, clonable error source (user code failures)
pub type ErrorSource = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur during DI operations
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// A filter, name or type expression was malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No descriptor satisfies a non-optional injection point
    #[error("Unsatisfied dependency: no service of type {required} for {injectee} of {owner}")]
    UnsatisfiedDependency {
        /// Implementation that owns the injection point
        owner: String,
        /// Required contract
        required: String,
        /// Injection point position
        injectee: String,
    },

    /// Self injection used with an illegal shape or on the unmanaged path
    #[error("Illegal self injection at {injectee}: {reason}")]
    IllegalSelfInjection {
        /// Injection point position
        injectee: String,
        /// What was wrong
        reason: String,
    },

    /// Generic request that can never be satisfied (bare wildcard or variable)
    #[error("Invalid generic request for {required} at {injectee}")]
    InvalidGenericRequest {
        /// Required type
        required: String,
        /// Injection point position
        injectee: String,
    },

    /// Circular creation in a scope that cannot break it
    #[error("Circular dependency detected: {chain}")]
    CycleDetected {
        /// Creation chain, outermost first
        chain: String,
    },

    /// Proxy requested for a type that cannot be proxied
    #[error("Service {implementation} is not proxiable: {reason}")]
    NotProxiable {
        /// Implementation name
        implementation: String,
        /// Why it cannot be proxied
        reason: String,
    },

    /// Duplicate binding rejected at commit
    #[error("Ambiguous binding for {descriptor}: {reason}")]
    AmbiguousBinding {
        /// Offending descriptor
        descriptor: String,
        /// Conflict description
        reason: String,
    },

    /// Descriptor analysis failed
    #[error("Failed to reify {descriptor}: {reason}")]
    Reification {
        /// Offending descriptor
        descriptor: String,
        /// Why analysis failed
        reason: String,
    },

    /// No context is registered for a scope
    #[error("No context registered for scope {scope}")]
    NoSuchContext {
        /// Scope name
        scope: String,
    },

    /// The context for a scope exists but is not active
    #[error("Context for scope {scope} is not active")]
    ContextNotActive {
        /// Scope name
        scope: String,
    },

    /// A descriptor produced no instance in a context that forbids it
    #[error("Service {descriptor} produced no instance, which scope {scope} does not allow")]
    NullNotSupported {
        /// Offending descriptor
        descriptor: String,
        /// Scope name
        scope: String,
    },

    /// Construction, injection or a lifecycle hook failed
    #[error("Failed to create service {descriptor}: {source}")]
    CreationFailed {
        /// Descriptor being created
        descriptor: String,
        /// Underlying failure
        #[source]
        source: ErrorSource,
    },

    /// A validator vetoed an operation
    #[error("Validation rejected {operation} of {descriptor}")]
    ValidationRejected {
        /// Operation name
        operation: String,
        /// Descriptor involved
        descriptor: String,
    },

    /// An instance did not have the requested concrete type
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Requested type
        expected: String,
        /// Actual type
        actual: String,
    },

    /// The locator has been shut down
    #[error("Service locator {locator} has been shut down")]
    Shutdown {
        /// Locator name
        locator: String,
    },

    /// Several independent failures
    #[error(transparent)]
    Multiple(#[from] MultiError),
}

impl DiError {
    /// Wrap a user-code failure raised while creating `descriptor`
    pub fn creation(descriptor: impl Into<String>, error: anyhow::Error) -> Self {
        match error.downcast::<DiError>() {
            Ok(inner) => Self::creation_from(descriptor, inner),
            Err(error) => {
                let boxed: Box<dyn StdError + Send + Sync> = error.into();
                DiError::CreationFailed {
                    descriptor: descriptor.into(),
                    source: Arc::from(boxed),
                }
            }
        }
    }

    /// Wrap a container error raised while creating `descriptor`
    pub fn creation_from(descriptor: impl Into<String>, error: DiError) -> Self {
        DiError::CreationFailed {
            descriptor: descriptor.into(),
            source: Arc::new(error),
        }
    }

    /// All leaf errors, flattening nested aggregates
    pub fn errors(&self) -> Vec<&DiError> {
        match self {
            DiError::Multiple(multi) => multi.errors().iter().flat_map(|e| e.errors()).collect(),
            other => vec![other],
        }
    }

    /// Whether this error or any aggregated cause matches `predicate`
    pub fn any(&self, predicate: impl Fn(&DiError) -> bool + Copy) -> bool {
        self.errors().into_iter().any(|e| {
            if predicate(e) {
                return true;
            }
            match e {
                DiError::CreationFailed { source, .. } => source
                    .downcast_ref::<DiError>()
                    .is_some_and(|inner| inner.any(predicate)),
                _ => false,
            }
        })
    }

    /// Whether this is (or wraps) a cycle detection failure
    pub fn is_cycle(&self) -> bool {
        self.any(|e| matches!(e, DiError::CycleDetected { .. }))
    }

    /// Whether this is (or wraps) an unsatisfied dependency
    pub fn is_unsatisfied(&self) -> bool {
        self.any(|e| matches!(e, DiError::UnsatisfiedDependency { .. }))
    }
}

/// Aggregate of independent failures diagnosed in one operation
#[derive(Debug, Clone, Default)]
pub struct MultiError {
    errors: Vec<DiError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn push(&mut self, error: DiError) {
        self.errors.push(error);
    }

    /// Recorded failures in diagnosis order
    pub fn errors(&self) -> &[DiError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(value)` when nothing was recorded; a single error is returned as-is
    pub fn into_result<T>(mut self, value: T) -> DiResult<T> {
        match self.errors.len() {
            0 => Ok(value),
            1 => Err(self.errors.remove(0)),
            _ => Err(DiError::Multiple(self)),
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors:", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, error)?;
        }
        Ok(())
    }
}

impl StdError for MultiError {}

impl Extend<DiError> for MultiError {
    fn extend<I: IntoIterator<Item = DiError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}
