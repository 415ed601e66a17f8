//! Runtime dependency injection for Strata
//!
//! This crate provides a service locator that resolves services from
//! descriptors bound at runtime. Descriptors are added and removed through
//! atomic configuration transactions, instances live in scope contexts, and
//! injection points are satisfied by contract, qualifiers and rank.
//!
//! Class models stand in for reflection: each implementation describes its
//! constructors, injectable fields and methods, and lifecycle hooks as
//! closures over its concrete type.

pub mod builder;
pub mod class;
pub mod config;
pub mod container;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod handle;
pub mod injectee;
pub mod iterable;
pub mod listener;
pub mod provider;
pub mod proxy;
pub mod qualifier;
pub mod service;
pub mod transaction;
pub mod types;

mod lifecycle;
mod registry;
mod resolver;

pub use builder::{LocatorBuilder, Module};
pub use class::{ClassBuilder, ClassKind, ClassModel};
pub use config::{DuplicatePolicy, LocatorConfig};
pub use container::{LocatorState, ServiceLocator, WeakLocator};
pub use context::{
    Context, OperationContext, OperationHandle, IMMEDIATE, PER_LOOKUP, PER_THREAD, SINGLETON,
};
pub use descriptor::{Descriptor, DescriptorBuilder, ServiceId, Visibility};
pub use error::{DiError, DiResult, MultiError};
pub use filter::{Filter, ServiceFilter};
pub use handle::ServiceHandle;
pub use injectee::{Args, Injectee, Injection, InjectionKind, InjectionPoint, Position};
pub use iterable::IterableProvider;
pub use listener::{
    ChangeEvent, ChangeListener, ErrorInformation, ErrorKind, ErrorService, JustInTimeResolver, LifecycleEvent,
    LifecycleListener, LifecycleStage, Operation, Validator,
};
pub use provider::Factory;
pub use proxy::{Lazy, Proxy};
pub use qualifier::Qualifier;
pub use service::{Instance, Service};
pub use transaction::DynamicConfiguration;
pub use types::{TypeHierarchy, TypeRef};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        Args, ClassModel, DescriptorBuilder, DiError, DiResult, DynamicConfiguration, Factory, InjectionPoint,
        Instance, IterableProvider, Lazy, LocatorBuilder, LocatorConfig, Module, Qualifier, Service, ServiceFilter,
        ServiceHandle, ServiceLocator, PER_LOOKUP, SINGLETON,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    struct Greeting(String);

    #[test]
    fn test_basic_locator() {
        let greeting = ClassModel::builder::<Greeting>("Greeting")
            .default_constructor(|| Greeting("Hello, DI!".to_string()))
            .build();
        let locator = ServiceLocator::new();
        locator.bind(DescriptorBuilder::class(&greeting)).unwrap();

        let resolved = locator.get_service::<Greeting>("Greeting").unwrap();
        assert_eq!(resolved.0, "Hello, DI!");
    }
}
