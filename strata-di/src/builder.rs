//! Locator builder for fluent configuration

use std::sync::Arc;

use crate::config::{DuplicatePolicy, LocatorConfig};
use crate::container::ServiceLocator;
use crate::context::Context;
use crate::descriptor::DescriptorBuilder;
use crate::error::DiResult;
use crate::transaction::DynamicConfiguration;

/// Trait for service modules
pub trait Module: Send + Sync {
    /// Stage this module's bindings
    fn configure(&self, config: &mut DynamicConfiguration) -> DiResult<()>;
}

impl<F> Module for F
where
    F: Fn(&mut DynamicConfiguration) -> DiResult<()> + Send + Sync,
{
    fn configure(&self, config: &mut DynamicConfiguration) -> DiResult<()> {
        self(config)
    }
}

/// Builder for constructing a service locator
///
/// Everything staged here is applied by [`build`](Self::build) in a single
/// commit, after the extra contexts are registered.
#[derive(Default)]
pub struct LocatorBuilder {
    config: LocatorConfig,
    parent: Option<ServiceLocator>,
    contexts: Vec<Arc<dyn Context>>,
    modules: Vec<Box<dyn Module>>,
    bindings: Vec<DescriptorBuilder>,
}

impl LocatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LocatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn parent(mut self, parent: &ServiceLocator) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn greedy_resolution(mut self, enabled: bool) -> Self {
        self.config.greedy_resolution = enabled;
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_policy = policy;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn Context>) -> Self {
        self.contexts.push(context);
        self
    }

    /// Add services from a module
    pub fn add_module<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn bind(mut self, descriptor: DescriptorBuilder) -> Self {
        self.bindings.push(descriptor);
        self
    }

    /// Build the locator
    pub fn build(self) -> DiResult<ServiceLocator> {
        let locator = ServiceLocator::create_locator(self.config, self.parent);
        for context in self.contexts {
            locator.add_context(context)?;
        }
        let mut config = locator.configuration();
        for binding in self.bindings {
            config.bind(binding);
        }
        for module in &self.modules {
            module.configure(&mut config)?;
        }
        config.commit()?;
        Ok(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeting(&'static str);

    struct CoreModule;

    impl Module for CoreModule {
        fn configure(&self, config: &mut DynamicConfiguration) -> DiResult<()> {
            config.bind(DescriptorBuilder::constant("Greeting", Greeting("hello")));
            Ok(())
        }
    }

    #[test]
    fn test_modules_commit_together() {
        let locator = LocatorBuilder::new()
            .name("app")
            .add_module(CoreModule)
            .add_module(|config: &mut DynamicConfiguration| -> DiResult<()> {
                config.bind(DescriptorBuilder::constant("Count", 3usize));
                Ok(())
            })
            .build()
            .unwrap();
        assert_eq!(locator.name(), "app");
        assert_eq!(locator.generation(), 1);
        assert_eq!(locator.get_service::<Greeting>("Greeting").unwrap().0, "hello");
        assert_eq!(*locator.get_service::<usize>("Count").unwrap(), 3);
    }
}
