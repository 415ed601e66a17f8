//! Factory-produced services
//!
//! A factory is an ordinary service (built from its own class model and
//! living in its own scope) whose [`Factory::provide`] produces instances of
//! a product descriptor. The product's scope decides how often `provide`
//! runs.

use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::service::{expect_ref, Instance, Service};

/// Raw-name prefix of the contract every factory descriptor advertises
pub const FACTORY: &str = "Factory";

/// A service that produces instances of another service
pub trait Factory: Send + Sync + 'static {
    type Product: Service;

    /// Produce an instance; `None` is a null product
    fn provide(&self) -> anyhow::Result<Option<Self::Product>>;

    /// Release an instance produced by [`Factory::provide`]
    fn dispose(&self, _instance: &Self::Product) -> anyhow::Result<()> {
        Ok(())
    }
}

type ProvideFn = Arc<dyn Fn(&Instance) -> anyhow::Result<Option<Instance>> + Send + Sync>;
type DisposeFn = Arc<dyn Fn(&Instance, &Instance) -> anyhow::Result<()> + Send + Sync>;

/// Link from a product descriptor to the factory that produces it
pub(crate) struct FactoryProduct {
    factory: Option<Arc<Descriptor>>,
    provide: Option<ProvideFn>,
    dispose: Option<DisposeFn>,
}

impl FactoryProduct {
    pub(crate) fn unbound() -> Self {
        Self {
            factory: None,
            provide: None,
            dispose: None,
        }
    }

    /// Attach the product to `factory`, whose instances are `F`
    pub(crate) fn bind<F: Factory>(&mut self, factory: Arc<Descriptor>) {
        self.factory = Some(factory);
        self.provide = Some(Arc::new(|factory: &Instance| -> anyhow::Result<Option<Instance>> {
            let factory = expect_ref::<F>((**factory).as_any())?;
            Ok(factory.provide()?.map(|product| Arc::new(product) as Instance))
        }));
        self.dispose = Some(Arc::new(|factory: &Instance, product: &Instance| -> anyhow::Result<()> {
            let factory = expect_ref::<F>((**factory).as_any())?;
            factory.dispose(expect_ref::<F::Product>((**product).as_any())?)
        }));
    }

    pub(crate) fn factory(&self) -> Option<&Arc<Descriptor>> {
        self.factory.as_ref()
    }

    pub(crate) fn provide(&self, factory: &Instance) -> anyhow::Result<Option<Instance>> {
        match &self.provide {
            Some(provide) => provide(factory),
            None => Err(anyhow::anyhow!("factory product is not bound to a factory")),
        }
    }

    pub(crate) fn dispose(&self, factory: &Instance, product: &Instance) -> anyhow::Result<()> {
        match &self.dispose {
            Some(dispose) => dispose(factory, product),
            None => Ok(()),
        }
    }
}
