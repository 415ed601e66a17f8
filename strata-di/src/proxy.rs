//! Deferred references to services
//!
//! A [`Proxy`] stands in for a service until first use, which is how
//! constructor cycles between proxiable services are broken.

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::container::WeakLocator;
use crate::container::ServiceLocator;
use crate::descriptor::Descriptor;
use crate::error::{DiError, DiResult};
use crate::service::{downcast_instance, Instance, Service};

struct ProxyInner {
    locator: WeakLocator,
    descriptor: Arc<Descriptor>,
    target: OnceCell<Instance>,
}

/// Stand-in for a proxiable service, realized on first access
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn new(locator: &ServiceLocator, descriptor: Arc<Descriptor>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                locator: locator.downgrade(),
                descriptor,
                target: OnceCell::new(),
            }),
        }
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.inner.descriptor
    }

    pub fn is_realized(&self) -> bool {
        self.inner.target.get().is_some()
    }

    /// The underlying instance, created through its context on first call
    pub fn get(&self) -> DiResult<Instance> {
        self.inner
            .target
            .get_or_try_init(|| {
                let descriptor = &self.inner.descriptor;
                let locator = self.inner.locator.upgrade().ok_or_else(|| DiError::Shutdown {
                    locator: format!("owner of {}", descriptor),
                })?;
                trace!("realizing proxy for {}", descriptor);
                locator.instance_for(descriptor, None)?.ok_or_else(|| DiError::NullNotSupported {
                    descriptor: descriptor.to_string(),
                    scope: descriptor.scope().to_string(),
                })
            })
            .cloned()
    }

    pub fn get_as<T: Service>(&self) -> DiResult<Arc<T>> {
        downcast_instance(self.get()?)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("descriptor", &self.inner.descriptor.to_string())
            .field("realized", &self.is_realized())
            .finish()
    }
}

/// Typed deferred reference, ready at once when no proxy was involved
pub struct Lazy<T> {
    proxy: Option<Proxy>,
    value: OnceCell<Arc<T>>,
}

impl<T: Service> Lazy<T> {
    pub(crate) fn pending(proxy: Proxy) -> Self {
        Self {
            proxy: Some(proxy),
            value: OnceCell::new(),
        }
    }

    pub(crate) fn ready(value: Arc<T>) -> Self {
        Self {
            proxy: None,
            value: OnceCell::with_value(value),
        }
    }

    pub fn get(&self) -> DiResult<Arc<T>> {
        self.value
            .get_or_try_init(|| match &self.proxy {
                Some(proxy) => proxy.get_as::<T>(),
                None => Err(DiError::InvalidArgument("empty lazy reference".to_string())),
            })
            .cloned()
    }

    pub fn is_realized(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("type", &std::any::type_name::<T>())
            .field("realized", &self.value.get().is_some())
            .finish()
    }
}
