//! Service handles
//!
//! A handle ties one descriptor to at most one instance obtained through
//! it. Per-lookup services created while building that instance are owned
//! by the handle and disposed of when it is destroyed.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::container::{ServiceLocator, WeakLocator};
use crate::context::Dependents;
use crate::descriptor::Descriptor;
use crate::error::{DiError, DiResult};
use crate::service::{downcast_instance, Instance, Service};

#[derive(Default)]
struct HandleState {
    instance: Option<Instance>,
    created: bool,
    destroyed: bool,
}

struct HandleInner {
    locator: WeakLocator,
    descriptor: Arc<Descriptor>,
    dependents: Dependents,
    state: Mutex<HandleState>,
    data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if !self.state.get_mut().destroyed {
            self.descriptor.handle_closed();
        }
    }
}

/// Handle to a service and its lifecycle
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Arc<HandleInner>,
}

impl ServiceHandle {
    pub(crate) fn new(locator: &ServiceLocator, descriptor: Arc<Descriptor>) -> Self {
        descriptor.handle_opened();
        Self {
            inner: Arc::new(HandleInner {
                locator: locator.downgrade(),
                descriptor,
                dependents: Dependents::default(),
                state: Mutex::new(HandleState::default()),
                data: Mutex::new(None),
            }),
        }
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.inner.descriptor
    }

    fn locator(&self) -> DiResult<ServiceLocator> {
        self.inner.locator.upgrade().ok_or_else(|| DiError::Shutdown {
            locator: format!("owner of {}", self.inner.descriptor),
        })
    }

    /// The instance behind this handle; created on the first call
    pub fn get_service(&self) -> DiResult<Option<Instance>> {
        let mut state = self.inner.state.lock();
        if state.destroyed {
            return Err(DiError::InvalidArgument(format!(
                "service handle for {} has been destroyed",
                self.inner.descriptor
            )));
        }
        if state.created {
            return Ok(state.instance.clone());
        }
        let instance = self
            .locator()?
            .instance_for(&self.inner.descriptor, Some(&self.inner.dependents))?;
        state.instance = instance.clone();
        state.created = true;
        Ok(instance)
    }

    pub fn get<T: Service>(&self) -> DiResult<Arc<T>> {
        let instance = self.get_service()?.ok_or_else(|| DiError::NullNotSupported {
            descriptor: self.inner.descriptor.to_string(),
            scope: self.inner.descriptor.scope().to_string(),
        })?;
        downcast_instance(instance)
    }

    /// Whether an instance exists for this handle or its context
    pub fn is_active(&self) -> bool {
        let state = self.inner.state.lock();
        if state.destroyed {
            return false;
        }
        if state.created {
            return true;
        }
        drop(state);
        self.locator()
            .and_then(|locator| locator.context_for(&self.inner.descriptor))
            .is_ok_and(|context| context.contains_key(&self.inner.descriptor))
    }

    /// Per-lookup services owned by this handle, the root included when its
    /// scope does not cache
    pub fn dependents(&self) -> usize {
        self.inner.dependents.len()
    }

    pub fn service_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.data.lock().clone()
    }

    pub fn set_service_data(&self, data: Option<Arc<dyn Any + Send + Sync>>) {
        *self.inner.data.lock() = data;
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Release the instance; later calls do nothing
    pub fn destroy(&self) {
        let created = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.instance = None;
            state.created
        };
        let descriptor = &self.inner.descriptor;
        descriptor.handle_closed();
        trace!("destroying handle for {}", descriptor);

        if created {
            if let Some(locator) = self.inner.locator.upgrade() {
                if let Ok(context) = locator.context_for(descriptor) {
                    if context.caches_instances() {
                        context.destroy_one(descriptor);
                    }
                }
            }
        }
        self.inner.dependents.destroy_all();
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ServiceHandle")
            .field("descriptor", &self.inner.descriptor.to_string())
            .field("created", &state.created)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

