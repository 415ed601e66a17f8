//! Providers over every service matching an injection point
//!
//! An [`IterableProvider`] re-runs its query on each call, so services bound
//! after the provider was injected are visible through it.

use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;

use crate::container::{ServiceLocator, WeakLocator};
use crate::descriptor::{Descriptor, DescriptorKey};
use crate::error::{DiError, DiResult};
use crate::handle::ServiceHandle;
use crate::injectee::Injectee;
use crate::qualifier::Qualifier;
use crate::resolver;
use crate::service::{downcast_instance, Instance, Service};

#[derive(Clone)]
pub struct IterableProvider {
    locator: WeakLocator,
    injectee: Injectee,
}

impl IterableProvider {
    pub(crate) fn new(locator: &ServiceLocator, injectee: Injectee) -> Self {
        Self {
            locator: locator.downgrade(),
            injectee,
        }
    }

    pub fn injectee(&self) -> &Injectee {
        &self.injectee
    }

    fn locator(&self) -> DiResult<ServiceLocator> {
        self.locator.upgrade().ok_or_else(|| DiError::Shutdown {
            locator: format!("owner of provider for {}", self.injectee.required()),
        })
    }

    fn candidates(&self) -> DiResult<(ServiceLocator, Vec<Arc<Descriptor>>)> {
        let locator = self.locator()?;
        let found = resolver::candidates(&locator, &self.injectee)?;
        Ok((locator, found))
    }

    /// Best matching instance, if any
    pub fn get_instance(&self) -> DiResult<Option<Instance>> {
        let locator = self.locator()?;
        match resolver::best_candidate(&locator, &self.injectee)? {
            Some(descriptor) => locator.instance_for(&descriptor, None),
            None => Ok(None),
        }
    }

    /// Best matching service as `T`
    pub fn get<T: Service>(&self) -> DiResult<Arc<T>> {
        let instance = self.get_instance()?.ok_or_else(|| self.injectee.unsatisfied())?;
        downcast_instance(instance)
    }

    /// Handle to the best match
    pub fn handle(&self) -> DiResult<Option<ServiceHandle>> {
        let locator = self.locator()?;
        Ok(resolver::best_candidate(&locator, &self.injectee)?
            .map(|descriptor| ServiceHandle::new(&locator, descriptor)))
    }

    pub fn len(&self) -> DiResult<usize> {
        Ok(self.candidates()?.1.len())
    }

    pub fn is_empty(&self) -> DiResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Narrow to services with the given name
    pub fn named(&self, name: &str) -> Self {
        self.qualified_with(Qualifier::named(name))
    }

    pub fn qualified_with(&self, qualifier: Qualifier) -> Self {
        Self {
            locator: self.locator.clone(),
            injectee: self.injectee.with_qualifier(qualifier),
        }
    }

    /// Handles to every current match, best first; fixed once taken
    pub fn snapshot(&self) -> DiResult<Vec<ServiceHandle>> {
        let (locator, found) = self.candidates()?;
        Ok(found
            .into_iter()
            .map(|descriptor| ServiceHandle::new(&locator, descriptor))
            .collect())
    }

    /// Every current match as `T`, best first
    pub fn instances<T: Service>(&self) -> DiResult<Vec<Arc<T>>> {
        let (locator, found) = self.candidates()?;
        let mut all = Vec::with_capacity(found.len());
        for descriptor in found {
            if let Some(instance) = locator.instance_for(&descriptor, None)? {
                all.push(downcast_instance(instance)?);
            }
        }
        Ok(all)
    }

    /// Live iteration; each step re-queries and yields the best match not
    /// seen yet
    pub fn iter(&self) -> Iter {
        Iter {
            provider: self.clone(),
            yielded: FxHashSet::default(),
            done: false,
        }
    }
}

impl fmt::Debug for IterableProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterableProvider")
            .field("injectee", &self.injectee.to_string())
            .finish()
    }
}

impl IntoIterator for &IterableProvider {
    type Item = DiResult<ServiceHandle>;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

pub struct Iter {
    provider: IterableProvider,
    yielded: FxHashSet<DescriptorKey>,
    done: bool,
}

impl Iterator for Iter {
    type Item = DiResult<ServiceHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (locator, found) = match self.provider.candidates() {
            Ok(found) => found,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        match found.into_iter().find(|d| !self.yielded.contains(&d.key())) {
            Some(descriptor) => {
                self.yielded.insert(descriptor.key());
                Some(Ok(ServiceHandle::new(&locator, descriptor)))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
