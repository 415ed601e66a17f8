//! Injection resolution
//!
//! Turns a reified injectee into the value delivered to it. Candidates come
//! from the querying locator and its ancestors, best first; when nothing
//! matches, just-in-time resolvers get one chance to bind something, then
//! greedy resolution may bind the requested class itself.

use std::sync::Arc;
use tracing::trace;

use crate::container::ServiceLocator;
use crate::context::Dependents;
use crate::descriptor::Descriptor;
use crate::error::{DiError, DiResult};
use crate::filter::ServiceFilter;
use crate::handle::ServiceHandle;
use crate::injectee::{Injectee, Injection, InjectionKind};
use crate::iterable::IterableProvider;
use crate::proxy::Proxy;

/// Filter equivalent of an injectee's contract and qualifier requirements
pub(crate) fn injectee_filter(injectee: &Injectee) -> ServiceFilter {
    let filter = ServiceFilter::contract(injectee.required()).qualified_all(injectee.qualifiers());
    match injectee.unqualified() {
        Some(excluded) => filter.unqualified(excluded),
        None => filter,
    }
}

/// Matching descriptors visible to `injectee`, best first
pub(crate) fn candidates(locator: &ServiceLocator, injectee: &Injectee) -> DiResult<Vec<Arc<Descriptor>>> {
    locator.query(&injectee_filter(injectee), Some(injectee))
}

/// Best candidate, after just-in-time and greedy fallbacks
pub(crate) fn best_candidate(locator: &ServiceLocator, injectee: &Injectee) -> DiResult<Option<Arc<Descriptor>>> {
    if let Some(best) = candidates(locator, injectee)?.into_iter().next() {
        return Ok(Some(best));
    }
    if locator.run_jit_resolvers(injectee)? {
        trace!("just-in-time resolver bound a candidate for {}", injectee);
        if let Some(best) = candidates(locator, injectee)?.into_iter().next() {
            return Ok(Some(best));
        }
    }
    if locator.config().greedy_resolution && locator.bind_greedy(injectee.required())? {
        trace!("greedily bound {}", injectee.required());
        return Ok(candidates(locator, injectee)?.into_iter().next());
    }
    Ok(None)
}

/// The value for one injection point
pub(crate) fn resolve(locator: &ServiceLocator, injectee: &Injectee, root: Option<&Dependents>) -> DiResult<Injection> {
    if injectee.is_self() {
        return match injectee.owner().and_then(|owner| owner.descriptor()) {
            Some(descriptor) => Ok(Injection::Descriptor(descriptor)),
            None => Err(DiError::IllegalSelfInjection {
                injectee: injectee.to_string(),
                reason: "the owner is not managed by a descriptor".to_string(),
            }),
        };
    }
    if injectee.required().request_issues().is_some() {
        return Err(DiError::InvalidGenericRequest {
            required: injectee.required().to_string(),
            injectee: injectee.to_string(),
        });
    }

    match injectee.kind() {
        InjectionKind::Provider | InjectionKind::Iterable => {
            Ok(Injection::Provider(IterableProvider::new(locator, injectee.clone())))
        }
        kind @ (InjectionKind::Direct | InjectionKind::Handle) => {
            let Some(best) = best_candidate(locator, injectee)? else {
                return if injectee.is_optional() {
                    Ok(Injection::Absent)
                } else {
                    Err(injectee.unsatisfied())
                };
            };
            if kind == InjectionKind::Handle {
                return Ok(Injection::Handle(ServiceHandle::new(locator, best)));
            }
            if locator.should_proxy(&best, injectee)? {
                trace!("injecting proxy of {} into {}", best, injectee);
                return Ok(Injection::Proxy(Proxy::new(locator, best)));
            }
            Ok(match locator.instance_for(&best, root)? {
                Some(instance) => Injection::Instance(instance),
                None => Injection::Absent,
            })
        }
    }
}
