//! Descriptor filters used by queries, unbinds and listeners

use std::fmt;
use std::sync::Arc;

use crate::descriptor::{Descriptor, ServiceId};
use crate::error::{DiError, DiResult};
use crate::qualifier::{conflicting_qualifiers, qualifiers_satisfied, Qualifier};
use crate::types::{contract_matches, IntoTypeRef, TypeHierarchy, TypeRef};

/// Predicate over descriptors
///
/// `advertised_contract` and `name` are index hints: when present, only
/// descriptors advertising that raw contract (or carrying that name) are
/// offered to `matches`.
pub trait Filter: Send + Sync {
    fn matches(&self, descriptor: &Descriptor, types: &TypeHierarchy) -> bool;

    fn advertised_contract(&self) -> Option<String> {
        None
    }

    fn name(&self) -> Option<&str> {
        None
    }

    /// Reject malformed filters before they reach the registry
    fn validate(&self) -> DiResult<()> {
        Ok(())
    }

    /// Key under which results may be cached; `None` disables caching
    fn cache_key(&self) -> Option<String> {
        None
    }
}

impl<F> Filter for F
where
    F: Fn(&Descriptor) -> bool + Send + Sync,
{
    fn matches(&self, descriptor: &Descriptor, _types: &TypeHierarchy) -> bool {
        self(descriptor)
    }
}

type Predicate = Arc<dyn Fn(&Descriptor) -> bool + Send + Sync>;

/// Declarative filter: contract, name, qualifiers and an optional predicate
#[derive(Clone, Default)]
pub struct ServiceFilter {
    contract: Option<Result<TypeRef, String>>,
    name: Option<String>,
    implementation: Option<String>,
    qualifiers: Vec<Qualifier>,
    unqualified: Option<Vec<String>>,
    service_id: Option<ServiceId>,
    predicate: Option<Predicate>,
}

impl ServiceFilter {
    /// Matches every descriptor
    pub fn all() -> Self {
        Self::default()
    }

    /// Descriptors advertising a contract matching `contract`
    pub fn contract(contract: impl IntoTypeRef) -> Self {
        Self {
            contract: Some(contract.into_type_ref().map_err(|e| e.to_string())),
            ..Self::default()
        }
    }

    /// Descriptors with this implementation name
    pub fn implementation(name: impl Into<String>) -> Self {
        Self {
            implementation: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn qualified_all(mut self, qualifiers: &[Qualifier]) -> Self {
        self.qualifiers.extend_from_slice(qualifiers);
        self
    }

    /// Only descriptors carrying none of `excluded` (no qualifiers at all when empty)
    pub fn unqualified(mut self, excluded: &[String]) -> Self {
        self.unqualified = Some(excluded.to_vec());
        self
    }

    pub fn service_id(mut self, id: ServiceId) -> Self {
        self.service_id = Some(id);
        self
    }

    /// Additional custom predicate; disables result caching
    pub fn with<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Descriptor) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn required_contract(&self) -> Option<&TypeRef> {
        self.contract.as_ref().and_then(|c| c.as_ref().ok())
    }
}

pub(crate) fn unqualified_allows(excluded: &[String], descriptor: &Descriptor) -> bool {
    if excluded.is_empty() {
        descriptor.qualifiers().is_empty()
    } else {
        !excluded.iter().any(|q| descriptor.has_qualifier(q))
    }
}

impl Filter for ServiceFilter {
    fn matches(&self, descriptor: &Descriptor, types: &TypeHierarchy) -> bool {
        if let Some(Ok(required)) = &self.contract {
            if !descriptor.contracts().iter().any(|c| contract_matches(required, c, types)) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if descriptor.name() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(implementation) = &self.implementation {
            if descriptor.implementation_name() != implementation {
                return false;
            }
        }
        if let Some(id) = self.service_id {
            if descriptor.service_id() != id {
                return false;
            }
        }
        if !qualifiers_satisfied(&self.qualifiers, descriptor.qualifiers()) {
            return false;
        }
        if let Some(excluded) = &self.unqualified {
            if !unqualified_allows(excluded, descriptor) {
                return false;
            }
        }
        self.predicate.as_ref().map_or(true, |p| p(descriptor))
    }

    fn advertised_contract(&self) -> Option<String> {
        self.required_contract().map(TypeRef::raw_name)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn validate(&self) -> DiResult<()> {
        if let Some(contract) = &self.contract {
            let ty = contract.as_ref().map_err(|e| DiError::InvalidArgument(e.clone()))?;
            if let Some(issue) = ty.request_issues() {
                return Err(DiError::InvalidArgument(format!("{}: {}", ty, issue)));
            }
        }
        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(DiError::InvalidArgument("filter name is empty".to_string()));
            }
        }
        if let Some((a, b)) = conflicting_qualifiers(&self.qualifiers) {
            return Err(DiError::InvalidArgument(format!(
                "conflicting qualifiers {} and {}",
                a, b
            )));
        }
        for q in &self.qualifiers {
            q.validate()?;
        }
        Ok(())
    }

    fn cache_key(&self) -> Option<String> {
        if self.predicate.is_some() {
            return None;
        }
        Some(format!("{:?}", self))
    }
}

impl fmt::Debug for ServiceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFilter")
            .field("contract", &self.contract)
            .field("name", &self.name)
            .field("implementation", &self.implementation)
            .field("qualifiers", &self.qualifiers)
            .field("unqualified", &self.unqualified)
            .field("service_id", &self.service_id)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
