//! Qualifiers narrow which descriptor satisfies a request

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DiError, DiResult};

/// Name of the qualifier carried by named descriptors
pub const NAMED: &str = "Named";

/// An annotation-like discriminator with attribute values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier {
    name: Arc<str>,
    attributes: BTreeMap<String, String>,
}

impl Qualifier {
    /// A qualifier without attributes
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// The `Named(value)` qualifier
    pub fn named(value: impl Into<String>) -> Self {
        Self::new(NAMED).with("value", value)
    }

    /// Add an attribute value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn is_named(&self) -> bool {
        &*self.name == NAMED
    }

    /// Reject empty or non-identifier qualifier names
    pub fn validate(&self) -> DiResult<()> {
        let mut chars = self.name.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '.'));
        if !valid {
            return Err(DiError::InvalidArgument(format!(
                "invalid qualifier name '{}'",
                self.name
            )));
        }
        if self.is_named() && self.attribute("value").map_or(true, str::is_empty) {
            return Err(DiError::InvalidArgument(
                "Named qualifier requires a non-empty value".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.attributes.is_empty() {
            let parts: Vec<String> = self
                .attributes
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "({})", parts.join(", "))?;
        }
        Ok(())
    }
}

/// Whether every requested qualifier, attributes included, is carried
pub fn qualifiers_satisfied(requested: &[Qualifier], carried: &[Qualifier]) -> bool {
    requested.iter().all(|q| carried.contains(q))
}

/// Requested qualifiers that name the same qualifier with different attributes
pub fn conflicting_qualifiers(requested: &[Qualifier]) -> Option<(&Qualifier, &Qualifier)> {
    for (i, a) in requested.iter().enumerate() {
        for b in &requested[i + 1..] {
            if a.name == b.name && a.attributes != b.attributes {
                return Some((a, b));
            }
        }
    }
    None
}
