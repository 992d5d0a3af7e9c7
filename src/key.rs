//! Work keys identifying one object of the reconciled type.

use std::fmt;
use std::str::FromStr;

use kube_core::Resource;
use thiserror::Error;

/// Uniquely identifies an object of a known type by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn from_resource<K: Resource>(resource: &K) -> Self {
        Self {
            namespace: resource.meta().namespace.clone(),
            name: resource.meta().name.clone().unwrap(),
        }
    }

    /// Parses a `namespace/name` or bare `name` key.
    ///
    /// A key that fails to parse can never become valid later,
    /// so callers should drop it rather than retry it.
    pub fn parse(key: &str) -> Result<Self, ParseKeyError> {
        let malformed = || ParseKeyError { key: key.to_owned() };

        let mut parts = key.split('/');
        let first = parts.next().ok_or_else(malformed)?;
        match (parts.next(), parts.next()) {
            (None, _) if !first.is_empty() => Ok(Self {
                namespace: None,
                name: first.to_owned(),
            }),
            (Some(name), None) if !first.is_empty() && !name.is_empty() => Ok(Self {
                namespace: Some(first.to_owned()),
                name: name.to_owned(),
            }),
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for QualifiedName {
    type Err = ParseKeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        Self::parse(key)
    }
}

/// A work key that does not have the `namespace/name` or `name` shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected key format {key:?}")]
pub struct ParseKeyError {
    /// The rejected key.
    pub key: String,
}
