//! Memoized schema lookup.
//!
//! Admission needs the structural schema served for a (group, version, kind)
//! on every request, but resolving one means listing custom resource
//! definitions. [`SchemaCache`] memoizes both answers and refusals, and
//! invalidates coarsely from a definition watch: any event for a definition
//! drops every cached version of its kind.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, JSONSchemaProps,
};
use kube_core::GroupVersionKind;
use kube_runtime::watcher;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod crd;

/// Identifies one served version of a kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl SchemaKey {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn from_gvk(gvk: &GroupVersionKind) -> Self {
        Self::new(gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Why no schema could be produced for a key.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no definition serves kind {kind} in group {group:?}")]
    UnknownKind { group: String, kind: String },
    #[error("kind {kind} in group {group:?} does not serve version {version}")]
    UnknownVersion {
        group: String,
        kind: String,
        version: String,
    },
    #[error("version {version} of kind {kind} in group {group:?} carries no structural schema")]
    MissingSchema {
        group: String,
        kind: String,
        version: String,
    },
    #[error("listing definitions failed: {0}")]
    List(String),
}

/// Produces the schema served for one key.
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    async fn resolve(&self, key: &SchemaKey) -> Result<JSONSchemaProps, ResolveError>;
}

/// Memoizes a [`SchemaResolver`] per key.
///
/// Refusals are cached like answers: a kind that resolves to "unknown" stays
/// unknown until a definition event for its group and kind purges the entry,
/// so repeated requests for a bogus kind do not hammer the resolver.
pub struct SchemaCache<R> {
    resolver: R,
    entries: RwLock<HashMap<SchemaKey, Result<Arc<JSONSchemaProps>, ResolveError>>>,
}

impl<R: SchemaResolver> SchemaCache<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, key: &SchemaKey) -> Result<Arc<JSONSchemaProps>, ResolveError> {
        if let Some(entry) = self.entries.read().get(key) {
            return entry.clone();
        }
        log::debug!("resolving schema for {key}");
        // Resolution happens outside the lock, so concurrent misses on one
        // key may resolve redundantly. Last write wins, and both writes
        // carry the same answer.
        let entry = self.resolver.resolve(key).await.map(Arc::new);
        self.entries.write().insert(key.clone(), entry.clone());
        entry
    }

    /// Drops every cached version of `kind` in `group`.
    ///
    /// A definition event does not say which served versions changed, so all
    /// of them are re-resolved on next use.
    pub fn purge(&self, group: &str, kind: &str) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.group != group || key.kind != kind);
        let dropped = before - entries.len();
        if dropped > 0 {
            log::debug!("purged {dropped} cached schemas for {kind}.{group}");
        }
    }

    /// Applies a definition watch to the cache until `cancel` fires or the
    /// feed ends. Adds, updates and deletes all purge: whichever way a
    /// definition moved, the cached answers for its kind are stale.
    pub async fn run<S>(&self, cancel: CancellationToken, mut definitions: S)
    where
        S: Stream<Item = Result<CustomResourceDefinition, watcher::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                definition = definitions.next() => match definition {
                    Some(Ok(definition)) => {
                        self.purge(&definition.spec.group, &definition.spec.names.kind);
                    }
                    Some(Err(err)) => log::warn!("definition watch error: {err}"),
                    None => break,
                },
            }
        }
    }
}
