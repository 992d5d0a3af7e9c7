//! Typed access to one resource collection.
//!
//! [`ResourceClient`] is the narrow seam between this crate and the API
//! server. [`kube_client::Api`] implements it directly, and
//! [`transformed::TransformedClient`] wraps any implementation to re-encode
//! objects between two schemas of the same logical resource. Tests swap in
//! hand-rolled fakes.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use kube_client::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams},
    Result,
};
use kube_core::{ObjectList, Resource, WatchEvent};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub mod transformed;

/// Raw watch events for `K`, boxed so wrappers can re-map the items.
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

/// A listing of `K` with the collection metadata preserved.
#[derive(Clone, Debug, Default)]
pub struct ResourceList<K> {
    pub metadata: ListMeta,
    pub items: Vec<K>,
}

impl<K: Clone> From<ObjectList<K>> for ResourceList<K> {
    fn from(list: ObjectList<K>) -> Self {
        let ObjectList { metadata, items, .. } = list;
        Self { metadata, items }
    }
}

/// The operations this crate needs against one resource collection.
///
/// Deliberately smaller than [`Api`]: subresources and server-side apply are
/// not part of the seam, and `delete` maps the server's response to plain
/// success since callers here never inspect the tombstone.
#[async_trait]
pub trait ResourceClient<K>: Send + Sync {
    async fn create(&self, pp: &PostParams, object: &K) -> Result<K>;

    /// Replaces the object named in `object`'s metadata.
    async fn update(&self, pp: &PostParams, object: &K) -> Result<K>;

    async fn get(&self, name: &str) -> Result<K>;

    async fn list(&self, lp: &ListParams) -> Result<ResourceList<K>>;

    async fn delete(&self, name: &str, dp: &DeleteParams) -> Result<()>;

    async fn delete_collection(&self, dp: &DeleteParams, lp: &ListParams) -> Result<()>;

    /// Starts a raw watch at `version`.
    async fn watch(&self, wp: &WatchParams, version: &str) -> Result<WatchStream<K>>;

    async fn patch(&self, name: &str, pp: &PatchParams, patch: &Patch<Value>) -> Result<K>;
}

#[async_trait]
impl<K> ResourceClient<K> for Api<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn create(&self, pp: &PostParams, object: &K) -> Result<K> {
        Api::create(self, pp, object).await
    }

    async fn update(&self, pp: &PostParams, object: &K) -> Result<K> {
        let name = object.meta().name.clone().unwrap_or_default();
        Api::replace(self, &name, pp, object).await
    }

    async fn get(&self, name: &str) -> Result<K> {
        Api::get(self, name).await
    }

    async fn list(&self, lp: &ListParams) -> Result<ResourceList<K>> {
        Api::list(self, lp).await.map(ResourceList::from)
    }

    async fn delete(&self, name: &str, dp: &DeleteParams) -> Result<()> {
        Api::delete(self, name, dp).await.map(|_| ())
    }

    async fn delete_collection(&self, dp: &DeleteParams, lp: &ListParams) -> Result<()> {
        Api::delete_collection(self, dp, lp).await.map(|_| ())
    }

    async fn watch(&self, wp: &WatchParams, version: &str) -> Result<WatchStream<K>> {
        Ok(Api::watch(self, wp, version).await?.boxed())
    }

    async fn patch(&self, name: &str, pp: &PatchParams, patch: &Patch<Value>) -> Result<K> {
        Api::patch(self, name, pp, patch).await
    }
}
