//! Re-encoding client wrapper.
//!
//! Serving a resource under a new schema while older clients still write the
//! previous one leaves two wire representations of the same objects.
//! [`TransformedClient`] bridges them: writes are converted into the backing
//! schema before they reach the server, reads are converted back before they
//! reach the caller. Watches are lenient where calls are strict: an event
//! payload that fails to convert is delivered as [`Bridged::Backing`] rather
//! than dropped, so consumers see every event even when they cannot decode
//! every payload.

use std::{any::type_name, sync::Arc};

use futures::StreamExt;
use kube_client::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams};
use kube_core::{Resource, WatchEvent};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{ResourceClient, ResourceList, WatchStream};

/// Converts an object from the backing schema into the native one.
pub type ToNative<T, R> = dyn Fn(&R) -> Result<T, ConvertError> + Send + Sync;
/// Converts an object from the native schema into the backing one.
pub type FromNative<T, R> = dyn Fn(&T) -> Result<R, ConvertError> + Send + Sync;

/// A conversion between the two schemas failed.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("cannot serialize {kind}: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot deserialize into {kind}: {source}")]
    Deserialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Other(String),
}

/// Why a bridged call failed.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("schema conversion failed: {0}")]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Client(#[from] kube_client::Error),
    #[error("{0} is not supported through the schema bridge")]
    Unsupported(&'static str),
}

/// A watch payload that may or may not have made it across the bridge.
///
/// Watch consumers tolerate payloads they cannot decode, so a conversion
/// failure keeps the event alive with the object as served instead of
/// failing the stream.
#[derive(Clone, Debug)]
pub enum Bridged<T, R> {
    /// The payload converted into the native schema.
    Native(T),
    /// The payload as served, kept because conversion failed.
    Backing(R),
}

impl<T, R> Bridged<T, R> {
    pub fn into_native(self) -> Option<T> {
        match self {
            Self::Native(native) => Some(native),
            Self::Backing(_) => None,
        }
    }
}

/// A [`ResourceClient`] for the native type `T` layered over a client for
/// the backing type `R`.
pub struct TransformedClient<T, R, C>
where
    T: 'static,
    R: 'static,
{
    client: C,
    to_native: Arc<ToNative<T, R>>,
    from_native: Arc<FromNative<T, R>>,
}

impl<T, R, C: Clone> Clone for TransformedClient<T, R, C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            to_native: Arc::clone(&self.to_native),
            from_native: Arc::clone(&self.from_native),
        }
    }
}

impl<T, R, C> TransformedClient<T, R, C> {
    pub fn new(
        client: C,
        to_native: impl Fn(&R) -> Result<T, ConvertError> + Send + Sync + 'static,
        from_native: impl Fn(&T) -> Result<R, ConvertError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            to_native: Arc::new(to_native),
            from_native: Arc::new(from_native),
        }
    }
}

impl<T, R, C> TransformedClient<T, R, C>
where
    T: Resource + Serialize + DeserializeOwned + 'static,
    T::DynamicType: Default,
    R: Resource + Serialize + DeserializeOwned + 'static,
    R::DynamicType: Default,
{
    /// Bridges two representations that share their JSON wire format apart
    /// from the `apiVersion` label.
    pub fn json_bridged(client: C) -> Self {
        let native_version = T::api_version(&<_>::default()).into_owned();
        let backing_version = R::api_version(&<_>::default()).into_owned();
        Self::new(
            client,
            move |backing: &R| json_convert(backing, &native_version),
            move |native: &T| json_convert(native, &backing_version),
        )
    }
}

impl<T, R, C: ResourceClient<R>> TransformedClient<T, R, C> {
    pub async fn create(&self, pp: &PostParams, object: &T) -> Result<T, BridgeError> {
        let backing = (self.from_native)(object)?;
        let created = self.client.create(pp, &backing).await?;
        Ok((self.to_native)(&created)?)
    }

    pub async fn update(&self, pp: &PostParams, object: &T) -> Result<T, BridgeError> {
        let backing = (self.from_native)(object)?;
        let updated = self.client.update(pp, &backing).await?;
        Ok((self.to_native)(&updated)?)
    }

    pub async fn get(&self, name: &str) -> Result<T, BridgeError> {
        let backing = self.client.get(name).await?;
        Ok((self.to_native)(&backing)?)
    }

    /// Lists and converts every item. One unconvertible item fails the whole
    /// call: a partial listing would silently hide objects from the caller.
    pub async fn list(&self, lp: &ListParams) -> Result<ResourceList<T>, BridgeError> {
        let list = self.client.list(lp).await?;
        let mut items = Vec::with_capacity(list.items.len());
        for item in &list.items {
            items.push((self.to_native)(item)?);
        }
        Ok(ResourceList {
            metadata: list.metadata,
            items,
        })
    }

    pub async fn delete(&self, name: &str, dp: &DeleteParams) -> Result<(), BridgeError> {
        Ok(self.client.delete(name, dp).await?)
    }

    pub async fn delete_collection(
        &self,
        dp: &DeleteParams,
        lp: &ListParams,
    ) -> Result<(), BridgeError> {
        Ok(self.client.delete_collection(dp, lp).await?)
    }

    /// Starts a watch on the backing collection and converts each payload.
    pub async fn watch(
        &self,
        wp: &WatchParams,
        version: &str,
    ) -> Result<WatchStream<Bridged<T, R>>, BridgeError> {
        let events = self.client.watch(wp, version).await?;
        let to_native = Arc::clone(&self.to_native);
        Ok(events
            .map(move |result| result.map(|event| bridge_event(&*to_native, event)))
            .boxed())
    }

    /// Patches cannot be converted: a patch written against the native
    /// schema is not a meaningful patch of the backing document.
    pub async fn patch(
        &self,
        _name: &str,
        _pp: &PatchParams,
        _patch: &Patch<Value>,
    ) -> Result<T, BridgeError> {
        Err(BridgeError::Unsupported("patch"))
    }
}

fn bridge_event<T, R>(to_native: &ToNative<T, R>, event: WatchEvent<R>) -> WatchEvent<Bridged<T, R>> {
    match event {
        WatchEvent::Added(object) => WatchEvent::Added(bridge_object(to_native, object)),
        WatchEvent::Modified(object) => WatchEvent::Modified(bridge_object(to_native, object)),
        WatchEvent::Deleted(object) => WatchEvent::Deleted(bridge_object(to_native, object)),
        WatchEvent::Bookmark(bookmark) => WatchEvent::Bookmark(bookmark),
        WatchEvent::Error(err) => {
            log::warn!("passing a watch error event through the schema bridge: {err}");
            WatchEvent::Error(err)
        }
    }
}

fn bridge_object<T, R>(to_native: &ToNative<T, R>, object: R) -> Bridged<T, R> {
    match to_native(&object) {
        Ok(native) => Bridged::Native(native),
        Err(err) => {
            log::warn!("delivering a watch payload unconverted: {err}");
            Bridged::Backing(object)
        }
    }
}

/// Re-encodes `source` through JSON, rewriting a non-empty `apiVersion` to
/// `api_version` on the way. An absent or empty label is left alone so the
/// round trip stays faithful for partially filled objects.
pub fn json_convert<S, D>(source: &S, api_version: &str) -> Result<D, ConvertError>
where
    S: Serialize,
    D: DeserializeOwned,
{
    let mut value = serde_json::to_value(source).map_err(|source| ConvertError::Serialize {
        kind: type_name::<S>(),
        source,
    })?;
    if let Some(version) = value.get_mut("apiVersion") {
        if version.as_str().is_some_and(|version| !version.is_empty()) {
            *version = Value::String(api_version.to_owned());
        }
    }
    serde_json::from_value(value).map_err(|source| ConvertError::Deserialize {
        kind: type_name::<D>(),
        source,
    })
}
