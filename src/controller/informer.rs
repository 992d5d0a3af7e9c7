use std::{fmt::Debug, hash::Hash};

use futures::{stream::BoxStream, Stream, StreamExt};
use kube_client::Api;
use kube_core::Resource;
use kube_runtime::{reflector, watcher};
use serde::de::DeserializeOwned;

use crate::lister::Lister;

/// The event feed and mirror store a [`Controller`](super::Controller)
/// consumes.
///
/// The feed must deliver the ordered watch events of one resource type; the
/// mirror is only ever mutated by applying those events in order.
pub struct Informer<K: Resource>
where
    K: Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    writer: reflector::store::Writer<K>,
    events: BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>,
    dyntype: K::DynamicType,
}

impl<K: Resource> Informer<K>
where
    K: Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    /// Watches all objects the `client` can see.
    pub fn new(client: Api<K>, watcher_config: watcher::Config) -> Self
    where
        K: Debug + DeserializeOwned + Send,
        K::DynamicType: Default,
    {
        Self::with(client, watcher_config, <_>::default())
    }

    /// Watches all objects of the type `dyntype`.
    pub fn with(client: Api<K>, watcher_config: watcher::Config, dyntype: K::DynamicType) -> Self
    where
        K: Debug + DeserializeOwned + Send,
    {
        let events = watcher(client, watcher_config).boxed();
        Self::from_stream(events, dyntype)
    }

    /// Uses an already constructed event feed instead of a live watch.
    pub fn from_stream<S>(events: S, dyntype: K::DynamicType) -> Self
    where
        S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
    {
        Self {
            writer: reflector::store::Writer::new(dyntype.clone()),
            events: events.boxed(),
            dyntype,
        }
    }

    /// A read handle onto the mirror, shareable before the controller starts.
    ///
    /// The store is empty until the controller finishes its initial sync.
    pub fn store(&self) -> reflector::Store<K> {
        self.writer.as_reader()
    }

    /// A [`Lister`] over the mirror.
    pub fn lister(&self) -> Lister<K> {
        Lister::with(self.store(), self.dyntype.clone())
    }

    pub(super) fn into_parts(
        self,
    ) -> (
        reflector::store::Writer<K>,
        BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>,
        K::DynamicType,
    ) {
        (self.writer, self.events, self.dyntype)
    }
}
