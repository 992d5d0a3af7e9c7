//! Watch-driven reconciliation.
//!
//! A [`Controller`] pumps the watch feed of one resource type into a local
//! mirror, decides per event whether the touched key needs work, and lets a
//! small worker pool run an idempotent reconcile callback against the
//! mirrored state. Failed keys are retried with per-key exponential backoff;
//! keys observed again without a version change are not re-enqueued.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    hash::Hash,
    panic,
    sync::Arc,
};

use futures::{stream::BoxStream, StreamExt};
use kube_core::Resource;
use kube_runtime::{reflector, watcher};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{key::QualifiedName, lister::Lister, queue::WorkQueue};

pub mod informer;
pub use informer::Informer;

/// Tuning knobs for [`Controller::with_options`].
#[derive(Clone, Debug)]
pub struct Options {
    /// Number of concurrent reconcile workers. Zero means the default.
    pub workers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

/// Why a controller run ended abnormally.
///
/// A run that ends because its cancellation token fired drains the work
/// queue and returns `Ok(())` instead.
#[derive(Debug, Error)]
pub enum RunError {
    /// Cancelled before the first complete object listing was mirrored.
    #[error("cancelled while waiting for initial object sync")]
    SyncInterrupted,
    /// The mirror store dropped its readiness signal during initial sync.
    #[error("mirror store closed before initial sync completed")]
    MirrorClosed,
    /// The watch feed ended, so the mirror can no longer be kept current.
    #[error("object feed closed")]
    FeedClosed,
}

/// Drives a reconcile callback from the watch feed of the resource type `K`.
///
/// The callback receives the parsed work key and the current mirrored object,
/// or `None` once the object is gone so deletions can be cleaned up after.
/// Returning an error requeues the key with backoff; returning `Ok` clears
/// its retry history.
pub struct Controller<K: Resource, F>
where
    K: Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
{
    name: String,
    writer: reflector::store::Writer<K>,
    events: BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>,
    dyntype: K::DynamicType,
    queue: Arc<WorkQueue<String>>,
    reconcile: Arc<F>,
    options: Options,
    last_seen: HashMap<String, String>,
}

impl<K, F, Fut, E> Controller<K, F>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Hash + Eq + Clone + Send + Sync + 'static,
    F: Fn(QualifiedName, Option<Arc<K>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Debug + Send + 'static,
{
    pub fn new(name: impl Into<String>, informer: Informer<K>, reconcile: F) -> Self {
        Self::with_options(name, informer, Options::default(), reconcile)
    }

    pub fn with_options(
        name: impl Into<String>,
        informer: Informer<K>,
        mut options: Options,
        reconcile: F,
    ) -> Self {
        if options.workers == 0 {
            options.workers = Options::default().workers;
        }
        let (writer, events, dyntype) = informer.into_parts();
        Self {
            name: name.into(),
            writer,
            events,
            dyntype,
            queue: Arc::new(WorkQueue::new()),
            reconcile: Arc::new(reconcile),
            options,
            last_seen: HashMap::new(),
        }
    }

    /// A read handle onto the mirror this controller keeps current.
    pub fn store(&self) -> reflector::Store<K> {
        self.writer.as_reader()
    }

    pub fn lister(&self) -> Lister<K> {
        Lister::with(self.store(), self.dyntype.clone())
    }

    /// Runs until `cancel` fires or the feed fails.
    ///
    /// Blocks first until the initial object listing is mirrored, then keeps
    /// pumping the feed while workers reconcile. On cancellation no further
    /// keys are accepted, but queued and in-flight keys are finished before
    /// this returns.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), RunError> {
        let store = self.writer.as_reader();

        log::info!("{}: waiting for initial object sync", self.name);
        {
            let ready = store.wait_until_ready();
            tokio::pin!(ready);
            loop {
                // readiness must win over a feed that ends right after the
                // initial listing, so keys accepted during sync still drain
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RunError::SyncInterrupted),
                    ready = &mut ready => {
                        ready.map_err(|_| RunError::MirrorClosed)?;
                        break;
                    }
                    event = self.events.next() => match event {
                        Some(Ok(event)) => self.observe(event),
                        Some(Err(err)) => log::warn!("{}: watch feed error: {err}", self.name),
                        None => return Err(RunError::FeedClosed),
                    },
                }
            }
        }

        log::info!(
            "{}: initial sync complete, starting {} workers",
            self.name,
            self.options.workers
        );
        let lister = Lister::with(store, self.dyntype.clone());
        let workers = (0..self.options.workers)
            .map(|index| {
                tokio::spawn(worker(
                    self.name.clone(),
                    index,
                    Arc::clone(&self.queue),
                    lister.clone(),
                    Arc::clone(&self.reconcile),
                ))
            })
            .collect();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                event = self.events.next() => match event {
                    Some(Ok(event)) => self.observe(event),
                    Some(Err(err)) => log::warn!("{}: watch feed error: {err}", self.name),
                    None => break Err(RunError::FeedClosed),
                },
            }
        };

        log::info!("{}: draining work queue", self.name);
        self.queue.shut_down();
        join_workers(workers).await;
        log::info!("{}: stopped", self.name);
        result
    }

    /// Applies one watch event to the mirror, then decides what to enqueue.
    ///
    /// First sight of a key and deletions always enqueue it; a re-observation
    /// enqueues only if the resource version moved. A restarted feed replays
    /// the full listing, so keys missing from it are enqueued as deletions.
    fn observe(&mut self, event: watcher::Event<K>) {
        self.writer.apply_watcher_event(&event);
        match event {
            watcher::Event::Applied(object) => {
                let key = QualifiedName::from_resource(&object).to_string();
                let version = object.meta().resource_version.clone().unwrap_or_default();
                if self.last_seen.get(&key) != Some(&version) {
                    self.last_seen.insert(key.clone(), version);
                    self.queue.add(key);
                }
            }
            watcher::Event::Deleted(object) => {
                let key = QualifiedName::from_resource(&object).to_string();
                self.last_seen.remove(&key);
                self.queue.add(key);
            }
            watcher::Event::Restarted(objects) => {
                let mut previous = std::mem::take(&mut self.last_seen);
                for object in &objects {
                    let key = QualifiedName::from_resource(object).to_string();
                    let version = object.meta().resource_version.clone().unwrap_or_default();
                    let changed = previous.remove(&key).map_or(true, |seen| seen != version);
                    self.last_seen.insert(key.clone(), version);
                    if changed {
                        self.queue.add(key);
                    }
                }
                // whatever did not come back was deleted while disconnected
                for (key, _) in previous {
                    self.queue.add(key);
                }
            }
        }
    }
}

async fn worker<K, F, Fut, E>(
    name: String,
    index: usize,
    queue: Arc<WorkQueue<String>>,
    lister: Lister<K>,
    reconcile: Arc<F>,
) where
    K: Resource + Clone + 'static,
    K::DynamicType: Hash + Eq + Clone,
    F: Fn(QualifiedName, Option<Arc<K>>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Debug,
{
    while let Some(key) = queue.next().await {
        let parsed = match QualifiedName::parse(&key) {
            Ok(parsed) => parsed,
            Err(err) => {
                // the key cannot become valid later, so never retry it
                log::error!("{name}: dropping malformed key: {err}");
                queue.forget(&key);
                queue.done(&key);
                continue;
            }
        };

        let object = match &parsed.namespace {
            Some(namespace) => lister.namespaced(namespace.clone()).get(&parsed.name),
            None => lister.get(&parsed.name),
        };

        match reconcile(parsed, object).await {
            Ok(()) => queue.forget(&key),
            Err(err) => {
                log::warn!("{name}: reconcile of {key} failed, requeueing: {err:?}");
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
    log::debug!("{name}: worker {index} stopped");
}

async fn join_workers(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if let Err(err) = worker.await {
            if let Ok(panic) = err.try_into_panic() {
                panic::resume_unwind(panic);
            }
        }
    }
}
