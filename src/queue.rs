//! Deduplicating, retrying work queue.
//!
//! Each key moves through an explicit lifecycle: absent, queued, processing,
//! and queued-again when it was re-added while a worker held it. Adding a key
//! that is already queued is a no-op, and adding a key that is currently
//! processing marks it for exactly one re-run once the worker is done, so
//! concurrent producers fold into at most one pending entry per key and no
//! two workers ever hold the same key.

use std::{
    collections::{HashSet, VecDeque},
    hash::Hash,
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::Notify;

pub mod rate_limit;
pub use rate_limit::RateLimiter;

pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    wake: Notify,
    limiter: RateLimiter<T>,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::with_rate_limiter(RateLimiter::default())
    }

    pub fn with_rate_limiter(limiter: RateLimiter<T>) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            wake: Notify::new(),
            limiter,
        }
    }

    /// Number of keys waiting to be delivered, excluding those being processed.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting new keys and wakes all waiting workers.
    ///
    /// Keys already queued or being processed are still handed out and
    /// finished; [`next`](Self::next) returns `None` once the queue is empty.
    /// Backoff re-adds that have not fired yet are dropped.
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.wake.notify_waiters();
    }
}

impl<T: Clone + Eq + Hash> WorkQueue<T> {
    /// Enqueues `key` unless it is already pending.
    ///
    /// If a worker currently holds `key`, it is marked dirty instead and
    /// replayed once that worker calls [`done`](Self::done).
    pub fn add(&self, key: T) {
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            if !state.dirty.insert(key.clone()) {
                return;
            }
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.wake.notify_waiters();
    }

    /// Enqueues `key` after its next backoff delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: T)
    where
        T: Send + Sync + 'static,
    {
        let delay = self.limiter.next_delay(&key);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Clears the backoff history of `key` after a successful run.
    pub fn forget(&self, key: &T) {
        self.limiter.forget(key);
    }

    /// Delivers the next key, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue was shut down and drained. The caller
    /// must call [`done`](Self::done) with the delivered key.
    pub async fn next(&self) -> Option<T> {
        loop {
            // register the waiter before inspecting state, so an add or
            // shutdown between the check and the await still wakes us
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Releases `key` after processing it, replaying it if it was re-added
    /// while held.
    pub fn done(&self, key: &T) {
        let replayed = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if replayed {
            self.wake.notify_waiters();
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    #[tokio::test]
    async fn duplicate_adds_fold_into_one_delivery() {
        let queue = WorkQueue::new();
        queue.add("ns1/foo".to_owned());
        queue.add("ns1/foo".to_owned());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.next().await.as_deref(), Some("ns1/foo"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn readd_while_processing_replays_after_done() {
        let queue = WorkQueue::new();
        queue.add("k".to_owned());
        let key = queue.next().await.unwrap();

        // the key is held by a worker, so it must not be delivered again yet
        queue.add("k".to_owned());
        queue.add("k".to_owned());
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn distinct_keys_are_delivered_independently() {
        let queue = WorkQueue::new();
        queue.add("a".to_owned());
        queue.add("b".to_owned());
        let first = queue.next().await.unwrap();
        let second = queue.next().await.unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("a", "b"));
    }

    #[tokio::test]
    async fn next_wakes_on_add() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.next().await }
        });
        tokio::task::yield_now().await;

        queue.add("k".to_owned());
        assert_eq!(waiter.await.unwrap().as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_workers() {
        let queue = Arc::new(WorkQueue::<String>::new());
        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.next().await }
        });
        tokio::task::yield_now().await;

        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_keys_and_drops_new_ones() {
        let queue = WorkQueue::new();
        queue.add("a".to_owned());
        queue.add("b".to_owned());
        queue.shut_down();
        queue.add("c".to_owned());

        assert_eq!(queue.next().await.as_deref(), Some("a"));
        assert_eq!(queue.next().await.as_deref(), Some("b"));
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn dirty_key_still_replays_during_drain() {
        let queue = WorkQueue::new();
        queue.add("k".to_owned());
        let key = queue.next().await.unwrap();
        queue.add("k".to_owned());
        queue.shut_down();

        queue.done(&key);
        assert_eq!(queue.next().await.as_deref(), Some("k"));
        queue.done(&key);
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_back_off_per_key() {
        let queue = Arc::new(WorkQueue::new());
        let started = Instant::now();

        queue.add_rate_limited("k".to_owned());
        assert!(queue.is_empty());
        let key = queue.next().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(5));
        queue.done(&key);

        queue.add_rate_limited("k".to_owned());
        let key = queue.next().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(15));
        queue.done(&key);

        queue.forget(&key);
        queue.add_rate_limited("k".to_owned());
        queue.next().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }
}
