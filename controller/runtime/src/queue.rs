use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::sync::Notify;

/// A per-key coalescing work queue.
///
/// While an item for key K is queued, duplicate enqueues are dropped. While
/// K is in flight, duplicate enqueues coalesce to exactly one future run
/// that starts after the in-flight reconcile finishes, so a key is never
/// reconciled concurrently with itself, and no signal is lost.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

struct State<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    in_flight: HashSet<K>,
    rerun: HashSet<K>,
}

impl<K: Clone + Eq + Hash> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    queued: HashSet::new(),
                    in_flight: HashSet::new(),
                    rerun: HashSet::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }
}

impl<K: Clone + Eq + Hash> WorkQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.in_flight.contains(&key) {
            state.rerun.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Dequeues the next key, waiting until one is available. The key is in
    /// flight until [`WorkQueue::done`] is called for it.
    pub async fn next(&self) -> K {
        loop {
            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    return key;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Marks a key's run finished; a rerun requested while it was in flight
    /// re-enqueues it exactly once.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.in_flight.remove(key);
        if state.rerun.remove(key) && state.queued.insert(key.clone()) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }
}
