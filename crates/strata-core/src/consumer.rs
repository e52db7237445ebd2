//! Subscription handles.
//!
//! A [`Consumer`] receives batches of entities pushed by a backend through
//! its [`ConsumerSet`]. Each consumer has its own unbounded queue so a slow
//! reader never blocks the publisher. Disposal is idempotent and only stops
//! future delivery; batches already queued can still be drained.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

type DisposedCallback = Box<dyn FnOnce(Uuid) + Send>;

/// Shared disposal state for one consumer.
#[derive(Clone)]
pub struct ConsumerHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    disposed: AtomicBool,
    signal: watch::Sender<bool>,
    on_disposed: Mutex<Vec<DisposedCallback>>,
}

impl ConsumerHandle {
    fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::now_v7(),
                disposed: AtomicBool::new(false),
                signal,
                on_disposed: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Stop delivery. Safe to call any number of times from any thread;
    /// callbacks run exactly once.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.signal.send_replace(true);
        let callbacks = std::mem::take(
            &mut *self
                .inner
                .on_disposed
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for callback in callbacks {
            callback(self.inner.id);
        }
        tracing::debug!(consumer_id = %self.inner.id, "consumer disposed");
    }

    /// Register a callback run once on disposal. Runs immediately if the
    /// consumer is already disposed.
    pub fn on_disposed(&self, callback: impl FnOnce(Uuid) + Send + 'static) {
        if self.is_disposed() {
            callback(self.inner.id);
            return;
        }
        self.inner
            .on_disposed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.inner.signal.subscribe()
    }
}

/// A live subscription returned by `subscribe()`.
pub struct Consumer<T> {
    handle: ConsumerHandle,
    receiver: mpsc::UnboundedReceiver<Vec<T>>,
}

impl<T> Consumer<T> {
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// A cloneable handle that can dispose this consumer from elsewhere.
    pub fn handle(&self) -> ConsumerHandle {
        self.handle.clone()
    }

    pub fn dispose(&self) {
        self.handle.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_disposed()
    }

    /// Wait for the next batch. Returns `None` once the consumer is disposed
    /// (or its backend shut down) and the queue is drained.
    pub async fn recv(&mut self) -> Option<Vec<T>> {
        if let Ok(batch) = self.receiver.try_recv() {
            return Some(batch);
        }

        // Subscribe before checking so a concurrent dispose is never missed.
        let mut disposed = self.handle.watch();
        if self.handle.is_disposed() {
            return None;
        }
        tokio::select! {
            batch = self.receiver.recv() => batch,
            _ = disposed.changed() => self.receiver.try_recv().ok(),
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Vec<T>> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.handle.dispose();
    }
}

// ---------------------------------------------------------------------------
// Consumer set
// ---------------------------------------------------------------------------

struct Subscriber<T> {
    sender: mpsc::UnboundedSender<Vec<T>>,
    handle: ConsumerHandle,
}

/// The consumers attached to one backend instance.
pub struct ConsumerSet<T> {
    subscribers: Mutex<HashMap<Uuid, Subscriber<T>>>,
}

impl<T: Clone + Send + 'static> ConsumerSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Open a new consumer. It only sees batches pushed after this call.
    pub fn subscribe(&self) -> Consumer<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ConsumerHandle::new();
        self.lock().insert(
            handle.id(),
            Subscriber {
                sender,
                handle: handle.clone(),
            },
        );
        tracing::debug!(consumer_id = %handle.id(), "consumer subscribed");
        Consumer { handle, receiver }
    }

    /// Deliver `batch` to every live consumer, pruning disposed ones.
    /// Returns the number of consumers that received it.
    pub fn push(&self, batch: &[T]) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let mut subscribers = self.lock();
        subscribers.retain(|_, s| !s.handle.is_disposed() && !s.sender.is_closed());
        let mut delivered = 0;
        for subscriber in subscribers.values() {
            if subscriber.sender.send(batch.to_vec()).is_ok() {
                delivered += 1;
            }
        }
        tracing::trace!(receivers = delivered, size = batch.len(), "batch pushed to consumers");
        delivered
    }

    /// Dispose and drop every consumer.
    pub fn close_all(&self) {
        let drained: Vec<Subscriber<T>> = self.lock().drain().map(|(_, s)| s).collect();
        for subscriber in drained {
            subscriber.handle.dispose();
        }
    }

    /// Number of consumers still attached.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|s| !s.handle.is_disposed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Subscriber<T>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> Default for ConsumerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn consumers_receive_independently() {
        let set = ConsumerSet::new();
        let mut a = set.subscribe();
        let mut b = set.subscribe();
        assert_ne!(a.id(), b.id());

        assert_eq!(set.push(&[1, 2]), 2);
        assert_eq!(a.recv().await, Some(vec![1, 2]));
        assert_eq!(b.recv().await, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn late_consumer_sees_only_new_batches() {
        let set = ConsumerSet::new();
        set.push(&[1]);
        let mut late = set.subscribe();
        assert!(late.try_recv().is_none());
        set.push(&[2]);
        assert_eq!(late.recv().await, Some(vec![2]));
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_stops_delivery() {
        let set = ConsumerSet::new();
        let mut consumer = set.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        consumer
            .handle()
            .on_disposed(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        consumer.dispose();
        consumer.dispose();
        consumer.handle().dispose();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(set.push(&[1]), 0);
        assert!(set.is_empty());
        assert_eq!(consumer.recv().await, None);
    }

    #[tokio::test]
    async fn recv_wakes_on_dispose() {
        let set: ConsumerSet<u8> = ConsumerSet::new();
        let mut consumer = set.subscribe();
        let handle = consumer.handle();
        let waiter = tokio::spawn(async move { consumer.recv().await });
        tokio::task::yield_now().await;
        handle.dispose();
        let received = waiter.await.expect("task must not panic");
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn close_all_disposes_everyone() {
        let set: ConsumerSet<u8> = ConsumerSet::new();
        let a = set.subscribe();
        let b = set.subscribe();
        set.close_all();
        assert!(a.is_disposed());
        assert!(b.is_disposed());
    }
}
