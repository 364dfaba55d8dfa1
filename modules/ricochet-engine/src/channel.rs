//! Multicast channels.
//!
//! `Multicast` is a plain subscriber list delivering synchronously on the
//! caller's stack. `EventChannel` and `StateChannel` wrap it with a
//! `Scheduler` so that publishing only enqueues the delivery.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::channel::mpsc;
use futures::future;
use futures::stream::{BoxStream, StreamExt};

use crate::scheduler::Scheduler;

/// Whether a subscriber wants further deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Keep,
    Detach,
}

type Callback<T> = Arc<dyn Fn(&T) -> Delivery + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

/// Handle returned by `subscribe`. Dropping it does not unsubscribe; call
/// `unsubscribe` to stop deliveries.
#[must_use = "dropping a Subscription keeps the subscriber attached"]
pub struct Subscription {
    detach: Box<dyn FnOnce() + Send>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.detach)()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Subscription")
    }
}

/// Synchronous subscriber list, delivered in subscription order.
pub struct Multicast<T> {
    subscribers: Arc<Mutex<Subscribers<T>>>,
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T> Default for Multicast<T> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }
}

impl<T> Multicast<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.attach(Arc::new(move |value: &T| {
            callback(value);
            Delivery::Keep
        }));
        let subscribers: Weak<Mutex<Subscribers<T>>> = Arc::downgrade(&self.subscribers);
        Subscription {
            detach: Box::new(move || {
                if let Some(subscribers) = subscribers.upgrade() {
                    lock(&subscribers).entries.retain(|(entry, _)| *entry != id);
                }
            }),
        }
    }

    /// Subscribe with an unbounded stream. The subscriber detaches itself on
    /// the first delivery after the stream is dropped.
    pub fn stream(&self) -> BoxStream<'static, T> {
        let (tx, rx) = mpsc::unbounded();
        self.attach(sender_callback(tx));
        rx.boxed()
    }

    /// Deliver to every current subscriber, synchronously.
    pub fn emit(&self, value: &T) {
        self.deliver(self.snapshot(), value);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).entries.len()
    }

    fn attach(&self, callback: Callback<T>) -> u64 {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.entries.push((id, callback));
        id
    }

    fn snapshot(&self) -> Vec<(u64, Callback<T>)> {
        lock(&self.subscribers).entries.clone()
    }

    fn deliver(&self, targets: Vec<(u64, Callback<T>)>, value: &T) {
        // Callbacks run without the lock held; they may subscribe or publish.
        let mut detached = Vec::new();
        for (id, callback) in &targets {
            if callback(value) == Delivery::Detach {
                detached.push(*id);
            }
        }
        if !detached.is_empty() {
            lock(&self.subscribers)
                .entries
                .retain(|(id, _)| !detached.contains(id));
        }
    }
}

fn sender_callback<T>(tx: mpsc::UnboundedSender<T>) -> Callback<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |value: &T| {
        if tx.unbounded_send(value.clone()).is_ok() {
            Delivery::Keep
        } else {
            Delivery::Detach
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// EventChannel
// ---------------------------------------------------------------------------

/// Queued multicast of events.
///
/// `publish` captures the current subscriber list and enqueues the delivery
/// on the scheduler. Subscribers added later do not see the event; ones that
/// unsubscribe in the meantime still do. There is no replay.
pub struct EventChannel<E> {
    subscribers: Multicast<E>,
    scheduler: Scheduler,
}

impl<E> Clone for EventChannel<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<E> EventChannel<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            subscribers: Multicast::new(),
            scheduler,
        }
    }

    pub fn publish(&self, event: E) {
        let targets = self.subscribers.snapshot();
        let subscribers = self.subscribers.clone();
        self.scheduler
            .schedule(move || subscribers.deliver(targets, &event));
    }

    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(callback)
    }

    pub fn stream(&self) -> BoxStream<'static, E> {
        self.subscribers.stream()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.subscriber_count()
    }
}

// ---------------------------------------------------------------------------
// StateChannel
// ---------------------------------------------------------------------------

/// Holds the latest state snapshot and multicasts changes.
///
/// Publishing a snapshot that is pointer-identical to the held one is a
/// no-op. New subscribers receive the held snapshot immediately, then every
/// later distinct snapshot.
pub struct StateChannel<S> {
    current: Arc<Mutex<Option<Arc<S>>>>,
    subscribers: Multicast<Arc<S>>,
    scheduler: Scheduler,
}

impl<S> Clone for StateChannel<S> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            subscribers: self.subscribers.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<S> StateChannel<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(scheduler: Scheduler, initial: Option<Arc<S>>) -> Self {
        Self {
            current: Arc::new(Mutex::new(initial)),
            subscribers: Multicast::new(),
            scheduler,
        }
    }

    /// Store `state` and notify subscribers. Returns `false` when `state` is
    /// the snapshot already held.
    pub fn publish(&self, state: Arc<S>) -> bool {
        {
            let mut current = lock(&self.current);
            if current
                .as_ref()
                .is_some_and(|held| Arc::ptr_eq(held, &state))
            {
                return false;
            }
            *current = Some(state.clone());
        }
        let targets = self.subscribers.snapshot();
        let subscribers = self.subscribers.clone();
        self.scheduler
            .schedule(move || subscribers.deliver(targets, &state));
        true
    }

    pub fn current(&self) -> Option<Arc<S>> {
        lock(&self.current).clone()
    }

    pub fn subscribe(&self, callback: impl Fn(&Arc<S>) + Send + Sync + 'static) -> Subscription {
        if let Some(state) = self.current() {
            callback(&state);
        }
        self.subscribers.subscribe(callback)
    }

    pub fn stream(&self) -> BoxStream<'static, Arc<S>> {
        let (tx, rx) = mpsc::unbounded();
        if let Some(state) = self.current() {
            // The receiver is alive, so this cannot fail.
            let _ = tx.unbounded_send(state);
        }
        self.subscribers.attach(sender_callback(tx));
        rx.boxed()
    }

    /// Stream of a projection of the state, skipping values equal to the
    /// previous one.
    pub fn select<R, F>(&self, project: F) -> BoxStream<'static, R>
    where
        R: Clone + PartialEq + Send + 'static,
        F: Fn(&S) -> R + Send + 'static,
    {
        self.stream()
            .map(move |state| project(&state))
            .scan(None::<R>, |last, value| {
                let changed = last.as_ref() != Some(&value);
                if changed {
                    *last = Some(value.clone());
                }
                future::ready(Some(changed.then_some(value)))
            })
            .filter_map(future::ready)
            .boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.subscriber_count()
    }
}
