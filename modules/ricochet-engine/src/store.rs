//! The dispatcher.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::debug;

use crate::scheduler::Scheduler;
use crate::traits::{Event, Reducer};

/// Hook into the dispatch path.
///
/// `bind` is called once when the store is built. `dispatch` sees every event
/// and decides whether and when to hand it to the rest of the chain through
/// `next`; the last link is the reducer.
pub trait Middleware<E, S>: Send + Sync {
    fn bind(&self, _store: &StoreHandle<E, S>) {}

    fn dispatch(&self, store: &StoreHandle<E, S>, event: E, next: Next<'_, E, S>);
}

/// The remainder of the middleware chain.
pub struct Next<'a, E, S> {
    store: &'a Arc<StoreInner<E, S>>,
    index: usize,
}

impl<E, S> Next<'_, E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    pub fn run(self, event: E) {
        StoreInner::dispatch_from(self.store, self.index, event);
    }
}

struct StoreInner<E, S> {
    reducer: Box<dyn Reducer<E, S>>,
    state: RwLock<Arc<S>>,
    middleware: Vec<Arc<dyn Middleware<E, S>>>,
    scheduler: Scheduler,
}

impl<E, S> StoreInner<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    /// Each dispatch runs the whole chain as one scheduler task, so two
    /// dispatches never interleave between reduce and publish.
    fn enqueue(this: &Arc<Self>, event: E) {
        let inner = this.clone();
        this.scheduler
            .schedule(move || Self::dispatch_from(&inner, 0, event));
    }

    fn dispatch_from(this: &Arc<Self>, index: usize, event: E) {
        match this.middleware.get(index) {
            Some(middleware) => {
                let handle = StoreHandle {
                    inner: Arc::downgrade(this),
                };
                let next = Next {
                    store: this,
                    index: index + 1,
                };
                middleware.dispatch(&handle, event, next);
            }
            None => this.reduce(&event),
        }
    }

    fn reduce(&self, event: &E) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = self.reducer.reduce(&state, event);
        if !Arc::ptr_eq(&next, &state) {
            *state = next;
        }
    }

    fn state(&self) -> Arc<S> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Holds the current state and runs dispatched events through the middleware
/// chain into the reducer.
///
/// Dispatches are serialized on the store's scheduler. A dispatch made while
/// that scheduler is draining (from a subscriber, a handler, or another
/// thread) is queued and has not been reduced yet when `dispatch` returns.
pub struct Store<E, S> {
    inner: Arc<StoreInner<E, S>>,
}

impl<E, S> Store<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    pub fn new(reducer: impl Reducer<E, S> + 'static, initial: S) -> Self {
        Self::builder(reducer, initial).build()
    }

    /// A store starting from `S::default()`.
    pub fn with_default(reducer: impl Reducer<E, S> + 'static) -> Self
    where
        S: Default,
    {
        Self::new(reducer, S::default())
    }

    pub fn builder(reducer: impl Reducer<E, S> + 'static, initial: S) -> StoreBuilder<E, S> {
        StoreBuilder {
            reducer: Box::new(reducer),
            initial: Arc::new(initial),
            middleware: Vec::new(),
            scheduler: Scheduler::new(),
        }
    }

    pub fn dispatch(&self, event: E) {
        debug!(kind = event.event_type(), "dispatch");
        StoreInner::enqueue(&self.inner, event);
    }

    pub fn state(&self) -> Arc<S> {
        self.inner.state()
    }

    pub fn handle(&self) -> StoreHandle<E, S> {
        StoreHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

pub struct StoreBuilder<E, S> {
    reducer: Box<dyn Reducer<E, S>>,
    initial: Arc<S>,
    middleware: Vec<Arc<dyn Middleware<E, S>>>,
    scheduler: Scheduler,
}

impl<E, S> StoreBuilder<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    /// Append a middleware. The first one added sees events first.
    pub fn with_middleware(mut self, middleware: impl Middleware<E, S> + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Queue dispatches on `scheduler`, typically the one the epic
    /// middleware delivers on, so the whole pipeline shares a single queue.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn build(self) -> Store<E, S> {
        let store = Store {
            inner: Arc::new(StoreInner {
                reducer: self.reducer,
                state: RwLock::new(self.initial),
                middleware: self.middleware,
                scheduler: self.scheduler,
            }),
        };
        let handle = store.handle();
        for middleware in &store.inner.middleware {
            middleware.bind(&handle);
        }
        store
    }
}

/// Non-owning dispatcher handle given to middleware. Once the store is
/// dropped, dispatching through a handle does nothing.
pub struct StoreHandle<E, S> {
    inner: Weak<StoreInner<E, S>>,
}

impl<E, S> Clone for StoreHandle<E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E, S> StoreHandle<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    pub fn dispatch(&self, event: E) {
        match self.inner.upgrade() {
            Some(inner) => {
                debug!(kind = event.event_type(), "dispatch");
                StoreInner::enqueue(&inner, event);
            }
            None => debug!(kind = event.event_type(), "store dropped, event discarded"),
        }
    }

    pub fn state(&self) -> Option<Arc<S>> {
        self.inner.upgrade().map(|inner| inner.state())
    }
}
