//! Middleware connecting the store to the epic runtime.
//!
//! For every dispatched event the epic middleware lets the reducer run, then
//! publishes the resulting state and the event itself. The live epic's output
//! is pumped back into the store on the same scheduler, so a handler's
//! synchronous output is dispatched only after the triggering event has
//! reached every subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};

use futures::future;
use futures::stream::{BoxStream, StreamExt};
use futures::task::{waker_ref, ArcWake};
use tracing::{debug, error, info, warn};

use crate::channel::{EventChannel, StateChannel};
use crate::epic::Epic;
use crate::error::{EngineError, HandlerFailure};
use crate::runtime::RuntimeEpic;
use crate::scheduler::Scheduler;
use crate::store::{Middleware, Next, StoreHandle};
use crate::traits::Event;

type ErrorHook<E> = Arc<dyn Fn(&HandlerFailure) -> Option<E> + Send + Sync>;
type Output<E> = BoxStream<'static, Result<E, HandlerFailure>>;

// ---------------------------------------------------------------------------
// Pump: drives the merged handler output on the scheduler
// ---------------------------------------------------------------------------

/// Polls a merged output stream from scheduler tasks. Its waker enqueues a
/// poll, so values produced later (timers, I/O) re-enter through the queue.
struct Pump<E, S> {
    output: Mutex<Option<Output<E>>>,
    store: StoreHandle<E, S>,
    on_error: Option<ErrorHook<E>>,
    scheduler: Scheduler,
    queued: AtomicBool,
}

impl<E, S> Pump<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn new(
        output: Output<E>,
        store: StoreHandle<E, S>,
        on_error: Option<ErrorHook<E>>,
        scheduler: Scheduler,
    ) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(Some(output)),
            store,
            on_error,
            scheduler,
            queued: AtomicBool::new(false),
        })
    }

    fn schedule_poll(self: &Arc<Self>) {
        if self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let pump = self.clone();
        self.scheduler.schedule(move || pump.poll_once());
    }

    /// Take at most one event, dispatch it, then requeue behind whatever
    /// that dispatch enqueued.
    fn poll_once(self: &Arc<Self>) {
        self.queued.store(false, Ordering::Release);

        let item = {
            let mut output = self.lock_output();
            let Some(stream) = output.as_mut() else {
                return;
            };
            let waker = waker_ref(self);
            let mut cx = Context::from_waker(&waker);
            match stream.poll_next_unpin(&mut cx) {
                Poll::Pending => return,
                Poll::Ready(None) => {
                    *output = None;
                    debug!("epic output completed");
                    return;
                }
                Poll::Ready(Some(item)) => item,
            }
        };

        match item {
            Ok(event) => self.store.dispatch(event),
            Err(failure) => self.report(failure),
        }
        self.schedule_poll();
    }

    fn report(&self, failure: HandlerFailure) {
        let message = format!("{:#}", failure.error);
        error!(
            kind = failure.kind,
            handler = %failure.handler_id,
            error = %message,
            "epic handler failed"
        );
        if let Some(hook) = &self.on_error {
            if let Some(event) = hook(&failure) {
                self.store.dispatch(event);
            }
        }
    }

    fn stop(&self) {
        // Dropping the stream outside the lock: its destructors may wake us.
        let output = self.lock_output().take();
        drop(output);
    }

    fn lock_output(&self) -> MutexGuard<'_, Option<Output<E>>> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E, S> ArcWake for Pump<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule_poll();
    }
}

/// The installed epic: its runtime plus the pump feeding the store.
struct ActiveEpic<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    runtime: RuntimeEpic<E, S>,
    pump: Arc<Pump<E, S>>,
}

impl<E, S> ActiveEpic<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn teardown(&self) {
        self.runtime.teardown();
        self.pump.stop();
    }
}

impl<E, S> Drop for ActiveEpic<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

// ---------------------------------------------------------------------------
// EpicMiddleware
// ---------------------------------------------------------------------------

struct EpicBus<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    scheduler: Scheduler,
    actions: EventChannel<E>,
    states: StateChannel<S>,
    store: OnceLock<StoreHandle<E, S>>,
    active: Mutex<Option<ActiveEpic<E, S>>>,
    on_error: Option<ErrorHook<E>>,
}

impl<E, S> EpicBus<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveEpic<E, S>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs as a scheduler task, so installs never interleave with each
    /// other or with a delivery.
    fn install(&self, epic: Epic<E, S>, store: StoreHandle<E, S>) {
        self.retire();

        let runtime = RuntimeEpic::activate(epic, &self.actions);
        let epic_end = self
            .actions
            .stream()
            .filter(|event| future::ready(event.is_epic_end()))
            .boxed()
            .into_future();
        let output = runtime
            .run(&self.states)
            .take_until(async move {
                epic_end.await;
                warn!("EPIC_END observed, epic output stopped");
            })
            .boxed();

        let pump = Pump::new(output, store, self.on_error.clone(), self.scheduler.clone());
        *self.lock_active() = Some(ActiveEpic {
            runtime,
            pump: pump.clone(),
        });
        pump.schedule_poll();
    }

    /// Tear down the installed epic, if any.
    fn retire(&self) {
        let previous = self.lock_active().take();
        if let Some(previous) = previous {
            previous.teardown();
        }
    }
}

/// Store middleware that runs epics.
///
/// Clones share the same channels and the same active-epic slot. Use
/// [`EpicMiddleware::runner`] to install epics once the middleware has been
/// added to a store.
pub struct EpicMiddleware<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    bus: Arc<EpicBus<E, S>>,
}

impl<E, S> Clone for EpicMiddleware<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
        }
    }
}

impl<E, S> Default for EpicMiddleware<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, S> EpicMiddleware<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::build(Scheduler::new(), None)
    }

    /// Handler failures are always logged. With a hook, each failure is also
    /// passed to `hook`; an event it returns is dispatched like handler
    /// output.
    pub fn with_error_hook(hook: impl Fn(&HandlerFailure) -> Option<E> + Send + Sync + 'static) -> Self {
        Self::build(Scheduler::new(), Some(Arc::new(hook)))
    }

    fn build(scheduler: Scheduler, on_error: Option<ErrorHook<E>>) -> Self {
        Self {
            bus: Arc::new(EpicBus {
                actions: EventChannel::new(scheduler.clone()),
                states: StateChannel::new(scheduler.clone(), None),
                scheduler,
                store: OnceLock::new(),
                active: Mutex::new(None),
                on_error,
            }),
        }
    }

    pub fn runner(&self) -> EpicRunner<E, S> {
        EpicRunner {
            bus: self.bus.clone(),
        }
    }

    /// Every event that passed through the middleware, after reduction.
    pub fn actions(&self) -> &EventChannel<E> {
        &self.bus.actions
    }

    /// Distinct state snapshots, starting with the store's initial state.
    pub fn states(&self) -> &StateChannel<S> {
        &self.bus.states
    }

    /// The queue every delivery and handler poll runs on. Pass it to
    /// `StoreBuilder::with_scheduler` to put dispatches on the same queue.
    pub fn scheduler(&self) -> &Scheduler {
        &self.bus.scheduler
    }
}

impl<E, S> Middleware<E, S> for EpicMiddleware<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn bind(&self, store: &StoreHandle<E, S>) {
        if self.bus.store.set(store.clone()).is_err() {
            warn!("epic middleware is already bound to a store; ignoring the new one");
            return;
        }
        if let Some(state) = store.state() {
            self.bus.states.publish(state);
        }
    }

    fn dispatch(&self, store: &StoreHandle<E, S>, event: E, next: Next<'_, E, S>) {
        next.run(event.clone());
        if let Some(state) = store.state() {
            self.bus.states.publish(state);
        }
        self.bus.actions.publish(event);
    }
}

/// Installs and removes epics on an [`EpicMiddleware`].
pub struct EpicRunner<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    bus: Arc<EpicBus<E, S>>,
}

impl<E, S> Clone for EpicRunner<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
        }
    }
}

impl<E, S> EpicRunner<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    /// Replace the running epic with `epic`.
    ///
    /// The previous epic's router and output are torn down before the new
    /// epic's router is subscribed. The swap runs on the scheduler: called
    /// from outside a dispatch it completes before returning, called from a
    /// handler it happens after the current delivery.
    pub fn run(&self, epic: Epic<E, S>) -> Result<(), EngineError> {
        let store = self.bus.store.get().cloned().ok_or(EngineError::NotBound)?;
        info!(handlers = epic.len(), "installing epic");
        let bus = self.bus.clone();
        self.bus
            .scheduler
            .schedule(move || bus.install(epic, store));
        Ok(())
    }

    /// Tear down the running epic without installing another.
    pub fn stop(&self) {
        let bus = self.bus.clone();
        self.bus.scheduler.schedule(move || bus.retire());
    }

    pub fn is_running(&self) -> bool {
        self.bus.lock_active().is_some()
    }
}

// ---------------------------------------------------------------------------
// TracingMiddleware
// ---------------------------------------------------------------------------

/// Logs every dispatched event and whether it changed the state.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

impl<E, S> Middleware<E, S> for TracingMiddleware
where
    E: Event,
    S: Send + Sync + 'static,
{
    fn dispatch(&self, store: &StoreHandle<E, S>, event: E, next: Next<'_, E, S>) {
        let before = store.state();
        let kind = event.event_type();
        debug!(kind, ?event, "dispatching");
        next.run(event);
        let changed = match (before, store.state()) {
            (Some(before), Some(after)) => !Arc::ptr_eq(&before, &after),
            _ => false,
        };
        info!(kind, changed, "dispatched");
    }
}
