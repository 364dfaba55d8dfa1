//! Runtime activation of an epic against a live event channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use crate::channel::{EventChannel, Multicast, StateChannel, Subscription};
use crate::epic::{Epic, HandlerDefinition};
use crate::error::HandlerFailure;
use crate::traits::Event;

/// An epic wired to an event channel.
///
/// Activation creates one routing sub-channel per registered kind plus a
/// catch-all, and a single router subscription on the event channel that
/// forwards each event to the sub-channel of its kind. `teardown` releases
/// the router.
pub struct RuntimeEpic<E, S> {
    epic: Arc<Epic<E, S>>,
    actions: EventChannel<E>,
    routes: Arc<HashMap<&'static str, Multicast<E>>>,
    fallback: Multicast<E>,
    router: Mutex<Option<Subscription>>,
}

impl<E, S> RuntimeEpic<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
{
    pub fn activate(epic: Epic<E, S>, actions: &EventChannel<E>) -> Self {
        let routes: Arc<HashMap<&'static str, Multicast<E>>> =
            Arc::new(epic.kinds().map(|kind| (kind, Multicast::new())).collect());
        let fallback = Multicast::new();

        let router = {
            let routes = routes.clone();
            let fallback = fallback.clone();
            actions.subscribe(move |event: &E| {
                let kind = event.event_type();
                match routes.get(kind) {
                    Some(route) => {
                        debug!(kind, "routing event");
                        route.emit(event);
                    }
                    None => fallback.emit(event),
                }
            })
        };

        info!(kinds = routes.len(), handlers = epic.len(), "epic activated");
        Self {
            epic: Arc::new(epic),
            actions: actions.clone(),
            routes,
            fallback,
            router: Mutex::new(Some(router)),
        }
    }

    /// Subscribe every handler and merge their outputs.
    ///
    /// Handlers are invoked in registry order. Outputs are interleaved as they
    /// produce values. A handler whose output yields an error contributes that
    /// failure to the merged stream and nothing after it.
    pub fn run(&self, states: &StateChannel<S>) -> BoxStream<'static, Result<E, HandlerFailure>> {
        let outputs: Vec<_> = self
            .epic
            .definitions()
            .map(|definition| self.start(definition, states))
            .collect();
        stream::select_all(outputs).boxed()
    }

    fn start(
        &self,
        definition: &HandlerDefinition<E, S>,
        states: &StateChannel<S>,
    ) -> BoxStream<'static, Result<E, HandlerFailure>> {
        let input = match self.routes.get(definition.kind()) {
            Some(route) => route.stream(),
            None => stream::empty().boxed(),
        };
        let output = definition.call(input, states.clone(), self.actions.clone());

        let kind = definition.kind();
        let handler_id = definition.id().to_string();
        // The inner stream is dropped as soon as it fails.
        stream::unfold(Some(output), move |output| {
            let handler_id = handler_id.clone();
            async move {
                let mut output = output?;
                match output.next().await? {
                    Ok(event) => Some((Ok(event), Some(output))),
                    Err(error) => {
                        let failure = HandlerFailure {
                            kind,
                            handler_id,
                            error,
                        };
                        Some((Err(failure), None))
                    }
                }
            }
        })
        .boxed()
    }

    /// Release the router subscription. Safe to call more than once.
    pub fn teardown(&self) {
        let router = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(router) = router {
            router.unsubscribe();
            info!(handlers = self.epic.len(), "epic torn down");
        }
    }

    pub fn is_active(&self) -> bool {
        self.router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Subscribe to events whose kind has no registered handler.
    pub fn unrouted(&self) -> BoxStream<'static, E> {
        self.fallback.stream()
    }
}
