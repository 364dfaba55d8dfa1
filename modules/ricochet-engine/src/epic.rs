//! Handler registry.
//!
//! An `Epic` maps event kinds to the handlers that react to them. Epics are
//! built from handler definitions, combined hierarchically, and never mutated
//! after construction.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::channel::{EventChannel, StateChannel};
use crate::error::EngineError;
use crate::traits::{Event, EventStream, HandlerOutput};

type HandlerFn<E, S> =
    Arc<dyn Fn(EventStream<E>, StateChannel<S>, EventChannel<E>) -> HandlerOutput<E> + Send + Sync>;

/// One handler bound to one event kind.
pub struct HandlerDefinition<E, S> {
    kind: &'static str,
    id: String,
    handler: HandlerFn<E, S>,
}

impl<E, S> Clone for HandlerDefinition<E, S> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            id: self.id.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<E, S> fmt::Debug for HandlerDefinition<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDefinition")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<E, S> HandlerDefinition<E, S> {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invoke the handler: `events` carries only this definition's kind,
    /// `states` the store snapshots, `actions` every dispatched event.
    pub fn call(
        &self,
        events: EventStream<E>,
        states: StateChannel<S>,
        actions: EventChannel<E>,
    ) -> HandlerOutput<E> {
        (self.handler)(events, states, actions)
    }
}

/// Define a stream-to-stream handler for `kind`.
///
/// `id` identifies the handler in logs and failure reports and must be
/// unique within an epic.
pub fn handle_async<E, S, F>(kind: &'static str, id: impl Into<String>, handler: F) -> HandlerDefinition<E, S>
where
    F: Fn(EventStream<E>, StateChannel<S>, EventChannel<E>) -> HandlerOutput<E> + Send + Sync + 'static,
{
    HandlerDefinition {
        kind,
        id: id.into(),
        handler: Arc::new(handler),
    }
}

/// Define a handler that maps each event of `kind`, together with the state
/// snapshot current at that moment, to zero or more follow-up events.
pub fn handle_each<E, S, F>(kind: &'static str, id: impl Into<String>, f: F) -> HandlerDefinition<E, S>
where
    E: Event,
    S: Send + Sync + 'static,
    F: Fn(E, Option<Arc<S>>) -> anyhow::Result<Vec<E>> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    handle_async(kind, id, move |events, states: StateChannel<S>, _actions| {
        let f = f.clone();
        events
            .flat_map(move |event| {
                let emitted: Vec<anyhow::Result<E>> = match f(event, states.current()) {
                    Ok(events) => events.into_iter().map(Ok).collect(),
                    Err(err) => vec![Err(err)],
                };
                stream::iter(emitted)
            })
            .boxed()
    })
}

/// Insertion-ordered mapping from event kind to handlers.
pub struct Epic<E, S> {
    kinds: Vec<(&'static str, Vec<HandlerDefinition<E, S>>)>,
}

impl<E, S> Clone for Epic<E, S> {
    fn clone(&self) -> Self {
        Self {
            kinds: self.kinds.clone(),
        }
    }
}

impl<E, S> fmt::Debug for Epic<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.kinds.iter().map(|(kind, defs)| (kind, defs)))
            .finish()
    }
}

impl<E, S> Default for Epic<E, S> {
    fn default() -> Self {
        Self { kinds: Vec::new() }
    }
}

impl<E, S> Epic<E, S> {
    /// Group definitions by kind. Argument order becomes the handler order
    /// within each kind; kinds are ordered by first appearance.
    pub fn build(
        definitions: impl IntoIterator<Item = HandlerDefinition<E, S>>,
    ) -> Result<Self, EngineError> {
        let mut epic = Self::default();
        let mut ids = HashSet::new();
        for definition in definitions {
            epic.push(definition, &mut ids)?;
        }
        Ok(epic)
    }

    fn push(
        &mut self,
        definition: HandlerDefinition<E, S>,
        ids: &mut HashSet<String>,
    ) -> Result<(), EngineError> {
        if definition.kind.is_empty() {
            return Err(EngineError::EmptyKind {
                handler_id: definition.id,
            });
        }
        if !ids.insert(definition.id.clone()) {
            return Err(EngineError::DuplicateHandler {
                kind: definition.kind,
                handler_id: definition.id,
            });
        }
        match self.kinds.iter_mut().find(|(kind, _)| *kind == definition.kind) {
            Some((_, handlers)) => handlers.push(definition),
            None => self.kinds.push((definition.kind, vec![definition])),
        }
        Ok(())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().map(|(kind, _)| *kind)
    }

    pub fn handlers_for(&self, kind: &str) -> &[HandlerDefinition<E, S>] {
        self.kinds
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, handlers)| handlers.as_slice())
            .unwrap_or(&[])
    }

    /// Every definition, kind by kind, in registry order.
    pub fn definitions(&self) -> impl Iterator<Item = &HandlerDefinition<E, S>> + '_ {
        self.kinds.iter().flat_map(|(_, handlers)| handlers.iter())
    }

    pub fn len(&self) -> usize {
        self.kinds.iter().map(|(_, handlers)| handlers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Merge epics by concatenating their per-kind handler lists in argument
/// order. Associative, so module epics can be combined first and the results
/// combined again at the root.
pub fn combine_epics<E, S>(epics: impl IntoIterator<Item = Epic<E, S>>) -> Result<Epic<E, S>, EngineError> {
    Epic::build(epics.into_iter().flat_map(|epic| {
        epic.kinds
            .into_iter()
            .flat_map(|(_, handlers)| handlers.into_iter())
    }))
}
