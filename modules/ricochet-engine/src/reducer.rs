//! Reducers assembled from per-kind update functions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::{Event, Reducer};

type Case<E, S> = Box<dyn Fn(&mut S, &E) + Send + Sync>;

/// Builds a `KindReducer`.
///
/// ```ignore
/// let reducer = ReducerBuilder::new()
///     .on("counter/increment", |state: &mut Counter, event: &CounterEvent| {
///         if let CounterEvent::Increment { by } = event {
///             state.count += by;
///         }
///     })
///     .build();
/// ```
pub struct ReducerBuilder<E, S> {
    cases: HashMap<&'static str, Vec<Case<E, S>>>,
}

impl<E, S> Default for ReducerBuilder<E, S> {
    fn default() -> Self {
        Self {
            cases: HashMap::new(),
        }
    }
}

impl<E, S> ReducerBuilder<E, S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an update for `kind`. Several updates for one kind run in
    /// registration order against the same copy of the state.
    pub fn on(mut self, kind: &'static str, update: impl Fn(&mut S, &E) + Send + Sync + 'static) -> Self {
        self.cases.entry(kind).or_default().push(Box::new(update));
        self
    }

    pub fn build(self) -> KindReducer<E, S> {
        KindReducer { cases: self.cases }
    }
}

/// Copy-on-write reducer keyed by event kind.
///
/// Events of a kind with no registered update return the input snapshot
/// itself. Otherwise the state is cloned, every update for the kind is
/// applied, and a new snapshot is returned.
pub struct KindReducer<E, S> {
    cases: HashMap<&'static str, Vec<Case<E, S>>>,
}

impl<E, S> KindReducer<E, S> {
    pub fn handles(&self, kind: &str) -> bool {
        self.cases.contains_key(kind)
    }
}

impl<E, S> Reducer<E, S> for KindReducer<E, S>
where
    E: Event,
    S: Clone + Send + Sync,
{
    fn reduce(&self, state: &Arc<S>, event: &E) -> Arc<S> {
        let Some(cases) = self.cases.get(event.event_type()) else {
            return state.clone();
        };
        let mut next = S::clone(state);
        for case in cases {
            case(&mut next, event);
        }
        Arc::new(next)
    }
}

type SliceStep<E, S> = Box<dyn Fn(&S, &mut Option<S>, &E) + Send + Sync>;

/// Reducer over a state made of `Arc` slices, each with its own reducer.
///
/// Slices run in registration order and each sees the output of the ones
/// before it. The root is shallow-cloned only when some slice returns a new
/// snapshot; if none does, the input `Arc` is returned as is.
///
/// ```ignore
/// let root = RootReducer::new()
///     .slice(|s: &App| &s.counter, |s: &mut App| &mut s.counter, counter_reducer)
///     .slice(|s: &App| &s.audit, |s: &mut App| &mut s.audit, audit_log);
/// ```
pub struct RootReducer<E, S> {
    slices: Vec<SliceStep<E, S>>,
}

impl<E, S> Default for RootReducer<E, S> {
    fn default() -> Self {
        Self { slices: Vec::new() }
    }
}

impl<E, S> RootReducer<E, S>
where
    E: 'static,
    S: Clone + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slice. `get` and `get_mut` locate it in the root; `reducer` can
    /// be a `KindReducer` over the slice type or any other `Reducer`.
    pub fn slice<T>(
        mut self,
        get: fn(&S) -> &Arc<T>,
        get_mut: fn(&mut S) -> &mut Arc<T>,
        reducer: impl Reducer<E, T> + 'static,
    ) -> Self
    where
        T: 'static,
    {
        self.slices.push(Box::new(move |root: &S, next: &mut Option<S>, event: &E| {
            let current = get(next.as_ref().unwrap_or(root)).clone();
            let updated = reducer.reduce(&current, event);
            if !Arc::ptr_eq(&current, &updated) {
                *get_mut(next.get_or_insert_with(|| root.clone())) = updated;
            }
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

impl<E, S> Reducer<E, S> for RootReducer<E, S>
where
    S: Send + Sync,
{
    fn reduce(&self, state: &Arc<S>, event: &E) -> Arc<S> {
        let mut next = None;
        for slice in &self.slices {
            slice(state, &mut next, event);
        }
        next.map(Arc::new).unwrap_or_else(|| state.clone())
    }
}
