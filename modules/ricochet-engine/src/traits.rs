//! Core traits for the epic runtime.

use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;

/// Reserved event kind. Once an event of this kind is dispatched, the live
/// epic stops feeding handler output back into the store.
pub const EPIC_END: &str = "EPIC_END";

/// Events carry a kind string used for routing.
///
/// Implement this on an enum, one kind per variant. The kind of a value must
/// never change, since it decides which handlers see the event.
pub trait Event: Clone + fmt::Debug + Send + Sync + 'static {
    /// The routing kind, e.g. `"counter/increment"`.
    fn event_type(&self) -> &'static str;

    fn is_epic_end(&self) -> bool {
        self.event_type() == EPIC_END
    }
}

/// Pure state updates. No I/O, no side effects.
///
/// Returning the input `Arc` unchanged signals a no-op; state subscribers are
/// only notified when the returned snapshot is a different allocation.
pub trait Reducer<E, S>: Send + Sync {
    fn reduce(&self, state: &Arc<S>, event: &E) -> Arc<S>;
}

impl<E, S, F> Reducer<E, S> for F
where
    F: Fn(&Arc<S>, &E) -> Arc<S> + Send + Sync,
{
    fn reduce(&self, state: &Arc<S>, event: &E) -> Arc<S> {
        self(state, event)
    }
}

/// Events flowing into a handler.
pub type EventStream<E> = BoxStream<'static, E>;

/// Events flowing out of a handler. An `Err` ends that handler's output.
pub type HandlerOutput<E> = BoxStream<'static, anyhow::Result<E>>;
