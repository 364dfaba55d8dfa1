//! Epic runtime.
//!
//! A store reduces dispatched events into immutable state snapshots. The epic
//! middleware publishes every (state, event) pair onto queued channels, routes
//! events to handlers registered per kind, and feeds the handlers' output
//! events back into the store: dispatch → reduce → publish → route → redispatch.
//!
//! Consumers define their domain by implementing `Event` (a kind per variant)
//! and `Reducer` (pure state updates), and register handlers in an `Epic`.

pub mod channel;
pub mod epic;
pub mod error;
pub mod middleware;
pub mod reducer;
pub mod runtime;
pub mod scheduler;
pub mod selector;
pub mod store;
pub mod traits;

pub use channel::{EventChannel, Multicast, StateChannel, Subscription};
pub use epic::{combine_epics, handle_async, handle_each, Epic, HandlerDefinition};
pub use error::{EngineError, HandlerFailure};
pub use middleware::{EpicMiddleware, EpicRunner, TracingMiddleware};
pub use reducer::{KindReducer, ReducerBuilder, RootReducer};
pub use runtime::RuntimeEpic;
pub use scheduler::Scheduler;
pub use selector::{CombinedSelector, Dependencies, MemoSelector};
pub use store::{Middleware, Next, Store, StoreBuilder, StoreHandle};
pub use traits::{Event, EventStream, HandlerOutput, Reducer, EPIC_END};
