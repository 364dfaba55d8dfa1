use thiserror::Error;

/// Errors raised while composing or installing epics.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("handler {handler_id:?} was registered with an empty event kind")]
    EmptyKind { handler_id: String },

    #[error("handler {handler_id:?} is registered more than once (kind {kind:?})")]
    DuplicateHandler {
        kind: &'static str,
        handler_id: String,
    },

    #[error("epic middleware is not attached to a store")]
    NotBound,
}

/// A handler's output stream yielded an error. The handler contributes no
/// further events to the merged output after this.
#[derive(Error, Debug)]
#[error("handler {handler_id:?} (kind {kind:?}) failed: {error:#}")]
pub struct HandlerFailure {
    pub kind: &'static str,
    pub handler_id: String,
    pub error: anyhow::Error,
}
