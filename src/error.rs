//! Error taxonomy for the service-activator runtime.

use thiserror::Error;

/// Errors that may be returned by the channel, message pump, or dispatcher.
#[derive(Debug, Error)]
pub enum Error {
    /// The channel cannot be used: the underlying gateway failed after its
    /// own bounded retry policy gave up, or the channel has already been
    /// stopped.
    #[error("channel failure: {0}")]
    ChannelFailure(String),

    /// A fatal, non-recoverable misconfiguration: no mapper registered for
    /// an incoming message, or an unknown consumer name passed to
    /// [`crate::dispatcher::Dispatcher::open`].
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An illegal dispatcher state transition was requested (e.g. `open`
    /// outside of the states it is valid in).
    #[error("messaging error: {0}")]
    Messaging(String),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error a [`crate::request::RequestDispatcher`] returns when it wants
/// the [`crate::pump::MessagePump`] to requeue the message rather than
/// acknowledge it.
///
/// Any other error returned from `send`/`publish` is treated as an ordinary
/// handler failure: it is logged and the message is still acknowledged, so
/// that a misbehaving handler cannot block the queue forever (dead-lettering
/// is left to an external collaborator).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Requeue this message; it may succeed on redelivery.
    #[error("handler requested redelivery")]
    Defer,

    /// The handler failed for some other reason. The message will still be
    /// acknowledged and dropped; this is logged for forensic use.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    /// Wraps an arbitrary handler error as a [`DispatchError::Handler`].
    pub fn handler(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(Box::new(error))
    }
}
