//! The two ports between a decoded wire [`Message`] and user handler code.
//!
//! Grounded on the `mapper_func`/`command_processor` callables threaded
//! through `original_source/brightside/message_pump.py::MessagePump` and
//! `original_source/brightside/dispatch.py::Performer`, and on
//! `kanin`'s own `Handler` trait for the async-trait-over-a-port idiom. The
//! handler registry itself (what a `RequestDispatcher` does with a request
//! once it has one) stays an external collaborator, out of scope here.

use async_trait::async_trait;

use crate::error::{DispatchError, Error};
use crate::message::Message;

/// Pure translation from a wire [`Message`] into a typed request.
///
/// May only fail with [`Error::Configuration`] (there is no mapping
/// registered for the message's topic); any other failure mode is a bug in
/// the mapper, not a property of the message.
pub trait RequestMapper<Req>: Send + Sync {
    fn map(&self, message: &Message) -> Result<Req, Error>;
}

impl<Req, F> RequestMapper<Req> for F
where
    F: Fn(&Message) -> Result<Req, Error> + Send + Sync,
{
    fn map(&self, message: &Message) -> Result<Req, Error> {
        self(message)
    }
}

/// Where a mapped request goes next: a command processor, a pub/sub bus,
/// whatever the embedding application registers handlers against.
///
/// `send` is used for [`crate::message::MessageType::Command`] requests
/// (point-to-point, exactly one handler); `publish` is used for
/// [`crate::message::MessageType::Event`] requests (broadcast, zero or more
/// handlers). Returning [`DispatchError::Defer`] asks the pump to requeue
/// the message instead of acknowledging it; any other error is logged and
/// the message is still acknowledged.
#[async_trait]
pub trait RequestDispatcher<Req>: Send + Sync {
    async fn send(&self, request: Req) -> Result<(), DispatchError>;

    async fn publish(&self, request: Req) -> Result<(), DispatchError>;
}
