//! The wire-level envelope exchanged between a [`crate::gateway::ConsumerGateway`]
//! and the [`crate::pump::MessagePump`].
//!
//! Grounded on `original_source/brightside/messaging.py`
//! (`BrightsideMessage`/`BrightsideMessageHeader`/`BrightsideMessageBody`/
//! `BrightsideMessageType`), restructured as plain Rust value types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of payload a [`Message`] carries.
///
/// `None` is an empty poll result (the gateway timed out without a
/// delivery); `Quit` is the control-plane sentinel the dispatcher injects to
/// request cooperative shutdown; `Unacceptable` is produced by a gateway
/// that could not decode a delivery into a well-formed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// An empty poll result: the gateway timed out without a delivery.
    None,
    /// A point-to-point request, dispatched via [`crate::request::RequestDispatcher::send`].
    Command,
    /// A broadcast request, dispatched via [`crate::request::RequestDispatcher::publish`].
    Event,
    /// The control-plane sentinel requesting cooperative shutdown.
    Quit,
    /// A delivery the gateway could not decode into a well-formed message.
    Unacceptable,
}

/// Message metadata. The only field that changes after construction is the
/// handled count, which the pump bumps on every requeue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The topic (routing key) this message was received on or is destined for.
    pub topic: String,
    /// What kind of payload the body carries.
    pub message_type: MessageType,
    /// Identifier correlating this message with a prior request, if any.
    pub correlation_id: Option<Uuid>,
    /// Where a reply to this message, if any, should be sent.
    pub reply_to: Option<String>,
    /// The media type the body's bytes are encoded with.
    pub content_type: String,
    /// How many times this message has been handled (attempted). Bumped on
    /// every requeue.
    handled_count: u32,
}

impl Header {
    /// Builds a header for a fresh, never-redelivered message.
    pub fn new(topic: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            message_type,
            correlation_id: None,
            reply_to: None,
            content_type: "text/plain".to_string(),
            handled_count: 0,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn handled_count(&self) -> u32 {
        self.handled_count
    }
}

/// An opaque payload plus the media type it was encoded with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Body {
    /// The media type `bytes` is encoded with.
    pub content_type: String,
    /// The opaque payload itself.
    pub bytes: Vec<u8>,
}

impl Body {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// A single delivery as seen by the channel and pump: a header plus a body.
///
/// Two messages are equal iff their header ids match; the handled count and
/// body are not part of identity.
#[derive(Debug, Clone)]
pub struct Message {
    header: Header,
    body: Body,
}

impl Message {
    pub fn new(header: Header, body: Body) -> Self {
        Self { header, body }
    }

    /// A sentinel for an empty poll (gateway timed out, nothing delivered).
    pub fn none() -> Self {
        Self::new(Header::new("", MessageType::None), Body::empty())
    }

    /// The control-plane sentinel pushed onto a channel's pipeline to
    /// request cooperative shutdown.
    pub fn quit() -> Self {
        Self::new(Header::new("", MessageType::Quit), Body::empty())
    }

    /// A delivery the gateway could not decode into a well-formed message.
    pub fn unacceptable(topic: impl Into<String>) -> Self {
        Self::new(Header::new(topic, MessageType::Unacceptable), Body::empty())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn id(&self) -> Uuid {
        self.header.id
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Bumps the handled (redelivery) count. Called by the pump before a
    /// requeue.
    pub fn increment_handled_count(&mut self) {
        self.header.handled_count += 1;
    }

    /// True once the message has been handled (attempted) `cap` or more
    /// times.
    pub fn handled_count_reached(&self, cap: u32) -> bool {
        self.header.handled_count >= cap
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.header.id == other.header.id
    }
}

impl Eq for Message {}
