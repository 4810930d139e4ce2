//! The broker-agnostic channel abstraction the message pump reads from.
//!
//! Grounded on `original_source/brightside/channels.py::Channel` almost
//! directly: same state machine, same `stop`/`end` semantics, same
//! priority-to-pipeline `receive` algorithm. The pipeline itself is a
//! bounded `tokio::sync::mpsc` channel, the async analogue of the sourced
//! `multiprocessing.Queue` pipeline, since a Performer is a tokio task
//! rather than an OS process here (see `performer.rs`). `receive` races the
//! pipeline against the gateway with `tokio::select! { biased; ... }` so
//! control messages are always drained first, the same `biased;` ordering
//! `kanin/src/app/task.rs::handler_task` uses to prioritize shutdown over
//! new deliveries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::gateway::ConsumerGateway;
use crate::message::Message;

/// The default bound for a channel's control pipeline. A handful of control
/// messages (stop, and whatever an embedding application injects) is all a
/// pipeline ever needs to hold.
pub const DEFAULT_PIPELINE_CAPACITY: usize = 8;

/// `Channel`'s lifecycle. `Stopped` is absorbing: once reached, `receive`
/// always fails with [`Error::ChannelFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Built but never polled yet.
    Initialized,
    /// Actively receiving; transitioned to on the first `receive` call.
    Started,
    /// QUIT has been posted; still draining in-flight work.
    Stopping,
    /// Permanently finished. `receive` always fails from here on.
    Stopped,
}

/// Creates the bounded control pipeline a [`Channel`] and its owning
/// [`crate::performer::Performer`] share: the performer keeps the sender
/// (as a [`PipelineHandle`]) to inject control messages from outside the
/// pump's task; the channel keeps the receiver.
pub fn pipeline(capacity: usize) -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
    mpsc::channel(capacity)
}

/// A cloneable handle onto a channel's control pipeline, held by whatever
/// owns the channel from the outside (typically a
/// [`crate::performer::Performer`]) so it can request shutdown without a
/// reference to the `Channel` value itself, which lives inside the pump's
/// task.
#[derive(Clone)]
pub struct PipelineHandle(mpsc::Sender<Message>);

impl PipelineHandle {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self(sender)
    }

    /// Posts the QUIT sentinel. The pump drains it ahead of any pending
    /// broker delivery and exits its loop.
    pub async fn send_quit(&self) -> Result<()> {
        self.0
            .send(Message::quit())
            .await
            .map_err(|_| Error::ChannelFailure("control pipeline closed".to_string()))
    }
}

pub struct Channel {
    name: String,
    gateway: Arc<dyn ConsumerGateway>,
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        gateway: Arc<dyn ConsumerGateway>,
        tx: mpsc::Sender<Message>,
        rx: mpsc::Receiver<Message>,
    ) -> Self {
        Self {
            name: name.into(),
            gateway,
            tx,
            rx: Mutex::new(rx),
            state: Mutex::new(ChannelState::Initialized),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gateway(&self) -> Arc<dyn ConsumerGateway> {
        self.gateway.clone()
    }

    pub async fn state(&self) -> ChannelState {
        *self.state.lock().await
    }

    /// Returns the pipeline's head if one is waiting, else delegates to the
    /// gateway with the full timeout. `Initialized` transitions to
    /// `Started` on first use; `Stopped` is terminal.
    pub async fn receive(&self, timeout: Duration) -> Result<Message> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ChannelState::Stopped => {
                    return Err(Error::ChannelFailure(format!(
                        "channel {} has been stopped, cannot resume listening",
                        self.name
                    )))
                }
                ChannelState::Initialized => *state = ChannelState::Started,
                ChannelState::Started | ChannelState::Stopping => {}
            }
        }

        let mut rx = self.rx.lock().await;

        if let Ok(control) = rx.try_recv() {
            trace!(channel = %self.name, "draining queued control message ahead of gateway receive");
            return Ok(control);
        }

        tokio::select! {
            biased;
            Some(control) = rx.recv() => Ok(control),
            delivery = self.gateway.receive(timeout) => delivery,
        }
    }

    pub async fn acknowledge(&self, message: &Message) -> Result<()> {
        self.gateway.acknowledge(message).await
    }

    pub async fn requeue(&self, message: &Message) -> Result<()> {
        self.gateway.requeue(message).await
    }

    pub async fn purge(&self) -> Result<()> {
        self.gateway.purge().await
    }

    /// Posts the QUIT sentinel and transitions towards `Stopping`. A no-op
    /// once the channel is already `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == ChannelState::Stopped {
            return Ok(());
        }
        *state = ChannelState::Stopping;
        drop(state);

        self.tx
            .send(Message::quit())
            .await
            .map_err(|_| Error::ChannelFailure(format!("channel {} pipeline closed", self.name)))
    }

    /// Marks the channel as permanently finished. Called by the pump on its
    /// way out, whichever branch got it there (QUIT, unacceptable-limit
    /// reached, or a fatal configuration error).
    pub async fn end(&self) {
        debug!(channel = %self.name, "ending channel");
        *self.state.lock().await = ChannelState::Stopped;
    }
}
