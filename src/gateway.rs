//! The `ConsumerGateway` port: the one seam between this crate and a
//! concrete broker client.
//!
//! Grounded on `original_source/brightside/messaging.py::BrightsideConsumer`
//! (the abstract base with `acknowledge`/`requeue`/`purge`/`receive`) and on
//! `original_source/arame/gateway.py::ArameConsumer.run_heartbeat_continuously`
//! for the heartbeat-ticker contract. This crate ships no concrete adapter:
//! wiring a real broker (e.g. via `lapin`) is left to a downstream crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::Result;
use crate::message::Message;

/// A broker adapter, seen from the channel's side.
///
/// Implementations are expected to apply their own bounded retry policy
/// internally (the sourced Arame gateway retries a socket reset once before
/// surfacing [`crate::error::Error::ChannelFailure`]); this trait only sees
/// the final outcome.
#[async_trait]
pub trait ConsumerGateway: Send + Sync {
    /// Waits up to `timeout` for a delivery. Returns
    /// [`Message::none`] rather than blocking indefinitely when nothing
    /// arrives; never returns anything that isn't a well-formed `Message`.
    async fn receive(&self, timeout: Duration) -> Result<Message>;

    /// Acknowledges a successfully handled (or intentionally discarded)
    /// message.
    async fn acknowledge(&self, message: &Message) -> Result<()>;

    /// Returns a message to the broker for redelivery.
    async fn requeue(&self, message: &Message) -> Result<()>;

    /// Discards every message currently queued for this consumer.
    async fn purge(&self) -> Result<()>;

    /// Sends a single heartbeat frame to the broker. Called repeatedly by
    /// [`spawn_heartbeat_ticker`] while a long-running handler is in
    /// flight.
    async fn heartbeat_tick(&self) -> Result<()>;

    /// Releases any held broker resources (channel, socket). Idempotent.
    async fn close(&self);
}

/// A handle to a background heartbeat ticker started by
/// [`spawn_heartbeat_ticker`].
///
/// Cancelling joins the ticker task, guaranteeing no further
/// `heartbeat_tick` calls happen after `cancel` returns. This is the fix
/// for the sourced bug where the heartbeat thread was started with `.run()`
/// (synchronous, blocking the caller) instead of `.start()`: here the ticker
/// is always a genuinely concurrent `tokio::task`, never invoked inline.
pub struct CancelHandle {
    cancel: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl CancelHandle {
    /// A handle that was never backed by a ticker task; cancelling it is a
    /// no-op. Used when a consumer is not marked `long_running`.
    pub fn noop() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(true)),
            task: None,
        }
    }

    /// Stops the ticker and waits for its task to exit.
    pub async fn cancel(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            if let Err(join_err) = task.await {
                warn!("heartbeat ticker task panicked: {join_err}");
            }
        }
    }
}

/// Spawns a task that calls `gateway.heartbeat_tick()` every `interval`
/// until the returned handle is cancelled.
///
/// Used by the message pump to keep a broker connection alive for the
/// duration of a long-running handler invocation (spec's heartbeat scope
/// around dispatch).
pub fn spawn_heartbeat_ticker(gateway: Arc<dyn ConsumerGateway>, interval: Duration) -> CancelHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_task = cancel.clone();

    let task = tokio::spawn(async move {
        while !cancel_for_task.load(Ordering::SeqCst) {
            tokio::time::sleep(interval).await;
            if cancel_for_task.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = gateway.heartbeat_tick().await {
                warn!("heartbeat tick failed: {e}");
            }
        }
    });

    CancelHandle {
        cancel,
        task: Some(task),
    }
}
