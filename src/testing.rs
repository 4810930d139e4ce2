//! An in-memory [`ConsumerGateway`] double, so this crate's own test suite
//! (and, behind the `test-util` feature, a downstream crate's) can exercise
//! the full channel/pump/dispatcher contract without a broker.
//!
//! Grounded on `original_source/tests/channels_testdoubles.py::FakeConsumer`
//! and `original_source/tests/message_pump_doubles.py::FakeChannel`: a
//! queue-backed fake that records every acknowledge/requeue call for test
//! assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::gateway::ConsumerGateway;
use crate::message::Message;

/// A gateway double backed by an in-memory queue.
///
/// Preload it with [`DoubleGateway::push`] before handing it to a
/// [`crate::channel::Channel`]/[`crate::pump::MessagePump`], then inspect
/// [`DoubleGateway::acknowledged`]/[`DoubleGateway::requeued`] afterwards.
#[derive(Default)]
pub struct DoubleGateway {
    queue: Mutex<VecDeque<Message>>,
    acknowledged: Mutex<Vec<Message>>,
    requeued: Mutex<Vec<Message>>,
    purge_count: AtomicU32,
    heartbeat_ticks: AtomicU32,
}

impl DoubleGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message to be returned by a future `receive`, in order.
    pub async fn push(&self, message: Message) {
        self.queue.lock().await.push_back(message);
    }

    /// Every message `acknowledge` has been called with, in call order.
    pub async fn acknowledged(&self) -> Vec<Message> {
        self.acknowledged.lock().await.clone()
    }

    /// Every message `requeue` has been called with, in call order. A
    /// requeued message is also pushed back onto the receive queue, so a
    /// subsequent `receive` sees it again, the same as a real broker
    /// redelivering it.
    pub async fn requeued(&self) -> Vec<Message> {
        self.requeued.lock().await.clone()
    }

    pub fn purge_count(&self) -> u32 {
        self.purge_count.load(Ordering::SeqCst)
    }

    pub fn heartbeat_ticks(&self) -> u32 {
        self.heartbeat_ticks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerGateway for DoubleGateway {
    async fn receive(&self, _timeout: std::time::Duration) -> Result<Message> {
        let mut queue = self.queue.lock().await;
        Ok(queue.pop_front().unwrap_or_else(Message::none))
    }

    async fn acknowledge(&self, message: &Message) -> Result<()> {
        self.acknowledged.lock().await.push(message.clone());
        Ok(())
    }

    async fn requeue(&self, message: &Message) -> Result<()> {
        self.requeued.lock().await.push(message.clone());
        self.queue.lock().await.push_back(message.clone());
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        self.queue.lock().await.clear();
        self.purge_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn heartbeat_tick(&self) -> Result<()> {
        self.heartbeat_ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {}
}

/// A gateway double whose `receive` always fails, for exercising the
/// channel-failure retry/continue path in the pump's loop.
pub struct FailingGateway {
    reason: String,
}

impl FailingGateway {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ConsumerGateway for FailingGateway {
    async fn receive(&self, timeout: std::time::Duration) -> Result<Message> {
        // A real broker failure still costs time to observe; sleeping here
        // also means this never busy-loops a caller that retries it in a tight
        // `while let Err(_) = gateway.receive(...)` without its own backoff.
        tokio::time::sleep(timeout).await;
        Err(Error::ChannelFailure(self.reason.clone()))
    }

    async fn acknowledge(&self, _message: &Message) -> Result<()> {
        Ok(())
    }

    async fn requeue(&self, _message: &Message) -> Result<()> {
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        Ok(())
    }

    async fn heartbeat_tick(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
