//! Scenario-for-scenario translations of
//! `original_source/tests/message_pump_tests.py`, run against
//! [`DoubleGateway`] instead of mocks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{pipeline, Channel, PipelineHandle};
use crate::config::PumpOptions;
use crate::error::{DispatchError, Error};
use crate::gateway::ConsumerGateway;
use crate::message::{Body, Header, Message, MessageType};
use crate::pump::MessagePump;
use crate::request::{RequestDispatcher, RequestMapper};
use crate::testing::{DoubleGateway, FailingGateway};

fn command(topic: &str, body: &[u8]) -> Message {
    Message::new(Header::new(topic, MessageType::Command), Body::new(body.to_vec(), "text/plain"))
}

fn unacceptable(topic: &str) -> Message {
    Message::unacceptable(topic)
}

enum Behavior {
    AlwaysOk,
    AlwaysDefer,
}

struct RecordingDispatcher {
    sends: AtomicU32,
    behavior: Behavior,
}

impl RecordingDispatcher {
    fn new(behavior: Behavior) -> Self {
        Self { sends: AtomicU32::new(0), behavior }
    }

    fn send_count(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestDispatcher<String> for RecordingDispatcher {
    async fn send(&self, _request: String) -> Result<(), DispatchError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::AlwaysOk => Ok(()),
            Behavior::AlwaysDefer => Err(DispatchError::Defer),
        }
    }

    async fn publish(&self, request: String) -> Result<(), DispatchError> {
        self.send(request).await
    }
}

fn string_mapper() -> Arc<dyn RequestMapper<String>> {
    Arc::new(|message: &Message| Ok(String::from_utf8_lossy(&message.body().bytes).to_string()))
}

fn build_pump(
    gateway: Arc<dyn ConsumerGateway>,
    dispatcher: Arc<dyn RequestDispatcher<String>>,
    mapper: Option<Arc<dyn RequestMapper<String>>>,
    options: PumpOptions,
) -> (MessagePump<String>, PipelineHandle) {
    let (tx, rx) = pipeline(8);
    let pipeline_handle = PipelineHandle::new(tx.clone());
    let channel = Arc::new(Channel::new("test", gateway, tx, rx));
    let pump = MessagePump::new(dispatcher, channel, mapper, options, false, Duration::from_secs(15));
    (pump, pipeline_handle)
}

#[tokio::test]
async fn dispatches_a_command_and_acknowledges_then_stops_on_quit() {
    super::init_tracing();
    let gateway = Arc::new(DoubleGateway::new());
    gateway.push(command("orders.created", b"hello")).await;

    let dispatcher = Arc::new(RecordingDispatcher::new(Behavior::AlwaysOk));
    let (pump, pipeline_handle) = build_pump(
        gateway.clone(),
        dispatcher.clone(),
        Some(string_mapper()),
        PumpOptions::default().with_timeout(Duration::from_millis(20)),
    );

    let worker = tokio::spawn(pump.run());

    wait_until(|| async { !gateway.acknowledged().await.is_empty() }).await;

    pipeline_handle.send_quit().await.unwrap();
    worker.await.unwrap().unwrap();

    assert_eq!(dispatcher.send_count(), 1);
    assert_eq!(gateway.acknowledged().await.len(), 1);
}

#[tokio::test]
async fn a_missing_mapper_is_fatal_and_does_not_acknowledge() {
    super::init_tracing();
    let gateway = Arc::new(DoubleGateway::new());
    gateway.push(command("orders.created", b"hello")).await;

    let dispatcher = Arc::new(RecordingDispatcher::new(Behavior::AlwaysOk));
    let (pump, _pipeline_handle) = build_pump(
        gateway.clone(),
        dispatcher.clone(),
        None,
        PumpOptions::default().with_timeout(Duration::from_millis(20)),
    );

    let result = pump.run().await;

    assert!(matches!(result, Err(Error::Configuration(_))));
    assert_eq!(dispatcher.send_count(), 0);
    assert!(gateway.acknowledged().await.is_empty());
}

#[tokio::test]
async fn unacceptable_messages_are_acknowledged_and_counted_until_the_limit() {
    super::init_tracing();
    let gateway = Arc::new(DoubleGateway::new());
    gateway.push(unacceptable("bad.one")).await;
    gateway.push(unacceptable("bad.two")).await;
    gateway.push(unacceptable("bad.three")).await;
    // Never reached: the pump should stop itself before this is read.
    gateway.push(command("orders.created", b"hello")).await;

    let dispatcher = Arc::new(RecordingDispatcher::new(Behavior::AlwaysOk));
    let (pump, _pipeline_handle) = build_pump(
        gateway.clone(),
        dispatcher.clone(),
        Some(string_mapper()),
        PumpOptions::default()
            .with_timeout(Duration::from_millis(20))
            .with_unacceptable_limit(3),
    );

    pump.run().await.unwrap();

    assert_eq!(gateway.acknowledged().await.len(), 3);
    assert_eq!(dispatcher.send_count(), 0);
}

#[tokio::test]
async fn a_deferring_handler_is_requeued_then_dropped_after_the_cap() {
    super::init_tracing();
    let gateway = Arc::new(DoubleGateway::new());
    gateway.push(command("orders.created", b"hello")).await;

    let dispatcher = Arc::new(RecordingDispatcher::new(Behavior::AlwaysDefer));
    let (pump, pipeline_handle) = build_pump(
        gateway.clone(),
        dispatcher.clone(),
        Some(string_mapper()),
        PumpOptions::default()
            .with_timeout(Duration::from_millis(20))
            .with_requeue_count(3),
    );

    let worker = tokio::spawn(pump.run());

    wait_until(|| async { !gateway.acknowledged().await.is_empty() }).await;

    pipeline_handle.send_quit().await.unwrap();
    worker.await.unwrap().unwrap();

    // Three attempts total: two requeues, then a drop-ack on the third.
    assert_eq!(dispatcher.send_count(), 3);
    assert_eq!(gateway.requeued().await.len(), 2);
    assert_eq!(gateway.acknowledged().await.len(), 1);
}

#[tokio::test]
async fn channel_failures_are_logged_and_retried_until_quit() {
    super::init_tracing();
    let gateway = Arc::new(FailingGateway::new("broker socket reset"));

    let dispatcher = Arc::new(RecordingDispatcher::new(Behavior::AlwaysOk));
    let (pump, pipeline_handle) = build_pump(
        gateway,
        dispatcher.clone(),
        Some(string_mapper()),
        PumpOptions::default().with_timeout(Duration::from_millis(5)),
    );

    let worker = tokio::spawn(pump.run());

    // Give the loop a moment to spin through several failed receives
    // without dying, then ask it to stop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline_handle.send_quit().await.unwrap();
    worker.await.unwrap().unwrap();

    assert_eq!(dispatcher.send_count(), 0);
}

async fn wait_until<F, Fut>(mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if predicate().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within the test deadline");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
