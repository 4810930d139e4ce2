use std::sync::Arc;
use std::time::Duration;

use crate::channel::{pipeline, Channel, ChannelState, PipelineHandle};
use crate::gateway::ConsumerGateway;
use crate::message::{Body, Header, Message, MessageType};
use crate::testing::DoubleGateway;

fn command(topic: &str) -> Message {
    Message::new(Header::new(topic, MessageType::Command), Body::new(b"payload".to_vec(), "text/plain"))
}

#[tokio::test]
async fn receive_drains_the_control_pipeline_before_the_gateway() {
    super::init_tracing();
    let gateway = Arc::new(DoubleGateway::new());
    gateway.push(command("from-gateway")).await;

    let (tx, rx) = pipeline(8);
    let pipeline_handle = PipelineHandle::new(tx.clone());
    let channel = Channel::new("test", gateway.clone() as Arc<dyn ConsumerGateway>, tx, rx);

    pipeline_handle.send_quit().await.unwrap();

    let received = channel.receive(Duration::from_millis(20)).await.unwrap();
    assert_eq!(received.message_type(), MessageType::Quit);

    // The gateway's own message is still sitting there, untouched.
    assert_eq!(gateway.acknowledged().await.len(), 0);
}

#[tokio::test]
async fn receive_fails_once_the_channel_has_ended() {
    super::init_tracing();
    let gateway = Arc::new(DoubleGateway::new());
    let (tx, rx) = pipeline(8);
    let channel = Channel::new("test", gateway as Arc<dyn ConsumerGateway>, tx, rx);

    channel.end().await;
    assert_eq!(channel.state().await, ChannelState::Stopped);

    let result = channel.receive(Duration::from_millis(20)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn stop_posts_quit_and_moves_to_stopping() {
    super::init_tracing();
    let gateway = Arc::new(DoubleGateway::new());
    let (tx, rx) = pipeline(8);
    let channel = Channel::new("test", gateway as Arc<dyn ConsumerGateway>, tx, rx);

    channel.stop().await.unwrap();
    assert_eq!(channel.state().await, ChannelState::Stopping);

    let received = channel.receive(Duration::from_millis(20)).await.unwrap();
    assert_eq!(received.message_type(), MessageType::Quit);
}
