//! The message pump: receive, translate, dispatch, acknowledge.
//!
//! Grounded on `original_source/brightside/message_pump.py::MessagePump`
//! line-for-line in structure (the loop ordering, the heartbeat context
//! manager, the unacceptable-message circuit breaker, the requeue-count
//! cap), with tracing/span instrumentation and `metrics::counter!`/`gauge!`
//! calls in the style of `kanin/src/app/task.rs::handle_request`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, error_span, info, warn, Instrument};

use crate::channel::Channel;
use crate::config::PumpOptions;
use crate::error::{DispatchError, Error, Result};
use crate::gateway::spawn_heartbeat_ticker;
use crate::message::{Message, MessageType};
use crate::request::{RequestDispatcher, RequestMapper};

/// The outcome of mapping and dispatching a single serviceable message,
/// before it's turned into an ack/requeue/propagate decision.
enum Outcome {
    Ok,
    Defer,
    Configuration(String),
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl From<DispatchError> for Outcome {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Defer => Outcome::Defer,
            DispatchError::Handler(inner) => Outcome::Handler(inner),
        }
    }
}

/// A single-consumer receive -> translate -> dispatch -> acknowledge loop
/// bound to one [`Channel`].
pub struct MessagePump<Req> {
    dispatcher: Arc<dyn RequestDispatcher<Req>>,
    channel: Arc<Channel>,
    mapper: Option<Arc<dyn RequestMapper<Req>>>,
    options: PumpOptions,
    long_running: bool,
    heartbeat_interval: Duration,
    unacceptable_count: u32,
}

impl<Req: Send + 'static> MessagePump<Req> {
    pub fn new(
        dispatcher: Arc<dyn RequestDispatcher<Req>>,
        channel: Arc<Channel>,
        mapper: Option<Arc<dyn RequestMapper<Req>>>,
        options: PumpOptions,
        long_running: bool,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            channel,
            mapper,
            options,
            long_running,
            heartbeat_interval,
            unacceptable_count: 0,
        }
    }

    /// Runs until the channel yields QUIT, the unacceptable-message limit is
    /// reached, or a [`Error::Configuration`] escapes a dispatch (fatal: the
    /// channel is left unacknowledged and the error propagates to the
    /// caller, which is expected to treat it as the Performer's exit
    /// reason).
    pub async fn run(mut self) -> Result<()> {
        info!(channel = %self.channel.name(), "message pump starting");
        loop {
            if self.unacceptable_count >= self.options.unacceptable_limit {
                warn!(
                    channel = %self.channel.name(),
                    count = self.unacceptable_count,
                    "unacceptable-message limit reached, ending channel"
                );
                self.channel.end().await;
                return Ok(());
            }

            let message = match self.channel.receive(self.options.timeout).await {
                Ok(message) => message,
                Err(Error::ChannelFailure(reason)) => {
                    warn!(channel = %self.channel.name(), %reason, "channel failure receiving message");
                    continue;
                }
                Err(e) => {
                    warn!(channel = %self.channel.name(), error = %e, "error receiving message");
                    continue;
                }
            };

            match message.message_type() {
                MessageType::None => {
                    tokio::time::sleep(self.options.timeout).await;
                }
                MessageType::Quit => {
                    debug!(channel = %self.channel.name(), "quit received, ending channel");
                    self.channel.end().await;
                    return Ok(());
                }
                MessageType::Unacceptable => {
                    debug!(channel = %self.channel.name(), id = %message.id(), "discarding unacceptable message");
                    if let Err(e) = self.channel.acknowledge(&message).await {
                        warn!(error = %e, "failed to acknowledge unacceptable message");
                    }
                    metrics::counter!("service_activator.messages_unacceptable", "channel" => self.channel.name().to_string()).increment(1);
                    self.unacceptable_count += 1;
                    metrics::gauge!("service_activator.unacceptable_count", "channel" => self.channel.name().to_string())
                        .set(f64::from(self.unacceptable_count));
                }
                MessageType::Command | MessageType::Event => {
                    let id = message.id();
                    let span = error_span!("request", channel = %self.channel.name(), req_id = %id);
                    self.handle(message).instrument(span).await?;
                }
            }
        }
    }

    async fn handle(&mut self, mut message: Message) -> Result<()> {
        let gateway = self.channel.gateway();
        let heartbeat = if self.long_running {
            spawn_heartbeat_ticker(gateway, self.heartbeat_interval)
        } else {
            crate::gateway::CancelHandle::noop()
        };

        let outcome = self.dispatch(&message).await;
        heartbeat.cancel().await;

        match outcome {
            Outcome::Ok => {
                self.channel.acknowledge(&message).await?;
                metrics::counter!("service_activator.messages_acked", "channel" => self.channel.name().to_string()).increment(1);
                Ok(())
            }
            Outcome::Defer => {
                message.increment_handled_count();

                if let Some(cap) = self.options.requeue_count {
                    if message.handled_count_reached(cap) {
                        error!(
                            id = %message.id(),
                            attempts = cap,
                            "dropping message after exhausting requeue attempts"
                        );
                        self.channel.acknowledge(&message).await?;
                        metrics::counter!("service_activator.messages_dropped", "channel" => self.channel.name().to_string()).increment(1);
                        return Ok(());
                    }
                }

                debug!(id = %message.id(), "requeueing message");
                self.channel.requeue(&message).await?;
                metrics::counter!("service_activator.messages_requeued", "channel" => self.channel.name().to_string()).increment(1);
                Ok(())
            }
            Outcome::Configuration(reason) => {
                // Fatal: propagate without acknowledging. The caller
                // (Performer) treats this as the pump's terminal error.
                Err(Error::Configuration(reason))
            }
            Outcome::Handler(e) => {
                error!(id = %message.id(), error = %e, "handler failed, acknowledging and dropping");
                self.channel.acknowledge(&message).await?;
                metrics::counter!("service_activator.messages_dropped", "channel" => self.channel.name().to_string()).increment(1);
                Ok(())
            }
        }
    }

    async fn dispatch(&self, message: &Message) -> Outcome {
        let mapper = match &self.mapper {
            Some(mapper) => mapper,
            None => {
                return Outcome::Configuration(format!(
                    "no mapper registered for topic {:?}",
                    message.header().topic
                ))
            }
        };

        let request = match mapper.map(message) {
            Ok(request) => request,
            Err(Error::Configuration(reason)) => return Outcome::Configuration(reason),
            Err(e) => return Outcome::Configuration(e.to_string()),
        };

        let result = match message.message_type() {
            MessageType::Command => self.dispatcher.send(request).await,
            MessageType::Event => self.dispatcher.publish(request).await,
            _ => unreachable!("only Command/Event messages reach dispatch"),
        };

        match result {
            Ok(()) => Outcome::Ok,
            Err(e) => e.into(),
        }
    }
}
