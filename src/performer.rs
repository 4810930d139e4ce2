//! `Performer`: one supervised worker running a single channel's message
//! pump.
//!
//! Grounded on `original_source/brightside/dispatch.py::Performer` and
//! `_sub_process_main`. Rust has no GIL, so where the sourced Python forks
//! an OS process to escape it, a Performer here is realized as an isolated
//! `tokio::task::spawn`, directly modeled on
//! `kanin/src/app/task.rs::handler_task`'s `tokio::spawn` + `JoinHandle`
//! pattern. A handler panic inside the task is caught via the `JoinHandle`
//! (`Err(JoinError)`) and logged; it does not unwind the dispatcher's
//! supervisor.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{pipeline, Channel, PipelineHandle};
use crate::config::{ConnectionParameters, ConsumerConfiguration, PumpOptions};
use crate::error::Result;
use crate::gateway::ConsumerGateway;
use crate::pump::MessagePump;
use crate::request::{RequestDispatcher, RequestMapper};

/// How long `Performer::run` waits for the spawned task to signal it has
/// actually started consuming before giving up and returning anyway. A slow
/// start is logged, not treated as fatal: the sourced `Performer.run` does
/// the same (`started_event.wait(timeout=1)` without checking the result).
pub const STARTUP_GRACE: Duration = Duration::from_secs(1);

/// User-supplied callback that builds a [`ConsumerGateway`] for one
/// channel. Equivalent to the sourced `consumer_factory: Callable[[Connection,
/// BrightsideConsumerConfiguration, logging.Logger], BrightsideConsumer]`.
pub type GatewayFactory = Arc<
    dyn Fn(ConnectionParameters, ConsumerConfiguration) -> BoxFuture<'static, Result<Arc<dyn ConsumerGateway>>>
        + Send
        + Sync,
>;

/// User-supplied callback that builds a [`RequestDispatcher`] for one
/// channel name. Equivalent to the sourced `command_processor_factory:
/// Callable[[str], CommandProcessor]`.
pub type DispatcherFactory<Req> = Arc<dyn Fn(String) -> Arc<dyn RequestDispatcher<Req>> + Send + Sync>;

/// Everything the [`crate::dispatcher::Dispatcher`] needs to (re)build a
/// [`Performer`] for one named channel. Equivalent to the sourced
/// `ConsumerConfiguration` (connection + consumer + the three factory
/// callbacks).
pub struct ConsumerEntry<Req> {
    pub connection: ConnectionParameters,
    pub consumer_config: ConsumerConfiguration,
    pub gateway_factory: GatewayFactory,
    pub dispatcher_factory: DispatcherFactory<Req>,
    pub mapper: Option<Arc<dyn RequestMapper<Req>>>,
    pub pump_options: PumpOptions,
}

// Written by hand instead of `#[derive(Clone)]`: every field clones via an
// `Arc` pointer copy, so this never needs `Req: Clone`, which the derive
// would otherwise require even though `Req` itself is never stored by value.
impl<Req> Clone for ConsumerEntry<Req> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            consumer_config: self.consumer_config.clone(),
            gateway_factory: self.gateway_factory.clone(),
            dispatcher_factory: self.dispatcher_factory.clone(),
            mapper: self.mapper.clone(),
            pump_options: self.pump_options.clone(),
        }
    }
}

/// The dispatcher's handle onto one running worker: a task plus the means
/// to ask it to stop.
pub struct Performer<Req> {
    name: String,
    entry: ConsumerEntry<Req>,
    pipeline_handle: Option<PipelineHandle>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl<Req: Send + Sync + 'static> Performer<Req> {
    pub fn new(name: impl Into<String>, entry: ConsumerEntry<Req>) -> Self {
        Self {
            name: name.into(),
            entry,
            pipeline_handle: None,
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the task running this performer's channel/pump pair. The
    /// gateway and dispatcher are constructed *inside* the spawned task
    /// from their factories, matching the sourced `_sub_process_main`'s
    /// "build fresh inside the child" discipline (there, so the objects
    /// could be pickled across a process boundary; here, to keep the
    /// Performer's own fields plain, cheaply-cloned value types even though
    /// a task boundary no longer strictly requires it).
    pub async fn run(&mut self) -> Result<()> {
        let (tx, rx) = pipeline(crate::channel::DEFAULT_PIPELINE_CAPACITY);
        self.pipeline_handle = Some(PipelineHandle::new(tx.clone()));

        let (started_tx, started_rx) = oneshot::channel();

        let name = self.name.clone();
        let connection = self.entry.connection.clone();
        let consumer_config = self.entry.consumer_config.clone();
        let gateway_factory = self.entry.gateway_factory.clone();
        let dispatcher_factory = self.entry.dispatcher_factory.clone();
        let mapper = self.entry.mapper.clone();
        let pump_options = self.entry.pump_options.clone();
        let long_running = consumer_config.long_running;
        let heartbeat_interval = connection.heartbeat_interval();

        debug!(channel = %name, broker_uri = %connection.broker_uri, "starting worker task for channel");

        let task_name = name.clone();
        let worker = tokio::spawn(async move {
            let gateway = (gateway_factory)(connection, consumer_config).await?;
            let channel = Arc::new(Channel::new(task_name.clone(), gateway, tx, rx));
            let dispatcher = (dispatcher_factory)(task_name);
            let pump = MessagePump::new(dispatcher, channel, mapper, pump_options, long_running, heartbeat_interval);
            let _ = started_tx.send(());
            pump.run().await
        });

        self.worker = Some(worker);

        if tokio::time::timeout(STARTUP_GRACE, started_rx).await.is_err() {
            warn!(channel = %self.name, "performer did not signal start within the grace window");
        }

        Ok(())
    }

    /// Posts the QUIT sentinel into this performer's control pipeline. The
    /// in-flight handler, if any, runs to completion; the pump exits on its
    /// next loop iteration.
    pub async fn stop(&self) {
        if let Some(handle) = &self.pipeline_handle {
            if let Err(e) = handle.send_quit().await {
                warn!(channel = %self.name, error = %e, "failed to post quit to performer");
            }
        }
    }

    /// Takes the worker's `JoinHandle`, for the dispatcher to track and
    /// join on shutdown. Leaves `None` behind; calling `run` again
    /// replaces it.
    pub fn take_worker(&mut self) -> Option<JoinHandle<Result<()>>> {
        self.worker.take()
    }
}
