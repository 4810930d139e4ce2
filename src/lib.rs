//! # service-activator
//!
//! A supervised pool of message pumps that consume from a broker, translate
//! deliveries into typed requests, and dispatch them to handlers.
//!
//! Implements the Service Activator and Command Dispatcher patterns over a
//! pluggable [`gateway::ConsumerGateway`] port, with at-least-once delivery,
//! cooperative shutdown, poison-message containment, bounded requeue, and
//! heartbeat-aware long-running handlers. This crate ships the port and an
//! in-memory test double; wiring a concrete broker client (e.g. via
//! `lapin`) is left to a downstream crate.

#![forbid(unsafe_code)]
#![warn(
    absolute_paths_not_starting_with_crate,
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    unused_crate_dependencies,
    clippy::as_conversions
)]

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod message;
pub mod performer;
pub mod pump;
pub mod request;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channel::{Channel, ChannelState};
pub use config::{ConnectionParameters, ConsumerConfiguration, ExchangeType, PumpOptions};
pub use dispatcher::{Dispatcher, DispatcherState};
pub use error::{DispatchError, Error};
pub use gateway::{CancelHandle, ConsumerGateway};
pub use message::{Body, Header, Message, MessageType};
pub use performer::{ConsumerEntry, DispatcherFactory, GatewayFactory, Performer};
pub use pump::MessagePump;
pub use request::{RequestDispatcher, RequestMapper};

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    pub use super::*;

    /// Installs a `tracing` subscriber that prints to the test harness's
    /// captured stdout, controlled by `RUST_LOG`. Safe to call from every
    /// test; only the first call in a process actually installs one.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    mod channel_tests;
    mod dispatcher_tests;
    mod pump_tests;
}
