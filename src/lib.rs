//! # RabbitMQ Workers
//! Connects to RabbitMQ with dial retries, runs a configurable number of
//! consumers per queue, and guarantees every delivery is acked or nacked
//! exactly once, even when its handler panics.

pub mod broker;
pub mod config;
pub mod connector;
pub mod delivery;
pub mod error;
pub mod fsloader;
pub mod handler;
pub mod publisher;
pub mod revision;
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-export key components for easy access
pub use broker::{AmqpChannel, AmqpDialer, BrokerChannel, Dialer, PublishTransport, ReturnedMessage, Subscriber};
pub use config::{BrokerClientConfig, BrokerConnectionConfig, ConsumerConfig};
pub use connector::Connector;
pub use delivery::{Acknowledger, Delivery};
pub use error::{HandlerError, MqError};
pub use handler::{handler_fn, DeliveryHandler, HandlerRegistry};
pub use publisher::Publisher;
pub use revision::AppRevision;
pub use worker::{Worker, WorkerHandle};
