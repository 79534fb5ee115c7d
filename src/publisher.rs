//! Publishing persistent messages to an exchange.

use crate::broker::{AmqpChannel, PublishTransport};
use crate::error::MqError;
use chrono::Utc;
use lapin::{options::BasicPublishOptions, types::FieldTable, BasicProperties};

/// AMQP delivery mode for messages that survive a broker restart.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Publishes messages to one exchange.
pub struct Publisher<T = AmqpChannel> {
    transport: T,
    exchange: String,
}

impl<T: PublishTransport> Publisher<T> {
    pub fn new(transport: T, exchange: impl Into<String>) -> Self {
        Self {
            transport,
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publishes `body` as a persistent, timestamped message under `routing_key`.
    ///
    /// The message is mandatory: if no queue is bound for the routing key the
    /// broker returns it instead of dropping it. Errors are not retried.
    pub async fn publish(&self, body: &[u8], headers: FieldTable, routing_key: &str) -> Result<(), MqError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_timestamp(Utc::now().timestamp().max(0) as u64)
            .with_headers(headers);

        self.transport
            .publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions { mandatory: true, immediate: false },
                body,
                properties,
            )
            .await
            .map_err(MqError::Publish)?;

        log::debug!("Published {} byte(s) to '{}' with key '{}'", body.len(), self.exchange, routing_key);
        Ok(())
    }
}
