//! A message delivered to a worker and the capability to resolve it.

use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
    types::FieldTable,
    BasicProperties,
};
use std::fmt;
use std::sync::Arc;

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), lapin::Error>;

    async fn nack(&self, options: BasicNackOptions) -> Result<(), lapin::Error>;

    async fn reject(&self, options: BasicRejectOptions) -> Result<(), lapin::Error>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), lapin::Error> {
        Acker::ack(self, options).await
    }

    async fn nack(&self, options: BasicNackOptions) -> Result<(), lapin::Error> {
        Acker::nack(self, options).await
    }

    async fn reject(&self, options: BasicRejectOptions) -> Result<(), lapin::Error> {
        Acker::reject(self, options).await
    }
}

/// A message received from a queue subscription.
///
/// Every settle method acts on this delivery only; `multiple` is never set.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, data: Vec<u8>, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            delivery_tag,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            properties: BasicProperties::default(),
            data,
            acker,
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn headers(&self) -> Option<&FieldTable> {
        self.properties.headers().as_ref()
    }

    pub async fn ack(&self) -> Result<(), lapin::Error> {
        self.acker.ack(BasicAckOptions { multiple: false }).await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.acker
            .nack(BasicNackOptions { multiple: false, requeue })
            .await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.acker.reject(BasicRejectOptions { requeue }).await
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
            acker: Arc::new(delivery.acker),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("len", &self.data.len())
            .finish()
    }
}
