//! A single queue subscription and its message processing loop.

use crate::broker::{DeliveryStream, Subscriber};
use crate::delivery::Delivery;
use crate::error::MqError;
use crate::handler::{self, DeliveryHandler};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Consumes one queue under one consumer tag.
///
/// Deliveries are handled one at a time, in the order the broker sends them.
/// Every delivery is settled exactly once: acked when the handler succeeds,
/// nacked without requeue when it fails or panics.
pub struct Worker<C> {
    handler: Arc<dyn DeliveryHandler>,
    channel: C,
    queue: String,
    consumer_tag: String,
}

impl<C: Subscriber + 'static> Worker<C> {
    pub fn new(
        handler: Arc<dyn DeliveryHandler>,
        channel: C,
        queue: impl Into<String>,
        consumer_tag: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            channel,
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Subscribes to the queue and spawns the processing loop.
    ///
    /// Fails if the subscription itself is refused (for example, the queue does
    /// not exist). Otherwise returns immediately; the loop runs until the
    /// delivery stream ends.
    pub async fn consume(self) -> Result<WorkerHandle, MqError> {
        let deliveries = self.channel.subscribe(&self.queue, &self.consumer_tag).await?;

        log::info!(
            "Consumer started with tag '{}' on queue '{}'. Waiting for messages...",
            self.consumer_tag,
            self.queue
        );

        let queue = self.queue.clone();
        let consumer_tag = self.consumer_tag.clone();
        let handle = tokio::spawn(self.run(deliveries));

        Ok(WorkerHandle { queue, consumer_tag, handle })
    }

    async fn run(self, mut deliveries: DeliveryStream) {
        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => self.process(delivery).await,
                Err(e) => {
                    log::error!("Consumer '{}' lost its delivery stream: {}", self.consumer_tag, e);
                    break;
                }
            }
        }

        log::info!("Consumer '{}' on queue '{}' stopped.", self.consumer_tag, self.queue);
    }

    /// Handles one delivery and settles it.
    async fn process(&self, delivery: Delivery) {
        let delivery_tag = delivery.delivery_tag;

        match handler::invoke(self.handler.as_ref(), &delivery).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    log::error!("Failed to ack message. Tag: {}, Error: {}", delivery_tag, e);
                }
            }
            Err(e) => {
                log::error!(
                    "Failed to process message on '{}'. Tag: {}, Error: {}",
                    self.consumer_tag,
                    delivery_tag,
                    e
                );
                // Never requeue: a poison message would otherwise loop forever.
                if let Err(e) = delivery.nack(false).await {
                    log::error!("Failed to nack message. Tag: {}, Error: {}", delivery_tag, e);
                }
            }
        }
    }
}

/// A running worker. Completes once the worker's delivery stream has ended.
#[derive(Debug)]
pub struct WorkerHandle {
    queue: String,
    consumer_tag: String,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker to stop.
    pub async fn stopped(self) {
        if let Err(e) = self.handle.await {
            log::error!("Consumer '{}' terminated abnormally: {}", self.consumer_tag, e);
        }
    }

    /// Stops the worker without waiting for the current delivery.
    pub fn abort(&self) {
        self.handle.abort();
    }
}
