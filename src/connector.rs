//! Dialing the broker and fanning consumers out over the configured queues.

use crate::broker::{AmqpDialer, BrokerChannel, Dialer, Subscriber};
use crate::config::BrokerClientConfig;
use crate::error::MqError;
use crate::handler::{DeliveryHandler, HandlerRegistry};
use crate::worker::{Worker, WorkerHandle};
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Pause between two dial attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Opens broker channels and starts the configured consumers on them.
pub struct Connector<D = AmqpDialer> {
    config: BrokerClientConfig,
    dialer: D,
    retry_interval: Duration,
    observers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connector<AmqpDialer> {
    pub fn new(config: BrokerClientConfig) -> Self {
        Self::with_dialer(config, AmqpDialer::default())
    }
}

impl<D: Dialer> Connector<D> {
    pub fn with_dialer(config: BrokerClientConfig, dialer: D) -> Self {
        Self {
            config,
            dialer,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the pause between dial attempts.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn config(&self) -> &BrokerClientConfig {
        &self.config
    }

    /// Dials the broker and returns an open channel.
    ///
    /// Makes up to `connection.attempts` attempts, pausing between them, and
    /// returns the last error once they are exhausted. When enabled in the
    /// config, background tasks log the channel's close notification and the
    /// messages the broker returns as unroutable.
    pub async fn channel(&self) -> Result<D::Channel, MqError> {
        let channel = self.dial().await?;

        if self.config.connection.error_log_enable {
            let closed = channel.notify_close();
            self.spawn_observer(async move {
                match closed.await {
                    Some(err) => log::error!("closing: {}", err),
                    None => log::info!("closing: channel closed without error"),
                }
            });
        }

        if self.config.connection.return_log_enable {
            let mut returns = channel.notify_return();
            self.spawn_observer(async move {
                while let Some(msg) = returns.next().await {
                    log::warn!(
                        "non-deliverable message: {}; routing key: {}",
                        String::from_utf8_lossy(&msg.data),
                        msg.routing_key
                    );
                }
            });
        }

        Ok(channel)
    }

    /// Starts `workers` consumers for every configured queue.
    ///
    /// All handlers are resolved before any consumer starts, so a missing
    /// handler leaves nothing running. Returns as soon as every consumer is
    /// subscribed; messages are processed in the background.
    pub async fn consume<C>(&self, channel: &C, handlers: &HandlerRegistry) -> Result<Vec<WorkerHandle>, MqError>
    where
        C: Subscriber + Clone + 'static,
    {
        let mut resolved: Vec<Arc<dyn DeliveryHandler>> = Vec::with_capacity(self.config.consumers.len());
        for consumer in &self.config.consumers {
            let handler = handlers
                .get(&consumer.id)
                .ok_or_else(|| MqError::HandlerNotFound(consumer.id.clone()))?;
            resolved.push(handler.clone());
        }

        let mut started = Vec::new();
        for (consumer, handler) in self.config.consumers.iter().zip(resolved) {
            for index in 0..consumer.workers {
                let tag = format!("{}_{}", consumer.id, index);
                let worker = Worker::new(handler.clone(), channel.clone(), consumer.queue.as_str(), tag);
                started.push(worker.consume().await?);
            }
            log::info!("consuming from queue: {} ({} worker(s))", consumer.queue, consumer.workers);
        }

        Ok(started)
    }

    /// Number of observer tasks still running.
    pub fn running_observers(&self) -> usize {
        match self.observers.lock() {
            Ok(observers) => observers.iter().filter(|h| !h.is_finished()).count(),
            Err(_) => 0,
        }
    }

    async fn dial(&self) -> Result<D::Channel, MqError> {
        let attempts = self.config.connection.attempts;
        if attempts <= 0 {
            return Err(MqError::Config("'attempts' must be greater than 0".to_string()));
        }
        let attempts = attempts as u32;
        let uri = self.config.connection.uri();

        let mut attempt = 1;
        loop {
            log::info!("Connecting to RabbitMQ at {} (attempt {}/{})", self.config.connection, attempt, attempts);
            match self.dialer.dial(&uri).await {
                Ok(channel) => {
                    log::info!("Connected to RabbitMQ at {}", self.config.connection);
                    return Ok(channel);
                }
                Err(e) if attempt >= attempts => {
                    log::error!("Giving up on RabbitMQ after {} attempt(s): {}", attempts, e);
                    return Err(MqError::Connection { attempts, source: e });
                }
                Err(e) => {
                    log::warn!(
                        "Dial attempt {}/{} failed: {}. Retrying in {:?}...",
                        attempt,
                        attempts,
                        e,
                        self.retry_interval
                    );
                    tokio::time::sleep(self.retry_interval).await;
                    attempt += 1;
                }
            }
        }
    }

    fn spawn_observer<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        if let Ok(mut observers) = self.observers.lock() {
            observers.retain(|h| !h.is_finished());
            observers.push(handle);
        }
    }
}
